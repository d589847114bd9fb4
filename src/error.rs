use thiserror::Error;

use crate::types::{CompileError, DispatchError, Span};

/// Failures raised while evaluating a bound expression.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("expression is not assignable")]
    NotAssignable,

    #[error("unresolved expression at {}..{}", span.start, span.end)]
    Unresolved { span: Span },

    #[error("local slot {slot} is not defined in the current frame")]
    NoSuchLocal { slot: usize },

    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("index {index} out of bounds for array of length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("'{member}' requires a non-null target")]
    MissingTarget { member: String },

    #[error("method '{method}' failed: {message}")]
    Method { method: String, message: String },

    #[error("decision table '{table}' expects {expected} inputs, got {found}")]
    TableArity {
        table: String,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Failure of a forked task, surfaced at the owning environment's join.
    #[error("concurrent task failed: {source}")]
    TaskFailed { source: Box<EvalError> },

    #[error("concurrent task panicked: {message}")]
    TaskPanicked { message: String },

    #[error("environment decorator chain exceeds {max} layers")]
    EnvironmentDepth { max: usize },
}

impl EvalError {
    /// Wrap a forked task's failure for propagation at join.
    #[must_use]
    pub fn task_failed(cause: EvalError) -> Self {
        EvalError::TaskFailed {
            source: Box::new(cause),
        }
    }

    /// The innermost cause, looking through any number of task-failure layers.
    #[must_use]
    pub fn root_cause(&self) -> &EvalError {
        let mut current = self;
        while let EvalError::TaskFailed { source } = current {
            current = source.as_ref();
        }
        current
    }
}

/// Unified error type for the crate's convenience entry points.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("failed to start execution service: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("binding failed with {} error(s): {}", .0.len(), .0.join("; "))]
    Bind(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_failed_carries_cause() {
        let err = EvalError::task_failed(EvalError::Method {
            method: "rate(int)".into(),
            message: "negative age".into(),
        });
        assert_eq!(
            err.to_string(),
            "concurrent task failed: method 'rate(int)' failed: negative age"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn root_cause_unwraps_nested_failures() {
        let err = EvalError::task_failed(EvalError::task_failed(EvalError::NotAssignable));
        assert!(matches!(err.root_cause(), EvalError::NotAssignable));
    }

    #[test]
    fn index_message() {
        let err = EvalError::IndexOutOfBounds { index: 5, len: 3 };
        assert_eq!(
            err.to_string(),
            "index 5 out of bounds for array of length 3"
        );
    }

    #[test]
    fn bind_error_lists_messages() {
        let err = Error::Bind(vec!["unknown identifier 'x'".into(), "unknown type 'Y'".into()]);
        assert_eq!(
            err.to_string(),
            "binding failed with 2 error(s): unknown identifier 'x'; unknown type 'Y'"
        );
    }
}
