use std::fmt;

use thiserror::Error;

use super::syntax::Span;

/// Overload resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("ambiguous call to '{name}': candidates {}", candidates.join(", "))]
    Ambiguous {
        name: String,
        candidates: Vec<String>,
    },

    #[error("no applicable overload of '{name}' for arguments ({})", arguments.join(", "))]
    NoApplicable {
        name: String,
        arguments: Vec<String>,
    },
}

/// Problems found while binding a syntax tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("static reference '{target}' resolves to non-static member '{member}'")]
    InvalidTarget { target: String, member: String },

    #[error("unknown identifier '{name}'")]
    UnknownIdentifier { name: String },

    #[error("unknown type '{name}'")]
    UnknownType { name: String },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("type '{ty}' has no field '{name}'")]
    UnknownField { ty: String, name: String },

    #[error("expression is not assignable")]
    NotAssignable,

    #[error("type '{ty}' is not an array")]
    NotAnArray { ty: String },

    #[error("cannot convert '{from}' to '{to}'")]
    TypeMismatch { from: String, to: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// A bind-time message attached to a source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub span: Span,
    pub error: BindError,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}..{}]: {}",
            self.severity, self.span.start, self.span.end, self.error
        )
    }
}

/// Decision-table compilation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("decision table '{table}' has no conditions")]
    NoConditions { table: String },

    #[error("decision table '{table}' has no rows")]
    NoRows { table: String },

    #[error("duplicate condition '{condition}' in decision table '{table}'")]
    DuplicateCondition { table: String, condition: String },

    #[error("row {row} of decision table '{table}' has {found} cells, expected {expected}")]
    RowArity {
        table: String,
        row: usize,
        expected: usize,
        found: usize,
    },
}
