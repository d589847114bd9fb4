use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::class::OpenClass;
use super::value::Value;
use crate::dispatch::MatchingDispatcher;
use crate::env::RuntimeEnv;
use crate::error::EvalError;
use crate::node::BoundNode;

/// Host-implemented method body: `(target, arguments, environment)`.
pub type NativeFn = Arc<
    dyn Fn(Option<&Value>, &[Value], &mut RuntimeEnv) -> Result<Value, EvalError> + Send + Sync,
>;

/// How a method computes its result.
#[derive(Clone)]
pub enum MethodBody {
    Native(NativeFn),
    /// A bound rule body, evaluated in a fresh locals frame whose leading
    /// slots hold the arguments.
    Bound {
        body: Arc<BoundNode>,
        frame_size: usize,
    },
    /// Several same-signature implementations, chosen per invocation.
    Dispatch(MatchingDispatcher),
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodBody::Native(_) => f.write_str("Native(..)"),
            MethodBody::Bound { frame_size, .. } => f
                .debug_struct("Bound")
                .field("frame_size", frame_size)
                .finish_non_exhaustive(),
            MethodBody::Dispatch(d) => f.debug_tuple("Dispatch").field(d).finish(),
        }
    }
}

/// A callable member of a type or rule module.
#[derive(Debug, Clone)]
pub struct OpenMethod {
    name: String,
    declaring_class: String,
    params: Vec<Arc<OpenClass>>,
    return_type: Arc<OpenClass>,
    is_static: bool,
    properties: BTreeMap<String, Value>,
    body: MethodBody,
}

impl OpenMethod {
    /// A static method backed by a host closure.
    pub fn native(
        name: &str,
        declaring_class: &str,
        params: Vec<Arc<OpenClass>>,
        return_type: Arc<OpenClass>,
        f: impl Fn(Option<&Value>, &[Value], &mut RuntimeEnv) -> Result<Value, EvalError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::with_body(
            name,
            declaring_class,
            params,
            return_type,
            MethodBody::Native(Arc::new(f)),
        )
    }

    /// A static method whose body is a bound expression. The expression's
    /// first `params.len()` local slots receive the arguments.
    #[must_use]
    pub fn bound(
        name: &str,
        declaring_class: &str,
        params: Vec<Arc<OpenClass>>,
        return_type: Arc<OpenClass>,
        body: Arc<BoundNode>,
        frame_size: usize,
    ) -> Self {
        let frame_size = frame_size.max(params.len());
        Self::with_body(
            name,
            declaring_class,
            params,
            return_type,
            MethodBody::Bound { body, frame_size },
        )
    }

    #[must_use]
    pub fn with_body(
        name: &str,
        declaring_class: &str,
        params: Vec<Arc<OpenClass>>,
        return_type: Arc<OpenClass>,
        body: MethodBody,
    ) -> Self {
        Self {
            name: name.to_owned(),
            declaring_class: declaring_class.to_owned(),
            params,
            return_type,
            is_static: true,
            properties: BTreeMap::new(),
            body,
        }
    }

    /// Mark this method as an instance method, requiring a target value.
    #[must_use]
    pub fn instance(mut self) -> Self {
        self.is_static = false;
        self
    }

    /// Attach a dimension property used by [`MatchingDispatcher`] narrowing.
    #[must_use]
    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_owned(), value.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn declaring_class(&self) -> &str {
        &self.declaring_class
    }

    #[must_use]
    pub fn params(&self) -> &[Arc<OpenClass>] {
        &self.params
    }

    #[must_use]
    pub fn return_type(&self) -> &Arc<OpenClass> {
        &self.return_type
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    #[must_use]
    pub fn body(&self) -> &MethodBody {
        &self.body
    }

    /// `name(type, type, ...)`
    #[must_use]
    pub fn signature(&self) -> String {
        let params: Vec<&str> = self.params.iter().map(|p| p.name()).collect();
        format!("{}({})", self.name, params.join(", "))
    }

    /// True when both methods have the same name and parameter types.
    #[must_use]
    pub fn same_signature(&self, other: &OpenMethod) -> bool {
        self.name == other.name && self.params == other.params
    }

    #[must_use]
    pub fn member_ref(&self) -> MemberRef {
        MemberRef {
            kind: MemberKind::Method,
            declaring_class: self.declaring_class.clone(),
            name: self.signature(),
        }
    }

    /// Invoke with already-converted arguments.
    ///
    /// # Errors
    ///
    /// Propagates whatever the body returns, and
    /// [`EvalError::MissingTarget`] for an instance method called without one.
    pub fn invoke(
        &self,
        target: Option<&Value>,
        args: Vec<Value>,
        env: &mut RuntimeEnv,
    ) -> Result<Value, EvalError> {
        if !self.is_static && target.is_none_or(Value::is_null) {
            return Err(EvalError::MissingTarget {
                member: self.signature(),
            });
        }
        match &self.body {
            MethodBody::Native(f) => f(target, &args, env),
            MethodBody::Bound { body, frame_size } => {
                let mut frame = args;
                frame.resize(*frame_size, Value::Null);
                env.push_frame(frame);
                let result = body.evaluate(env);
                env.pop_frame();
                result
            }
            MethodBody::Dispatch(dispatcher) => dispatcher.invoke(target, args, env),
        }
    }
}

/// A data member. Static fields live in the runtime environment; instance
/// fields live in [`ObjectValue`](super::value::ObjectValue) records.
#[derive(Debug, Clone)]
pub struct OpenField {
    name: String,
    declaring_class: String,
    ty: Arc<OpenClass>,
    is_static: bool,
}

impl OpenField {
    #[must_use]
    pub fn instance(name: &str, declaring_class: &str, ty: Arc<OpenClass>) -> Self {
        Self {
            name: name.to_owned(),
            declaring_class: declaring_class.to_owned(),
            ty,
            is_static: false,
        }
    }

    #[must_use]
    pub fn new_static(name: &str, declaring_class: &str, ty: Arc<OpenClass>) -> Self {
        Self {
            is_static: true,
            ..Self::instance(name, declaring_class, ty)
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn declaring_class(&self) -> &str {
        &self.declaring_class
    }

    #[must_use]
    pub fn ty(&self) -> &Arc<OpenClass> {
        &self.ty
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    #[must_use]
    pub fn member_ref(&self) -> MemberRef {
        MemberRef {
            kind: MemberKind::Field,
            declaring_class: self.declaring_class.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemberKind {
    Method,
    Field,
}

/// Identity of a referenced member, as reported to the dependency sink.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberRef {
    pub kind: MemberKind,
    pub declaring_class: String,
    /// Field name, or method signature.
    pub name: String,
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring_class, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TypeRegistry;

    fn add_method() -> OpenMethod {
        let reg = TypeRegistry::new();
        let int = reg.get("int").unwrap();
        OpenMethod::native(
            "add",
            "Math",
            vec![Arc::clone(&int), Arc::clone(&int)],
            int,
            |_, args, _| match (&args[0], &args[1]) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
                _ => Ok(Value::Null),
            },
        )
    }

    #[test]
    fn signature_lists_param_types() {
        assert_eq!(add_method().signature(), "add(int, int)");
    }

    #[test]
    fn member_ref_display() {
        let m = add_method();
        assert_eq!(m.member_ref().to_string(), "Math.add(int, int)");
        assert_eq!(m.member_ref().kind, MemberKind::Method);
    }

    #[test]
    fn invoke_native() {
        let mut env = RuntimeEnv::new();
        let result = add_method()
            .invoke(None, vec![Value::Int(2), Value::Int(3)], &mut env)
            .unwrap();
        assert_eq!(result, Value::Int(5));
    }

    #[test]
    fn instance_method_requires_target() {
        let mut env = RuntimeEnv::new();
        let m = add_method().instance();
        let err = m
            .invoke(None, vec![Value::Int(1), Value::Int(1)], &mut env)
            .unwrap_err();
        assert!(matches!(err, EvalError::MissingTarget { .. }));
    }

    #[test]
    fn properties_and_static_flag() {
        let m = add_method().with_property("region", "EU");
        assert!(m.is_static());
        assert_eq!(m.properties().get("region"), Some(&Value::from("EU")));
        assert!(!m.clone().instance().is_static());
    }

    #[test]
    fn field_refs() {
        let reg = TypeRegistry::new();
        let f = OpenField::new_static("rate", "Tariff", reg.get("double").unwrap());
        assert!(f.is_static());
        assert_eq!(f.member_ref().to_string(), "Tariff.rate");
        assert_eq!(f.member_ref().kind, MemberKind::Field);
    }
}
