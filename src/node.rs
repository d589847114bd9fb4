//! Typed, evaluable expression trees produced by binding.

use std::collections::HashSet;
use std::sync::Arc;

use crate::dispatch::convert_args;
use crate::env::RuntimeEnv;
use crate::error::EvalError;
use crate::service::SlotBuffer;
use crate::types::{MemberRef, OpenCast, OpenClass, OpenField, OpenMethod, Span};
use crate::Value;

/// What a bound node does. Closed so evaluation and dependency walks are
/// checked for exhaustiveness.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Literal(Value),
    Local {
        slot: usize,
    },
    /// Local declaration; the optional single child is the initializer.
    Let {
        slot: usize,
    },
    /// `children[0] = children[1]`
    Assign,
    Block,
    /// Explicit or implicit conversion of `children[0]`.
    Cast(OpenCast),
    /// Instance field of the target, or a static field.
    Field(Arc<OpenField>),
    /// `children[0][children[1]]`
    Index,
    /// A type name used as a static target. Evaluates to null.
    TypeRef,
    /// Method invocation; children are the arguments.
    Call {
        method: Arc<OpenMethod>,
        casts: Vec<Option<OpenCast>>,
    },
    /// Invocation once per element of the array argument at `array_arg`,
    /// collecting the results into an array.
    MultiCall {
        method: Arc<OpenMethod>,
        casts: Vec<Option<OpenCast>>,
        array_arg: usize,
        parallel: bool,
    },
    /// Placeholder for a subtree that failed to bind. Fails at evaluation.
    Unresolved,
}

/// Immutable node of a bound expression tree.
///
/// The same tree may be evaluated any number of times, including concurrently
/// against forked environments.
#[derive(Debug, Clone)]
pub struct BoundNode {
    kind: NodeKind,
    children: Vec<BoundNode>,
    target: Option<Box<BoundNode>>,
    span: Span,
    ty: Option<Arc<OpenClass>>,
    is_lvalue: bool,
    is_static_target: bool,
}

impl BoundNode {
    #[must_use]
    pub fn new(kind: NodeKind, ty: Option<Arc<OpenClass>>) -> Self {
        Self {
            kind,
            children: Vec::new(),
            target: None,
            span: Span::default(),
            ty,
            is_lvalue: false,
            is_static_target: false,
        }
    }

    #[must_use]
    pub fn literal(value: Value, ty: Option<Arc<OpenClass>>) -> Self {
        Self::new(NodeKind::Literal(value), ty)
    }

    #[must_use]
    pub fn unresolved(span: Span) -> Self {
        Self::new(NodeKind::Unresolved, None).at(span)
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<BoundNode>) -> Self {
        self.children = children;
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: BoundNode) -> Self {
        self.target = Some(Box::new(target));
        self
    }

    #[must_use]
    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    #[must_use]
    pub fn lvalue(mut self) -> Self {
        self.is_lvalue = true;
        self
    }

    #[must_use]
    pub fn static_target(mut self) -> Self {
        self.is_static_target = true;
        self
    }

    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[must_use]
    pub fn children(&self) -> &[BoundNode] {
        &self.children
    }

    #[must_use]
    pub fn target(&self) -> Option<&BoundNode> {
        self.target.as_deref()
    }

    /// Location of the syntax node this was bound from.
    #[must_use]
    pub fn span(&self) -> Span {
        self.span
    }

    #[must_use]
    pub fn ty(&self) -> Option<&Arc<OpenClass>> {
        self.ty.as_ref()
    }

    #[must_use]
    pub fn is_lvalue(&self) -> bool {
        self.is_lvalue
    }

    #[must_use]
    pub fn is_static_target(&self) -> bool {
        self.is_static_target
    }

    /// Evaluate against `env`. The tree itself is never modified.
    ///
    /// # Errors
    ///
    /// Any [`EvalError`] raised by a member invocation, a failed forked task,
    /// a type mismatch, or an [`NodeKind::Unresolved`] node.
    pub fn evaluate(&self, env: &mut RuntimeEnv) -> Result<Value, EvalError> {
        match &self.kind {
            NodeKind::Literal(value) => Ok(value.clone()),
            NodeKind::Local { slot } => env.local(*slot).cloned(),
            NodeKind::Let { slot } => {
                let value = match self.children.first() {
                    Some(init) => init.evaluate(env)?,
                    None => Value::Null,
                };
                env.set_local(*slot, value.clone());
                Ok(value)
            }
            NodeKind::Assign => {
                let [lhs, rhs] = self.children.as_slice() else {
                    return Err(EvalError::NotAssignable);
                };
                let value = rhs.evaluate(env)?;
                lhs.assign(value.clone(), env)?;
                Ok(value)
            }
            NodeKind::Block => {
                let mut last = Value::Null;
                for statement in &self.children {
                    last = statement.evaluate(env)?;
                }
                Ok(last)
            }
            NodeKind::Cast(cast) => {
                let value = self.child_value(0, env)?;
                Ok(cast.convert(value))
            }
            NodeKind::Field(field) => {
                if field.is_static() {
                    return Ok(env.static_field(&field.member_ref()));
                }
                let target = self.target_value(env)?;
                read_field(field, &target)
            }
            NodeKind::Index => {
                let array = self.child_value(0, env)?;
                let index = self.child_value(1, env)?;
                let items = array.as_array().ok_or_else(|| EvalError::TypeMismatch {
                    expected: "array".into(),
                    found: array.kind_name().into(),
                })?;
                let index = index_of(&index, items.len())?;
                Ok(items[index].clone())
            }
            NodeKind::TypeRef => Ok(Value::Null),
            NodeKind::Call { method, casts } => {
                let target = self.instance_target(env)?;
                let args = self.argument_values(env)?;
                method.invoke(target.as_ref(), convert_args(casts, args), env)
            }
            NodeKind::MultiCall {
                method,
                casts,
                array_arg,
                parallel,
            } => {
                let target = self.instance_target(env)?;
                let args = self.argument_values(env)?;
                multi_call(method, casts, *array_arg, *parallel, target, args, env)
            }
            NodeKind::Unresolved => Err(EvalError::Unresolved { span: self.span }),
        }
    }

    /// Store `value` into the location this node denotes.
    ///
    /// # Errors
    ///
    /// [`EvalError::NotAssignable`] unless this node is an lvalue, and any
    /// error raised while evaluating the enclosing location.
    pub fn assign(&self, value: Value, env: &mut RuntimeEnv) -> Result<(), EvalError> {
        if !self.is_lvalue {
            return Err(EvalError::NotAssignable);
        }
        match &self.kind {
            NodeKind::Local { slot } | NodeKind::Let { slot } => {
                env.set_local(*slot, value);
                Ok(())
            }
            NodeKind::Field(field) if field.is_static() => {
                env.set_static_field(field.member_ref(), value);
                Ok(())
            }
            NodeKind::Field(field) => {
                let target = self.target.as_deref().ok_or(EvalError::NotAssignable)?;
                let mut record = match target.evaluate(env)? {
                    Value::Object(record) => record,
                    Value::Null => {
                        return Err(EvalError::MissingTarget {
                            member: field.member_ref().to_string(),
                        })
                    }
                    other => {
                        return Err(EvalError::TypeMismatch {
                            expected: field.declaring_class().into(),
                            found: other.kind_name().into(),
                        })
                    }
                };
                record.set(field.name(), value);
                // Records are values: write the updated one back.
                target.assign(Value::Object(record), env)
            }
            NodeKind::Index => {
                let [array_node, index_node] = self.children.as_slice() else {
                    return Err(EvalError::NotAssignable);
                };
                let array = array_node.evaluate(env)?;
                let index = index_node.evaluate(env)?;
                let Value::Array(mut items) = array else {
                    return Err(EvalError::TypeMismatch {
                        expected: "array".into(),
                        found: array.kind_name().into(),
                    });
                };
                let index = index_of(&index, items.len())?;
                items[index] = value;
                array_node.assign(Value::Array(items), env)
            }
            _ => Err(EvalError::NotAssignable),
        }
    }

    /// Report every member this tree references: target first, then children
    /// left to right, then the node's own member.
    pub fn update_dependency(&self, deps: &mut BindingDependencies) {
        if let Some(target) = &self.target {
            target.update_dependency(deps);
        }
        for child in &self.children {
            child.update_dependency(deps);
        }
        if let Some(member) = self.own_member() {
            deps.add(member);
        }
    }

    /// Report the fields written by assignments in this tree, in the same
    /// walk order as [`update_dependency`](Self::update_dependency).
    pub fn update_assign_field_dependency(&self, deps: &mut BindingDependencies) {
        if let Some(target) = &self.target {
            target.update_assign_field_dependency(deps);
        }
        for child in &self.children {
            child.update_assign_field_dependency(deps);
        }
        if let (NodeKind::Assign, Some(lhs)) = (&self.kind, self.children.first()) {
            lhs.written_fields(deps);
        }
    }

    fn written_fields(&self, deps: &mut BindingDependencies) {
        match &self.kind {
            NodeKind::Field(_) => {
                if let Some(target) = &self.target {
                    target.written_fields(deps);
                }
                if let Some(member) = self.own_member() {
                    deps.add(member);
                }
            }
            NodeKind::Index => {
                if let Some(array) = self.children.first() {
                    array.written_fields(deps);
                }
            }
            _ => {}
        }
    }

    /// The member this node itself references. A member reached through a
    /// target with no known type contributes nothing.
    fn own_member(&self) -> Option<MemberRef> {
        if self.target.as_ref().is_some_and(|t| t.ty.is_none()) {
            return None;
        }
        match &self.kind {
            NodeKind::Field(field) => Some(field.member_ref()),
            NodeKind::Call { method, .. } | NodeKind::MultiCall { method, .. } => {
                Some(method.member_ref())
            }
            _ => None,
        }
    }

    fn child_value(&self, index: usize, env: &mut RuntimeEnv) -> Result<Value, EvalError> {
        match self.children.get(index) {
            Some(child) => child.evaluate(env),
            None => Err(EvalError::Unresolved { span: self.span }),
        }
    }

    fn target_value(&self, env: &mut RuntimeEnv) -> Result<Value, EvalError> {
        match &self.target {
            Some(target) => target.evaluate(env),
            None => Ok(Value::Null),
        }
    }

    /// The receiver of an instance call. Static targets carry no value.
    fn instance_target(&self, env: &mut RuntimeEnv) -> Result<Option<Value>, EvalError> {
        match &self.target {
            Some(target) if !target.is_static_target => target.evaluate(env).map(Some),
            _ => Ok(None),
        }
    }

    fn argument_values(&self, env: &mut RuntimeEnv) -> Result<Vec<Value>, EvalError> {
        self.children.iter().map(|arg| arg.evaluate(env)).collect()
    }
}

fn read_field(field: &OpenField, target: &Value) -> Result<Value, EvalError> {
    match target {
        Value::Object(record) => Ok(record.get(field.name()).cloned().unwrap_or_default()),
        Value::Null => Err(EvalError::MissingTarget {
            member: field.member_ref().to_string(),
        }),
        other => Err(EvalError::TypeMismatch {
            expected: field.declaring_class().into(),
            found: other.kind_name().into(),
        }),
    }
}

fn index_of(index: &Value, len: usize) -> Result<usize, EvalError> {
    let raw = index.as_int().ok_or_else(|| EvalError::TypeMismatch {
        expected: "int".into(),
        found: index.kind_name().into(),
    })?;
    usize::try_from(raw)
        .ok()
        .filter(|i| *i < len)
        .ok_or(EvalError::IndexOutOfBounds { index: raw, len })
}

/// Invoke `method` once per element of `args[array_arg]`.
///
/// In parallel mode every element is forked onto the environment's execution
/// service and writes its own slot of a shared buffer; the results are read
/// after the join. Without a service the elements run in order.
fn multi_call(
    method: &Arc<OpenMethod>,
    casts: &[Option<OpenCast>],
    array_arg: usize,
    parallel: bool,
    target: Option<Value>,
    mut args: Vec<Value>,
    env: &mut RuntimeEnv,
) -> Result<Value, EvalError> {
    let elements = match args.get_mut(array_arg).map(std::mem::take) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) => return Ok(Value::Null),
        Some(other) => {
            return Err(EvalError::TypeMismatch {
                expected: "array".into(),
                found: other.kind_name().into(),
            })
        }
        None => return Err(EvalError::Unresolved { span: Span::default() }),
    };

    let call_args = |element: Value| {
        let mut call = args.clone();
        call[array_arg] = element;
        convert_args(casts, call)
    };

    let service = if parallel { env.service().cloned() } else { None };
    let Some(service) = service else {
        let mut results = Vec::with_capacity(elements.len());
        for element in elements {
            results.push(method.invoke(target.as_ref(), call_args(element), env)?);
        }
        return Ok(Value::Array(results));
    };

    let buffer = Arc::new(SlotBuffer::new(elements.len()));
    for (slot, element) in elements.into_iter().enumerate() {
        let method = Arc::clone(method);
        let buffer = Arc::clone(&buffer);
        let target = target.clone();
        let call = call_args(element);
        service.execute(env, move |fork| {
            let value = method.invoke(target.as_ref(), call, fork)?;
            buffer.set(slot, value);
            Ok(())
        })?;
    }
    service.join(env)?;
    Ok(Value::Array(buffer.snapshot()))
}

/// Ordered, duplicate-free set of member references collected by a
/// dependency walk.
#[derive(Debug, Clone, Default)]
pub struct BindingDependencies {
    order: Vec<MemberRef>,
    seen: HashSet<MemberRef>,
}

impl BindingDependencies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reference. Returns `false` if it was already present.
    pub fn add(&mut self, member: MemberRef) -> bool {
        if self.seen.insert(member.clone()) {
            self.order.push(member);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn contains(&self, member: &MemberRef) -> bool {
        self.seen.contains(member)
    }

    /// References in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &MemberRef> {
        self.order.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<MemberRef> {
        self.order
    }
}
