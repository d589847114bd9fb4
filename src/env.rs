//! Mutable runtime state for one top-level invocation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::error::EvalError;
use crate::service::{ExecutionService, PendingAction};
use crate::types::MemberRef;
use crate::Value;

/// Upper bound on decorator layers unwrapped to reach a [`RuntimeEnv`].
pub const MAX_UNWRAP_DEPTH: usize = 64;

/// One step of unwrapping an [`Environment`].
pub enum EnvLayer<'a> {
    Runtime(&'a mut RuntimeEnv),
    /// A decorator delegating to an inner environment.
    Decorated(&'a mut dyn Environment),
}

/// Capability implemented by the concrete environment and by every
/// decorator wrapping it. Decorators return their inner environment.
pub trait Environment: Send {
    fn layer(&mut self) -> EnvLayer<'_>;
}

impl Environment for RuntimeEnv {
    fn layer(&mut self) -> EnvLayer<'_> {
        EnvLayer::Runtime(self)
    }
}

/// Unwrap decorators until the concrete environment is reached.
///
/// # Errors
///
/// [`EvalError::EnvironmentDepth`] if more than [`MAX_UNWRAP_DEPTH`] layers wrap it.
pub fn resolve_runtime(env: &mut dyn Environment) -> Result<&mut RuntimeEnv, EvalError> {
    let mut current = env;
    for _ in 0..=MAX_UNWRAP_DEPTH {
        current = match current.layer() {
            EnvLayer::Runtime(runtime) => return Ok(runtime),
            EnvLayer::Decorated(inner) => inner,
        };
    }
    Err(EvalError::EnvironmentDepth {
        max: MAX_UNWRAP_DEPTH,
    })
}

/// Caller-supplied properties of an invocation (region, line of business,
/// effective date...), consulted by matching dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeContext {
    properties: BTreeMap<String, Value>,
}

impl RuntimeContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.properties.insert(key.to_owned(), value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Mutable, single-owner execution state: call frames of locals, static
/// field storage, the runtime context, and the queue of pending forked
/// actions.
///
/// Forked tasks receive a [`fork`](Self::fork) of this environment, never the
/// environment itself.
pub struct RuntimeEnv {
    frames: Vec<Vec<Value>>,
    statics: HashMap<MemberRef, Value>,
    context: RuntimeContext,
    service: Option<Arc<ExecutionService>>,
    actions: VecDeque<PendingAction>,
}

impl RuntimeEnv {
    /// An environment with one empty frame and no execution service.
    /// Parallel invocations fall back to sequential evaluation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: vec![Vec::new()],
            statics: HashMap::new(),
            context: RuntimeContext::default(),
            service: None,
            actions: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn with_service(mut self, service: Arc<ExecutionService>) -> Self {
        self.service = Some(service);
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: RuntimeContext) -> Self {
        self.context = context;
        self
    }

    /// Size the current frame to hold at least `slots` locals.
    #[must_use]
    pub fn with_locals(mut self, slots: usize) -> Self {
        self.ensure_locals(slots);
        self
    }

    pub fn ensure_locals(&mut self, slots: usize) {
        let frame = self.current_frame_mut();
        if frame.len() < slots {
            frame.resize(slots, Value::Null);
        }
    }

    /// Clone for a forked task: frames, statics and context are copied, the
    /// action queue starts empty.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            frames: self.frames.clone(),
            statics: self.statics.clone(),
            context: self.context.clone(),
            service: self.service.clone(),
            actions: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn service(&self) -> Option<&Arc<ExecutionService>> {
        self.service.as_ref()
    }

    #[must_use]
    pub fn context(&self) -> &RuntimeContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut RuntimeContext {
        &mut self.context
    }

    pub fn push_frame(&mut self, locals: Vec<Value>) {
        self.frames.push(locals);
    }

    pub fn pop_frame(&mut self) -> Option<Vec<Value>> {
        // The root frame stays.
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    fn current_frame_mut(&mut self) -> &mut Vec<Value> {
        if self.frames.is_empty() {
            self.frames.push(Vec::new());
        }
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    /// # Errors
    ///
    /// [`EvalError::NoSuchLocal`] if the current frame has no such slot.
    pub fn local(&self, slot: usize) -> Result<&Value, EvalError> {
        self.frames
            .last()
            .and_then(|frame| frame.get(slot))
            .ok_or(EvalError::NoSuchLocal { slot })
    }

    /// Store a local, growing the current frame if needed.
    pub fn set_local(&mut self, slot: usize, value: Value) {
        let frame = self.current_frame_mut();
        if frame.len() <= slot {
            frame.resize(slot + 1, Value::Null);
        }
        frame[slot] = value;
    }

    #[must_use]
    pub fn static_field(&self, field: &MemberRef) -> Value {
        self.statics.get(field).cloned().unwrap_or_default()
    }

    pub fn set_static_field(&mut self, field: MemberRef, value: Value) {
        self.statics.insert(field, value);
    }

    pub(crate) fn push_action(&mut self, action: PendingAction) {
        self.actions.push_back(action);
    }

    pub(crate) fn pop_action(&mut self) -> Option<PendingAction> {
        self.actions.pop_front()
    }

    pub(crate) fn drain_actions(&mut self) -> impl Iterator<Item = PendingAction> + '_ {
        self.actions.drain(..)
    }

    /// Number of forked actions not yet joined.
    #[must_use]
    pub fn pending_actions(&self) -> usize {
        self.actions.len()
    }
}

impl Default for RuntimeEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RuntimeEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeEnv")
            .field("frames", &self.frames)
            .field("statics", &self.statics)
            .field("context", &self.context)
            .field("service", &self.service.is_some())
            .field("pending_actions", &self.actions.len())
            .finish()
    }
}

/// Decorator that tags forks made through it with a label in the trace log.
pub struct TracedEnv<'a> {
    inner: &'a mut dyn Environment,
    label: String,
}

impl<'a> TracedEnv<'a> {
    pub fn new(inner: &'a mut dyn Environment, label: &str) -> Self {
        Self {
            inner,
            label: label.to_owned(),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Environment for TracedEnv<'_> {
    fn layer(&mut self) -> EnvLayer<'_> {
        tracing::trace!(label = %self.label, "unwrapping traced environment");
        EnvLayer::Decorated(&mut *self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Looping;

    impl Environment for Looping {
        fn layer(&mut self) -> EnvLayer<'_> {
            EnvLayer::Decorated(self)
        }
    }

    #[test]
    fn fork_copies_locals_but_not_actions() {
        let mut env = RuntimeEnv::new().with_locals(2);
        env.set_local(0, Value::Int(1));
        env.push_action(PendingAction::detached());
        let fork = env.fork();
        assert_eq!(fork.local(0).unwrap(), &Value::Int(1));
        assert_eq!(fork.pending_actions(), 0);
        assert_eq!(env.pending_actions(), 1);
    }

    #[test]
    fn fork_and_original_evolve_independently() {
        let mut env = RuntimeEnv::new().with_locals(1);
        env.set_local(0, Value::Int(1));
        let mut fork = env.fork();
        fork.set_local(0, Value::Int(2));
        env.set_local(0, Value::Int(3));
        assert_eq!(fork.local(0).unwrap(), &Value::Int(2));
        assert_eq!(env.local(0).unwrap(), &Value::Int(3));
    }

    #[test]
    fn frames_push_and_pop() {
        let mut env = RuntimeEnv::new().with_locals(1);
        env.set_local(0, Value::Int(9));
        env.push_frame(vec![Value::from("arg")]);
        assert_eq!(env.local(0).unwrap(), &Value::from("arg"));
        assert_eq!(env.depth(), 2);
        env.pop_frame();
        assert_eq!(env.local(0).unwrap(), &Value::Int(9));
        assert!(env.pop_frame().is_none(), "root frame is never popped");
    }

    #[test]
    fn missing_local_is_an_error() {
        let env = RuntimeEnv::new();
        assert!(matches!(env.local(3), Err(EvalError::NoSuchLocal { slot: 3 })));
    }

    #[test]
    fn statics_default_to_null() {
        let mut env = RuntimeEnv::new();
        let field = MemberRef {
            kind: crate::types::MemberKind::Field,
            declaring_class: "Tariff".into(),
            name: "base".into(),
        };
        assert_eq!(env.static_field(&field), Value::Null);
        env.set_static_field(field.clone(), Value::Int(100));
        assert_eq!(env.fork().static_field(&field), Value::Int(100));
    }

    #[test]
    fn resolve_through_decorators() {
        let mut env = RuntimeEnv::new().with_locals(1);
        env.set_local(0, Value::Int(5));
        let mut inner = TracedEnv::new(&mut env, "inner");
        let mut outer = TracedEnv::new(&mut inner, "outer");
        let runtime = resolve_runtime(&mut outer).unwrap();
        assert_eq!(runtime.local(0).unwrap(), &Value::Int(5));
    }

    #[test]
    fn unwrap_depth_is_bounded() {
        let mut looping = Looping;
        assert!(matches!(
            resolve_runtime(&mut looping),
            Err(EvalError::EnvironmentDepth { max: MAX_UNWRAP_DEPTH })
        ));
    }

    #[test]
    fn context_properties() {
        let env = RuntimeEnv::new().with_context(RuntimeContext::new().set("region", "EU"));
        assert_eq!(env.context().get("region"), Some(&Value::from("EU")));
        assert_eq!(env.fork().context(), env.context());
    }
}
