//! Typed binding and evaluation for an embedded business-rule expression
//! language.
//!
//! Pre-parsed [`SyntaxNode`] trees are bound by a [`Binder`] into immutable
//! [`BoundNode`] trees. Overloads are ranked by implicit-cast distance
//! ([`dispatch::resolve`]), and decision tables plan their condition
//! conversions with [`find_condition_casts`]. Evaluation runs against a
//! mutable [`RuntimeEnv`]; multi-element calls fork clones of it onto an
//! [`ExecutionService`] and join them before returning.

mod bind;
mod condition;
pub mod dispatch;
mod env;
mod error;
mod node;
mod service;
mod table;
mod types;

pub use bind::{BindOptions, Binder, BoundExpression};
pub use condition::{find_condition_casts, ConditionCasts};
pub use dispatch::{match_properties, MatchingDispatcher, Selected};
pub use env::{
    resolve_runtime, EnvLayer, Environment, RuntimeContext, RuntimeEnv, TracedEnv,
    MAX_UNWRAP_DEPTH,
};
pub use error::{Error, EvalError};
pub use node::{BindingDependencies, BoundNode, NodeKind};
pub use service::{
    ActionStatus, ExecutionService, PendingAction, ServiceBuilder, ServiceConfig, ServiceStats,
    SlotBuffer,
};
pub use table::{Cell, Condition, DecisionTable, DecisionTableBuilder, RowBuilder};
pub use types::{
    distance, BindError, CastResolver, CastTable, ClassKind, CompareOp, CompileError, ConvertFn,
    CustomCast, Diagnostic, DispatchError, MemberKind, MemberRef, MethodBody, NativeFn,
    ObjectValue, OpenCast, OpenClass, OpenField, OpenMethod, Primitive, Severity, Span,
    StandardCasts, SyntaxKind, SyntaxNode, TypeRegistry, Value, NULL_TYPE,
};
