//! Binding of pre-parsed syntax trees into [`BoundNode`] trees.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::dispatch::{self, MatchingDispatcher};
use crate::env::RuntimeEnv;
use crate::error::{Error, EvalError};
use crate::node::{BindingDependencies, BoundNode, NodeKind};
use crate::types::{
    BindError, CastResolver, Diagnostic, DispatchError, OpenClass, OpenMethod, Severity, Span,
    SyntaxKind, SyntaxNode, TypeRegistry,
};
use crate::Value;

/// Binding policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BindOptions {
    /// Severity of a static reference resolving to a non-static member.
    /// At `Error` the offending node is left unresolved.
    pub invalid_target: Severity,
    /// Evaluate multi-element calls on the execution service when one is
    /// attached to the environment.
    pub parallel_multicall: bool,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            invalid_target: Severity::Warning,
            parallel_multicall: true,
        }
    }
}

/// Result of one binding pass. Binding never fails outright: subtrees that
/// could not be bound become [`NodeKind::Unresolved`] and are described by
/// an error diagnostic.
#[derive(Debug, Clone)]
pub struct BoundExpression {
    pub root: BoundNode,
    /// Number of local slots the expression needs.
    pub frame_size: usize,
    pub diagnostics: Vec<Diagnostic>,
    pub dependencies: BindingDependencies,
}

impl BoundExpression {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    /// Reject the expression if any diagnostic is an error.
    ///
    /// # Errors
    ///
    /// [`Error::Bind`] listing every error diagnostic.
    pub fn into_result(self) -> Result<Self, Error> {
        if self.has_errors() {
            return Err(Error::Bind(self.errors().map(ToString::to_string).collect()));
        }
        Ok(self)
    }

    /// Evaluate in the current frame of `env`, sized to this expression.
    ///
    /// # Errors
    ///
    /// See [`BoundNode::evaluate`].
    pub fn evaluate(&self, env: &mut RuntimeEnv) -> Result<Value, EvalError> {
        env.ensure_locals(self.frame_size);
        self.root.evaluate(env)
    }
}

/// Binds syntax against a type registry, a cast resolver and a set of
/// module functions callable without a target.
pub struct Binder {
    registry: Arc<TypeRegistry>,
    resolver: Arc<dyn CastResolver>,
    functions: Vec<Arc<OpenMethod>>,
    options: BindOptions,
}

struct Local {
    name: String,
    slot: usize,
    ty: Arc<OpenClass>,
}

/// Per-pass state.
#[derive(Default)]
struct Scope {
    locals: Vec<Local>,
    frame_size: usize,
    diagnostics: Vec<Diagnostic>,
}

impl Scope {
    fn declare(&mut self, name: &str, ty: Arc<OpenClass>) -> usize {
        let slot = self.locals.len();
        self.locals.push(Local {
            name: name.to_owned(),
            slot,
            ty,
        });
        self.frame_size = self.frame_size.max(self.locals.len());
        slot
    }

    fn lookup(&self, name: &str) -> Option<&Local> {
        self.locals.iter().rev().find(|l| l.name == name)
    }

    fn report(&mut self, severity: Severity, span: Span, error: BindError) {
        match severity {
            Severity::Warning => warn!(start = span.start, end = span.end, %error, "bind warning"),
            Severity::Error => debug!(start = span.start, end = span.end, %error, "bind error"),
        }
        self.diagnostics.push(Diagnostic {
            severity,
            span,
            error,
        });
    }

    fn fail(&mut self, span: Span, error: BindError) -> BoundNode {
        self.report(Severity::Error, span, error);
        BoundNode::unresolved(span)
    }
}

impl Binder {
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>, resolver: Arc<dyn CastResolver>) -> Self {
        Self {
            registry,
            resolver,
            functions: Vec::new(),
            options: BindOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: BindOptions) -> Self {
        self.options = options;
        self
    }

    /// Make `method` callable by unqualified name.
    #[must_use]
    pub fn with_function(mut self, method: impl Into<Arc<OpenMethod>>) -> Self {
        self.functions.push(method.into());
        self
    }

    /// Add every function of a loaded module. Functions repeating a
    /// signature already known become candidates of one matching dispatch.
    #[must_use]
    pub fn with_module(mut self, methods: impl IntoIterator<Item = Arc<OpenMethod>>) -> Self {
        self.functions.extend(methods);
        self
    }

    #[must_use]
    pub fn options(&self) -> &BindOptions {
        &self.options
    }

    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Bind a standalone expression.
    #[must_use]
    pub fn bind(&self, syntax: &SyntaxNode) -> BoundExpression {
        self.bind_with_params(&[], syntax)
    }

    /// Bind with `params` pre-declared as locals `0..params.len()`. Unknown
    /// parameter types are reported and the parameter typed as `Object`.
    #[must_use]
    pub fn bind_with_params(
        &self,
        params: &[(&str, &str)],
        syntax: &SyntaxNode,
    ) -> BoundExpression {
        let mut scope = Scope::default();
        for (name, ty) in params {
            let ty = self.type_named(ty, syntax.span, &mut scope);
            scope.declare(name, ty);
        }
        let root = self.bind_node(syntax, &mut scope);
        let mut dependencies = BindingDependencies::new();
        root.update_dependency(&mut dependencies);
        BoundExpression {
            root,
            frame_size: scope.frame_size,
            diagnostics: scope.diagnostics,
            dependencies,
        }
    }

    /// Bind a rule body into a static method declared on `declaring_class`.
    ///
    /// # Errors
    ///
    /// [`Error::Bind`] if the body or its conversion to `return_type` has
    /// error diagnostics.
    pub fn bind_method(
        &self,
        name: &str,
        declaring_class: &str,
        params: &[(&str, &str)],
        return_type: &str,
        body: &SyntaxNode,
    ) -> Result<OpenMethod, Error> {
        let mut scope = Scope::default();
        let mut param_types = Vec::with_capacity(params.len());
        for (param, ty) in params {
            let ty = self.type_named(ty, body.span, &mut scope);
            scope.declare(param, Arc::clone(&ty));
            param_types.push(ty);
        }
        let return_ty = self.type_named(return_type, body.span, &mut scope);
        let root = self.bind_node(body, &mut scope);
        let root = self.coerce(root, &return_ty, &mut scope);

        let bound = BoundExpression {
            root,
            frame_size: scope.frame_size,
            diagnostics: scope.diagnostics,
            dependencies: BindingDependencies::new(),
        }
        .into_result()?;
        Ok(OpenMethod::bound(
            name,
            declaring_class,
            param_types,
            return_ty,
            Arc::new(bound.root),
            bound.frame_size,
        ))
    }

    fn type_named(&self, name: &str, span: Span, scope: &mut Scope) -> Arc<OpenClass> {
        if let Some(ty) = self.registry.get(name) {
            return ty;
        }
        scope.report(
            Severity::Error,
            span,
            BindError::UnknownType {
                name: name.to_owned(),
            },
        );
        self.object_type()
    }

    fn object_type(&self) -> Arc<OpenClass> {
        self.registry
            .get("Object")
            .unwrap_or_else(|| Arc::new(OpenClass::reference("Object", None)))
    }

    fn bind_node(&self, syntax: &SyntaxNode, scope: &mut Scope) -> BoundNode {
        let span = syntax.span;
        match &syntax.kind {
            SyntaxKind::Literal(value) => {
                BoundNode::literal(value.clone(), self.registry.type_of(value)).at(span)
            }
            SyntaxKind::Ident(name) => self.bind_ident(name, span, scope),
            SyntaxKind::Let { name, ty } => {
                let ty = self.type_named(ty, span, scope);
                let init = syntax.children.first().map(|init| {
                    let init = self.bind_node(init, scope);
                    self.coerce(init, &ty, scope)
                });
                let slot = scope.declare(name, Arc::clone(&ty));
                BoundNode::new(NodeKind::Let { slot }, Some(ty))
                    .with_children(init.into_iter().collect())
                    .lvalue()
                    .at(span)
            }
            SyntaxKind::Assign => {
                let [lhs, rhs] = syntax.children.as_slice() else {
                    return scope.fail(span, BindError::NotAssignable);
                };
                let lhs = self.bind_node(lhs, scope);
                let rhs = self.bind_node(rhs, scope);
                if matches!(lhs.kind(), NodeKind::Unresolved) {
                    return BoundNode::unresolved(span);
                }
                if !lhs.is_lvalue() {
                    return scope.fail(span, BindError::NotAssignable);
                }
                let rhs = match lhs.ty() {
                    Some(ty) => self.coerce(rhs, &Arc::clone(ty), scope),
                    None => rhs,
                };
                let ty = lhs.ty().cloned();
                BoundNode::new(NodeKind::Assign, ty)
                    .with_children(vec![lhs, rhs])
                    .at(span)
            }
            SyntaxKind::Block => {
                let mark = scope.locals.len();
                let statements: Vec<BoundNode> = syntax
                    .children
                    .iter()
                    .map(|s| self.bind_node(s, scope))
                    .collect();
                scope.locals.truncate(mark);
                let ty = statements.last().and_then(|s| s.ty().cloned());
                BoundNode::new(NodeKind::Block, ty)
                    .with_children(statements)
                    .at(span)
            }
            SyntaxKind::Cast { ty } => {
                let ty = self.type_named(ty, span, scope);
                let Some(operand) = syntax.children.first() else {
                    return BoundNode::unresolved(span);
                };
                let operand = self.bind_node(operand, scope);
                self.explicit_cast(operand, &ty, span, scope)
            }
            SyntaxKind::Field { name } => self.bind_field(syntax, name, scope),
            SyntaxKind::Index => self.bind_index(syntax, scope),
            SyntaxKind::Call { name } => {
                let candidates: Vec<Arc<OpenMethod>> = self
                    .functions
                    .iter()
                    .filter(|m| m.name() == name)
                    .cloned()
                    .collect();
                let args = self.bind_all(&syntax.children, scope);
                if candidates.is_empty() {
                    return scope.fail(span, BindError::UnknownFunction { name: name.clone() });
                }
                self.bind_call(name, candidates, None, args, span, scope)
            }
            SyntaxKind::MemberCall { name } => {
                let Some((target, args)) = syntax.children.split_first() else {
                    return BoundNode::unresolved(span);
                };
                let target = self.bind_node(target, scope);
                let args = self.bind_all(args, scope);
                let Some(target_ty) = target.ty().cloned() else {
                    return BoundNode::unresolved(span);
                };
                let candidates = visible_methods(self.registry.methods(&target_ty, name));
                if candidates.is_empty() {
                    return scope.fail(
                        span,
                        BindError::UnknownFunction {
                            name: format!("{}.{name}", target_ty.name()),
                        },
                    );
                }
                self.bind_call(name, candidates, Some(target), args, span, scope)
            }
        }
    }

    fn bind_all(&self, nodes: &[SyntaxNode], scope: &mut Scope) -> Vec<BoundNode> {
        nodes.iter().map(|n| self.bind_node(n, scope)).collect()
    }

    fn bind_ident(&self, name: &str, span: Span, scope: &mut Scope) -> BoundNode {
        if let Some(local) = scope.lookup(name) {
            return BoundNode::new(NodeKind::Local { slot: local.slot }, Some(Arc::clone(&local.ty)))
                .lvalue()
                .at(span);
        }
        if let Some(ty) = self.registry.get(name) {
            return BoundNode::new(NodeKind::TypeRef, Some(ty))
                .static_target()
                .at(span);
        }
        scope.fail(
            span,
            BindError::UnknownIdentifier {
                name: name.to_owned(),
            },
        )
    }

    fn bind_field(&self, syntax: &SyntaxNode, name: &str, scope: &mut Scope) -> BoundNode {
        let span = syntax.span;
        let Some(target) = syntax.children.first() else {
            return BoundNode::unresolved(span);
        };
        let target = self.bind_node(target, scope);
        let Some(target_ty) = target.ty().cloned() else {
            return BoundNode::unresolved(span);
        };
        let Some(field) = self.registry.field(&target_ty, name) else {
            return scope.fail(
                span,
                BindError::UnknownField {
                    ty: target_ty.name().to_owned(),
                    name: name.to_owned(),
                },
            );
        };
        if target.is_static_target() && !field.is_static() {
            let member = field.member_ref().to_string();
            if !self.accept_target(&target_ty, &member, span, scope) {
                return BoundNode::unresolved(span);
            }
        }
        BoundNode::new(NodeKind::Field(Arc::clone(&field)), Some(Arc::clone(field.ty())))
            .with_target(target)
            .lvalue()
            .at(span)
    }

    /// Report a static reference to a non-static member. Returns whether
    /// binding may continue.
    fn accept_target(
        &self,
        target: &OpenClass,
        member: &str,
        span: Span,
        scope: &mut Scope,
    ) -> bool {
        let severity = self.options.invalid_target;
        scope.report(
            severity,
            span,
            BindError::InvalidTarget {
                target: target.name().to_owned(),
                member: member.to_owned(),
            },
        );
        severity < Severity::Error
    }

    fn bind_index(&self, syntax: &SyntaxNode, scope: &mut Scope) -> BoundNode {
        let span = syntax.span;
        let [array, index] = syntax.children.as_slice() else {
            return BoundNode::unresolved(span);
        };
        let array = self.bind_node(array, scope);
        let index = self.bind_node(index, scope);
        let Some(array_ty) = array.ty().cloned() else {
            return BoundNode::unresolved(span);
        };
        let Some(component) = array_ty.component().cloned() else {
            return scope.fail(
                span,
                BindError::NotAnArray {
                    ty: array_ty.name().to_owned(),
                },
            );
        };
        let index = match self.registry.get("int") {
            Some(int) => self.coerce(index, &int, scope),
            None => index,
        };
        BoundNode::new(NodeKind::Index, Some(component))
            .with_children(vec![array, index])
            .lvalue()
            .at(span)
    }

    /// Bind an explicit conversion. Any cast the resolver knows is allowed,
    /// implicit or not.
    fn explicit_cast(
        &self,
        operand: BoundNode,
        ty: &Arc<OpenClass>,
        span: Span,
        scope: &mut Scope,
    ) -> BoundNode {
        let Some(from) = operand.ty().cloned() else {
            return BoundNode::unresolved(span);
        };
        if ty.is_assignable_from(&from) {
            return operand;
        }
        match self.resolver.lookup_cast(&from, ty) {
            Some(cast) => BoundNode::new(NodeKind::Cast(cast), Some(Arc::clone(ty)))
                .with_children(vec![operand])
                .at(span),
            None => scope.fail(
                span,
                BindError::TypeMismatch {
                    from: from.name().to_owned(),
                    to: ty.name().to_owned(),
                },
            ),
        }
    }

    /// Convert `node` to `ty` with an implicit cast if needed.
    fn coerce(&self, node: BoundNode, ty: &Arc<OpenClass>, scope: &mut Scope) -> BoundNode {
        let Some(from) = node.ty().cloned() else {
            return node;
        };
        if ty.is_assignable_from(&from) {
            return node;
        }
        let span = node.span();
        match self.resolver.lookup_implicit_cast(&from, ty) {
            Some(cast) => BoundNode::new(NodeKind::Cast(cast), Some(Arc::clone(ty)))
                .with_children(vec![node])
                .at(span),
            None => scope.fail(
                span,
                BindError::TypeMismatch {
                    from: from.name().to_owned(),
                    to: ty.name().to_owned(),
                },
            ),
        }
    }

    /// Resolve a call among `candidates`, falling back to a multi-element
    /// call when no overload accepts the arguments as they are.
    fn bind_call(
        &self,
        name: &str,
        candidates: Vec<Arc<OpenMethod>>,
        target: Option<BoundNode>,
        args: Vec<BoundNode>,
        span: Span,
        scope: &mut Scope,
    ) -> BoundNode {
        let arg_types: Option<Vec<Arc<OpenClass>>> =
            args.iter().map(|a| a.ty().cloned()).collect();
        let Some(arg_types) = arg_types else {
            return BoundNode::unresolved(span);
        };
        let candidates = MatchingDispatcher::group(candidates, &self.resolver);

        let resolved = dispatch::resolve(name, &candidates, &arg_types, self.resolver.as_ref());
        let (kind, ty, method) = match resolved {
            Ok(selected) => {
                let method = Arc::clone(&selected.method);
                let ty = Arc::clone(method.return_type());
                let kind = NodeKind::Call {
                    method: selected.method,
                    casts: selected.casts,
                };
                (kind, ty, method)
            }
            Err(err @ DispatchError::NoApplicable { .. }) => {
                match self.multi_call(name, &candidates, &arg_types) {
                    Some(Ok(found)) => found,
                    Some(Err(ambiguous)) => return scope.fail(span, ambiguous.into()),
                    None => return scope.fail(span, err.into()),
                }
            }
            Err(err) => return scope.fail(span, err.into()),
        };

        if let Some(type_ref) = target.as_ref().filter(|t| t.is_static_target()) {
            if !method.is_static() {
                let target_ty = type_ref.ty().cloned().unwrap_or_else(|| self.object_type());
                let member = method.member_ref().to_string();
                if !self.accept_target(&target_ty, &member, span, scope) {
                    return BoundNode::unresolved(span);
                }
            }
        }

        let mut node = BoundNode::new(kind, Some(ty)).with_children(args).at(span);
        if let Some(target) = target {
            node = node.with_target(target);
        }
        node
    }

    /// Try each array-typed argument in turn as the element source of a
    /// multi-element call. `None` if no position makes a candidate applicable.
    fn multi_call(
        &self,
        name: &str,
        candidates: &[Arc<OpenMethod>],
        arg_types: &[Arc<OpenClass>],
    ) -> Option<Result<BoundCall, DispatchError>> {
        for (position, ty) in arg_types.iter().enumerate() {
            let Some(component) = ty.component() else {
                continue;
            };
            let mut element_types = arg_types.to_vec();
            element_types[position] = Arc::clone(component);
            match dispatch::resolve(name, candidates, &element_types, self.resolver.as_ref()) {
                Ok(selected) => {
                    let method = Arc::clone(&selected.method);
                    let ty = self.registry.array_of(method.return_type());
                    let kind = NodeKind::MultiCall {
                        method: selected.method,
                        casts: selected.casts,
                        array_arg: position,
                        parallel: self.options.parallel_multicall,
                    };
                    return Some(Ok((kind, ty, method)));
                }
                Err(err @ DispatchError::Ambiguous { .. }) => return Some(Err(err)),
                Err(DispatchError::NoApplicable { .. }) => {}
            }
        }
        None
    }
}

/// Node kind, result type and selected method of a bound call.
type BoundCall = (NodeKind, Arc<OpenClass>, Arc<OpenMethod>);

/// Drop methods hidden by a same-signature declaration nearer to the
/// receiver type. `methods` lists the nearest declarations first.
fn visible_methods(methods: Vec<Arc<OpenMethod>>) -> Vec<Arc<OpenMethod>> {
    let mut visible: Vec<Arc<OpenMethod>> = Vec::with_capacity(methods.len());
    for method in methods {
        let hidden = visible.iter().any(|v| {
            v.same_signature(&method) && v.declaring_class() != method.declaring_class()
        });
        if !hidden {
            visible.push(method);
        }
    }
    visible
}
