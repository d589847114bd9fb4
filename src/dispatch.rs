//! Overload resolution ranked by implicit-cast distance.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::env::{RuntimeContext, RuntimeEnv};
use crate::error::EvalError;
use crate::types::{
    CastResolver, DispatchError, MethodBody, OpenCast, OpenClass, OpenMethod,
};
use crate::Value;

/// The winning candidate with the conversions its arguments need.
#[derive(Debug, Clone)]
pub struct Selected {
    pub method: Arc<OpenMethod>,
    /// One entry per argument; `None` where the argument is assignable as is.
    pub casts: Vec<Option<OpenCast>>,
    /// Worst per-argument distance.
    pub rank: u32,
}

impl Selected {
    /// Convert evaluated arguments to the selected parameter types.
    #[must_use]
    pub fn apply(&self, args: Vec<Value>) -> Vec<Value> {
        convert_args(&self.casts, args)
    }
}

pub(crate) fn convert_args(casts: &[Option<OpenCast>], args: Vec<Value>) -> Vec<Value> {
    args.into_iter()
        .zip(casts.iter().chain(std::iter::repeat(&None)))
        .map(|(value, cast)| match cast {
            Some(cast) => cast.convert(value),
            None => value,
        })
        .collect()
}

/// Per-argument casts and rank of `method` for `args`, or `None` if some
/// argument has no implicit conversion to its parameter.
fn applicability(
    method: &OpenMethod,
    args: &[Arc<OpenClass>],
    resolver: &dyn CastResolver,
) -> Option<(Vec<Option<OpenCast>>, u32)> {
    if method.params().len() != args.len() {
        return None;
    }
    let mut rank = 0;
    let mut casts = Vec::with_capacity(args.len());
    for (param, actual) in method.params().iter().zip(args) {
        if param.is_assignable_from(actual) {
            casts.push(None);
        } else {
            let cast = resolver.lookup_implicit_cast(actual, param)?;
            rank = rank.max(cast.distance());
            casts.push(Some(cast));
        }
    }
    Some((casts, rank))
}

/// Select the candidate with the lowest rank for the actual argument types.
///
/// A candidate's rank is the maximum of its per-argument cast distances. A
/// tie at the minimum is reported, never broken arbitrarily.
///
/// # Errors
///
/// [`DispatchError::NoApplicable`] if no candidate applies,
/// [`DispatchError::Ambiguous`] naming every candidate tied at the minimum.
pub fn resolve(
    name: &str,
    candidates: &[Arc<OpenMethod>],
    args: &[Arc<OpenClass>],
    resolver: &dyn CastResolver,
) -> Result<Selected, DispatchError> {
    let mut best: Vec<Selected> = Vec::new();
    for candidate in candidates {
        let Some((casts, rank)) = applicability(candidate, args, resolver) else {
            continue;
        };
        let current = best.first().map(|s| s.rank);
        if current.is_none_or(|r| rank < r) {
            best.clear();
        } else if current.is_some_and(|r| rank > r) {
            continue;
        }
        best.push(Selected {
            method: Arc::clone(candidate),
            casts,
            rank,
        });
    }

    match best.len() {
        0 => Err(DispatchError::NoApplicable {
            name: name.to_owned(),
            arguments: args.iter().map(|a| a.name().to_owned()).collect(),
        }),
        1 => Ok(best.remove(0)),
        _ => Err(DispatchError::Ambiguous {
            name: name.to_owned(),
            candidates: best
                .iter()
                .map(|s| s.method.member_ref().to_string())
                .collect(),
        }),
    }
}

/// Predicate deciding whether a candidate is eligible for an invocation.
pub type CandidatePredicate = Arc<dyn Fn(&OpenMethod, &RuntimeContext) -> bool + Send + Sync>;

/// Default predicate: every property the method declares must be absent
/// from the context or equal to the context's value.
#[must_use]
pub fn match_properties(method: &OpenMethod, context: &RuntimeContext) -> bool {
    method
        .properties()
        .iter()
        .all(|(key, value)| context.get(key).is_none_or(|v| v == value))
}

/// Dispatcher over redundant implementations of one logical signature,
/// re-resolved on every invocation.
///
/// Candidates are first narrowed by an instance predicate against the
/// invocation's [`RuntimeContext`], then ranked by [`resolve`].
#[derive(Clone)]
pub struct MatchingDispatcher {
    name: String,
    params: Vec<Arc<OpenClass>>,
    candidates: Vec<Arc<OpenMethod>>,
    resolver: Arc<dyn CastResolver>,
    predicate: CandidatePredicate,
}

impl MatchingDispatcher {
    /// The declared signature is taken from the first candidate.
    #[must_use]
    pub fn new(candidates: Vec<Arc<OpenMethod>>, resolver: Arc<dyn CastResolver>) -> Self {
        let (name, params) = candidates
            .first()
            .map(|m| (m.name().to_owned(), m.params().to_vec()))
            .unwrap_or_default();
        Self {
            name,
            params,
            candidates,
            resolver,
            predicate: Arc::new(match_properties),
        }
    }

    #[must_use]
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&OpenMethod, &RuntimeContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    #[must_use]
    pub fn candidates(&self) -> &[Arc<OpenMethod>] {
        &self.candidates
    }

    /// Narrow and rank the candidates for one invocation.
    ///
    /// # Errors
    ///
    /// As [`resolve`], over the narrowed candidates.
    pub fn select(&self, context: &RuntimeContext) -> Result<Selected, DispatchError> {
        let narrowed: Vec<Arc<OpenMethod>> = self
            .candidates
            .iter()
            .filter(|m| (self.predicate)(m, context))
            .cloned()
            .collect();
        trace!(
            name = %self.name,
            total = self.candidates.len(),
            narrowed = narrowed.len(),
            "matching dispatch"
        );
        resolve(&self.name, &narrowed, &self.params, self.resolver.as_ref())
    }

    /// # Errors
    ///
    /// [`EvalError::Dispatch`] if selection fails, otherwise whatever the
    /// selected implementation returns.
    pub fn invoke(
        &self,
        target: Option<&Value>,
        args: Vec<Value>,
        env: &mut RuntimeEnv,
    ) -> Result<Value, EvalError> {
        let selected = self.select(env.context())?;
        let args = selected.apply(args);
        selected.method.invoke(target, args, env)
    }

    /// Merge methods that share a name and parameter list into single
    /// dispatching methods. Unique signatures pass through unchanged; order of
    /// first appearance is kept.
    #[must_use]
    pub fn group(
        methods: Vec<Arc<OpenMethod>>,
        resolver: &Arc<dyn CastResolver>,
    ) -> Vec<Arc<OpenMethod>> {
        let mut groups: Vec<Vec<Arc<OpenMethod>>> = Vec::new();
        for method in methods {
            match groups.iter_mut().find(|g| g[0].same_signature(&method)) {
                Some(group) => group.push(method),
                None => groups.push(vec![method]),
            }
        }
        groups
            .into_iter()
            .map(|mut group| {
                if group.len() == 1 {
                    return group.remove(0);
                }
                let first = Arc::clone(&group[0]);
                let dispatcher = MatchingDispatcher::new(group, Arc::clone(resolver));
                Arc::new(OpenMethod::with_body(
                    first.name(),
                    first.declaring_class(),
                    first.params().to_vec(),
                    Arc::clone(first.return_type()),
                    MethodBody::Dispatch(dispatcher),
                ))
            })
            .collect()
    }
}

impl fmt::Debug for MatchingDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let candidates: Vec<String> = self
            .candidates
            .iter()
            .map(|m| m.member_ref().to_string())
            .collect();
        f.debug_struct("MatchingDispatcher")
            .field("name", &self.name)
            .field("candidates", &candidates)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CastTable, CustomCast, StandardCasts, TypeRegistry};

    fn method(
        reg: &TypeRegistry,
        class: &str,
        name: &str,
        params: &[&str],
        tag: i64,
    ) -> Arc<OpenMethod> {
        let params = params.iter().map(|p| reg.get(p).unwrap()).collect();
        Arc::new(OpenMethod::native(
            name,
            class,
            params,
            reg.get("int").unwrap(),
            move |_, _, _| Ok(Value::Int(tag)),
        ))
    }

    fn types(reg: &TypeRegistry, names: &[&str]) -> Vec<Arc<OpenClass>> {
        names.iter().map(|n| reg.get(n).unwrap()).collect()
    }

    fn cast(distance: u32) -> OpenCast {
        OpenCast::Custom(CustomCast::new("c", distance, true, |v| v))
    }

    #[test]
    fn lower_distance_wins() {
        let reg = TypeRegistry::new();
        let table = CastTable::new()
            .with("Integer", "int", cast(1))
            .with("Integer", "double", cast(3));
        let candidates = vec![
            method(&reg, "M", "f", &["double"], 2),
            method(&reg, "M", "f", &["int"], 1),
        ];
        let selected = resolve("f", &candidates, &types(&reg, &["Integer"]), &table).unwrap();
        assert_eq!(selected.method.signature(), "f(int)");
        assert_eq!(selected.rank, 1);
    }

    #[test]
    fn exact_match_beats_any_conversion() {
        let reg = TypeRegistry::new();
        let casts = StandardCasts::new(&reg);
        let candidates = vec![
            method(&reg, "M", "f", &["long"], 1),
            method(&reg, "M", "f", &["int"], 2),
            method(&reg, "M", "f", &["double"], 3),
        ];
        let selected = resolve("f", &candidates, &types(&reg, &["int"]), &casts).unwrap();
        assert_eq!(selected.method.signature(), "f(int)");
        assert_eq!(selected.rank, 0);
        assert!(selected.casts.iter().all(Option::is_none));
    }

    #[test]
    fn tie_is_ambiguous_and_names_both() {
        let reg = TypeRegistry::new();
        let table = CastTable::new()
            .with("Integer", "int", cast(2))
            .with("Integer", "long", cast(2));
        let candidates = vec![
            method(&reg, "M", "f", &["int"], 1),
            method(&reg, "M", "f", &["long"], 2),
        ];
        let err = resolve("f", &candidates, &types(&reg, &["Integer"]), &table).unwrap_err();
        assert_eq!(
            err,
            DispatchError::Ambiguous {
                name: "f".into(),
                candidates: vec!["M.f(int)".into(), "M.f(long)".into()],
            }
        );
    }

    #[test]
    fn rank_is_max_of_argument_distances() {
        let reg = TypeRegistry::new();
        let table = CastTable::new()
            .with("Integer", "int", cast(1))
            .with("Integer", "long", cast(4))
            .with("Double", "double", cast(3));
        // f(int, double): max(1, 3) = 3; f(long, double): max(4, 3) = 4.
        let candidates = vec![
            method(&reg, "M", "f", &["long", "double"], 1),
            method(&reg, "M", "f", &["int", "double"], 2),
        ];
        let selected =
            resolve("f", &candidates, &types(&reg, &["Integer", "Double"]), &table).unwrap();
        assert_eq!(selected.method.signature(), "f(int, double)");
        assert_eq!(selected.rank, 3);
    }

    #[test]
    fn candidates_missing_a_cast_are_excluded() {
        let reg = TypeRegistry::new();
        let casts = StandardCasts::new(&reg);
        let candidates = vec![
            method(&reg, "M", "f", &["String"], 1),
            method(&reg, "M", "f", &["int", "int"], 2),
        ];
        let err = resolve("f", &candidates, &types(&reg, &["int"]), &casts).unwrap_err();
        assert_eq!(
            err,
            DispatchError::NoApplicable {
                name: "f".into(),
                arguments: vec!["int".into()],
            }
        );
    }

    #[test]
    fn non_implicit_casts_do_not_apply() {
        let reg = TypeRegistry::new();
        let casts = StandardCasts::new(&reg);
        let candidates = vec![method(&reg, "M", "f", &["int"], 1)];
        assert!(resolve("f", &candidates, &types(&reg, &["double"]), &casts).is_err());
    }

    #[test]
    fn selected_applies_casts() {
        let reg = TypeRegistry::new();
        let casts = StandardCasts::new(&reg);
        let candidates = vec![method(&reg, "M", "f", &["double"], 1)];
        let selected = resolve("f", &candidates, &types(&reg, &["int"]), &casts).unwrap();
        assert_eq!(selected.apply(vec![Value::Int(2)]), vec![Value::Float(2.0)]);
    }

    #[test]
    fn matching_dispatcher_narrows_by_context() {
        let reg = TypeRegistry::new();
        let resolver: Arc<dyn CastResolver> = Arc::new(StandardCasts::new(&reg));
        let eu = Arc::new(
            (*method(&reg, "EuRules", "rate", &["int"], 10))
                .clone()
                .with_property("region", "EU"),
        );
        let us = Arc::new(
            (*method(&reg, "UsRules", "rate", &["int"], 20))
                .clone()
                .with_property("region", "US"),
        );
        let grouped = MatchingDispatcher::group(vec![eu, us], &resolver);
        assert_eq!(grouped.len(), 1);
        let rate = &grouped[0];
        assert!(matches!(rate.body(), MethodBody::Dispatch(_)));

        let mut env = RuntimeEnv::new().with_context(RuntimeContext::new().set("region", "US"));
        assert_eq!(rate.invoke(None, vec![Value::Int(1)], &mut env).unwrap(), Value::Int(20));

        env.context_mut().insert("region", Value::from("EU"));
        assert_eq!(rate.invoke(None, vec![Value::Int(1)], &mut env).unwrap(), Value::Int(10));
    }

    #[test]
    fn matching_dispatcher_reports_unnarrowed_ties() {
        let reg = TypeRegistry::new();
        let resolver: Arc<dyn CastResolver> = Arc::new(StandardCasts::new(&reg));
        let a = method(&reg, "A", "rate", &["int"], 1);
        let b = method(&reg, "B", "rate", &["int"], 2);
        let grouped = MatchingDispatcher::group(vec![a, b], &resolver);
        let mut env = RuntimeEnv::new();
        let err = grouped[0].invoke(None, vec![Value::Int(1)], &mut env).unwrap_err();
        assert!(matches!(err, EvalError::Dispatch(DispatchError::Ambiguous { .. })));
    }

    #[test]
    fn custom_predicate_replaces_property_matching() {
        let reg = TypeRegistry::new();
        let resolver: Arc<dyn CastResolver> = Arc::new(StandardCasts::new(&reg));
        let a = method(&reg, "A", "rate", &["int"], 1);
        let b = method(&reg, "B", "rate", &["int"], 2);
        let dispatcher = MatchingDispatcher::new(vec![a, b], resolver)
            .with_predicate(|m, _| m.declaring_class() == "B");
        let selected = dispatcher.select(&RuntimeContext::new()).unwrap();
        assert_eq!(selected.method.declaring_class(), "B");
        assert_eq!(dispatcher.candidates().len(), 2);
    }

    #[test]
    fn group_keeps_distinct_signatures() {
        let reg = TypeRegistry::new();
        let resolver: Arc<dyn CastResolver> = Arc::new(StandardCasts::new(&reg));
        let grouped = MatchingDispatcher::group(
            vec![
                method(&reg, "A", "f", &["int"], 1),
                method(&reg, "A", "f", &["double"], 2),
                method(&reg, "A", "g", &["int"], 3),
            ],
            &resolver,
        );
        assert_eq!(grouped.len(), 3);
        assert!(grouped
            .iter()
            .all(|m| matches!(m.body(), MethodBody::Native(_))));
    }

    #[test]
    fn property_match_ignores_undefined_context_keys() {
        let reg = TypeRegistry::new();
        let m = (*method(&reg, "A", "f", &[], 1))
            .clone()
            .with_property("lob", "auto");
        assert!(match_properties(&m, &RuntimeContext::new()));
        assert!(match_properties(&m, &RuntimeContext::new().set("lob", "auto")));
        assert!(!match_properties(&m, &RuntimeContext::new().set("lob", "home")));
    }
}
