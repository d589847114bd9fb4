use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::cast::OpenCast;
use super::class::{ClassKind, OpenClass, Primitive, TypeRegistry};

/// Oracle answering "is there a conversion from `from` to `to`".
///
/// Binding, dispatch and decision-table compilation never discover
/// conversions themselves; they only ask a resolver.
pub trait CastResolver: Send + Sync {
    fn lookup_cast(&self, from: &OpenClass, to: &OpenClass) -> Option<OpenCast>;

    /// Like [`lookup_cast`](Self::lookup_cast), discarding non-implicit casts.
    fn lookup_implicit_cast(&self, from: &OpenClass, to: &OpenClass) -> Option<OpenCast> {
        self.lookup_cast(from, to).filter(OpenCast::is_implicit)
    }
}

impl<R: CastResolver + ?Sized> CastResolver for Arc<R> {
    fn lookup_cast(&self, from: &OpenClass, to: &OpenClass) -> Option<OpenCast> {
        (**self).lookup_cast(from, to)
    }
}

/// Conversions of the built-in type lattice.
///
/// | from → to | cast |
/// |---|---|
/// | `int → Integer` | boxing |
/// | `Integer → int` | unboxing |
/// | `int → long → double` | widening |
/// | `double → int` | narrowing (explicit) |
/// | subclass → superclass | upcast |
/// | `int → Number`, `Integer → double`, `int → Long` | linkage |
#[derive(Debug, Clone)]
pub struct StandardCasts {
    boxed: HashMap<Primitive, Arc<OpenClass>>,
}

impl StandardCasts {
    #[must_use]
    pub fn new(registry: &TypeRegistry) -> Self {
        let boxed = Primitive::ALL
            .into_iter()
            .filter_map(|p| registry.get(p.boxed_name()).map(|c| (p, c)))
            .collect();
        Self { boxed }
    }

    fn primitive_cast(from: Primitive, to: Primitive) -> Option<OpenCast> {
        let (a, b) = (from.widening_rank()?, to.widening_rank()?);
        match b.cmp(&a) {
            std::cmp::Ordering::Greater => Some(OpenCast::Widening { from, to }),
            std::cmp::Ordering::Less => Some(OpenCast::Narrowing { from, to }),
            std::cmp::Ordering::Equal => None,
        }
    }

    fn boxing_cast(&self, from: Primitive, to: &OpenClass) -> Option<OpenCast> {
        let boxed = self.boxed.get(&from)?;
        if boxed.as_ref() == to {
            return Some(OpenCast::Boxing(from));
        }
        let depth = boxed.depth_to(to)?;
        Some(OpenCast::Boxing(from).then(OpenCast::Upcast { depth }))
    }
}

impl CastResolver for StandardCasts {
    fn lookup_cast(&self, from: &OpenClass, to: &OpenClass) -> Option<OpenCast> {
        if from == to {
            return None;
        }
        match (from.kind(), to.kind()) {
            (ClassKind::Primitive(a), ClassKind::Primitive(b)) => Self::primitive_cast(a, b),
            (ClassKind::Primitive(a), ClassKind::Boxed(b)) if a != b => {
                Some(Self::primitive_cast(a, b)?.then(OpenCast::Boxing(b)))
            }
            (ClassKind::Primitive(a), _) => self.boxing_cast(a, to),
            (ClassKind::Boxed(a), ClassKind::Primitive(b)) => {
                if a == b {
                    Some(OpenCast::Unboxing(a))
                } else {
                    Some(OpenCast::Unboxing(a).then(Self::primitive_cast(a, b)?))
                }
            }
            (_, ClassKind::Primitive(_)) => None,
            _ => from.depth_to(to).map(|depth| OpenCast::Upcast { depth }),
        }
    }
}

/// Explicitly registered conversions, keyed by type names, with an optional
/// fallback resolver consulted for unregistered pairs.
#[derive(Default)]
pub struct CastTable {
    casts: HashMap<(String, String), OpenCast>,
    fallback: Option<Arc<dyn CastResolver>>,
}

impl CastTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn CastResolver>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    #[must_use]
    pub fn with(mut self, from: &str, to: &str, cast: OpenCast) -> Self {
        self.insert(from, to, cast);
        self
    }

    pub fn insert(&mut self, from: &str, to: &str, cast: OpenCast) {
        self.casts.insert((from.to_owned(), to.to_owned()), cast);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.casts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.casts.is_empty()
    }
}

impl CastResolver for CastTable {
    fn lookup_cast(&self, from: &OpenClass, to: &OpenClass) -> Option<OpenCast> {
        let key = (from.name().to_owned(), to.name().to_owned());
        if let Some(cast) = self.casts.get(&key) {
            return Some(cast.clone());
        }
        self.fallback.as_ref()?.lookup_cast(from, to)
    }
}

impl fmt::Debug for CastTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CastTable")
            .field("casts", &self.casts)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::cast::{distance, CustomCast};
    use crate::Value;

    fn setup() -> (TypeRegistry, StandardCasts) {
        let reg = TypeRegistry::new();
        let casts = StandardCasts::new(&reg);
        (reg, casts)
    }

    fn lookup(
        reg: &TypeRegistry,
        casts: &dyn CastResolver,
        from: &str,
        to: &str,
    ) -> Option<OpenCast> {
        casts.lookup_cast(&reg.get(from).unwrap(), &reg.get(to).unwrap())
    }

    #[test]
    fn identical_types_have_no_cast() {
        let (reg, casts) = setup();
        assert!(lookup(&reg, &casts, "int", "int").is_none());
        assert!(lookup(&reg, &casts, "String", "String").is_none());
    }

    #[test]
    fn boxing_and_unboxing() {
        let (reg, casts) = setup();
        assert!(matches!(
            lookup(&reg, &casts, "int", "Integer"),
            Some(OpenCast::Boxing(Primitive::Int))
        ));
        assert!(matches!(
            lookup(&reg, &casts, "Integer", "int"),
            Some(OpenCast::Unboxing(Primitive::Int))
        ));
    }

    #[test]
    fn widening_and_narrowing() {
        let (reg, casts) = setup();
        let widen = lookup(&reg, &casts, "int", "double").unwrap();
        assert!(widen.is_implicit());
        assert_eq!(widen.distance(), distance::WIDENING + 1);
        let narrow = lookup(&reg, &casts, "double", "int").unwrap();
        assert!(!narrow.is_implicit());
        assert!(lookup(&reg, &casts, "boolean", "int").is_none());
    }

    #[test]
    fn upcast_along_hierarchy() {
        let (reg, casts) = setup();
        let cast = lookup(&reg, &casts, "Integer", "Object").unwrap();
        assert!(matches!(cast, OpenCast::Upcast { depth: 2 }));
        assert!(lookup(&reg, &casts, "Object", "Integer").is_none());
        assert!(matches!(
            lookup(&reg, &casts, "int[]", "Object"),
            Some(OpenCast::Upcast { depth: 1 })
        ));
    }

    #[test]
    fn multi_step_conversions_are_linkages() {
        let (reg, casts) = setup();
        for (from, to) in [("int", "Number"), ("Integer", "double"), ("int", "Long")] {
            let cast = lookup(&reg, &casts, from, to).unwrap();
            assert!(matches!(cast, OpenCast::Linkage(_)), "{from} -> {to}: {cast}");
            assert!(!cast.is_implicit());
            assert!(casts
                .lookup_implicit_cast(&reg.get(from).unwrap(), &reg.get(to).unwrap())
                .is_none());
        }
        let unbox_widen = lookup(&reg, &casts, "Integer", "double").unwrap();
        assert_eq!(unbox_widen.convert(Value::Int(4)), Value::Float(4.0));
        assert_eq!(unbox_widen.distance(), distance::UNBOXING);
    }

    #[test]
    fn cast_table_prefers_registered_then_falls_back() {
        let (reg, casts) = setup();
        let table = CastTable::new()
            .with(
                "String",
                "int",
                OpenCast::Custom(CustomCast::new("parse", 8, false, |v| match v {
                    Value::String(s) => s.parse::<i64>().map_or(Value::Null, Value::Int),
                    other => other,
                })),
            )
            .with_fallback(Arc::new(casts));
        assert_eq!(table.len(), 1);
        let parse = lookup(&reg, &table, "String", "int").unwrap();
        assert_eq!(parse.convert(Value::from("42")), Value::Int(42));
        assert!(lookup(&reg, &table, "int", "Integer").is_some());
        assert!(lookup(&reg, &CastTable::new(), "int", "Integer").is_none());
    }
}
