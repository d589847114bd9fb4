use std::fmt;
use std::sync::Arc;

use super::class::Primitive;
use super::value::Value;

/// Distance constants. Lower is a more natural conversion.
pub mod distance {
    /// One superclass hop; each further hop adds one.
    pub const UPCAST: u32 = 1;
    /// One step up `int -> long -> double`; each further step adds one.
    pub const WIDENING: u32 = 2;
    pub const BOXING: u32 = 5;
    pub const UNBOXING: u32 = 6;
    pub const NARROWING: u32 = 10;
}

/// Host-defined conversion function for [`OpenCast::Custom`].
pub type ConvertFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// A conversion supplied by a host through [`CastTable`](super::resolver::CastTable).
#[derive(Clone)]
pub struct CustomCast {
    name: String,
    distance: u32,
    implicit: bool,
    convert: ConvertFn,
}

impl CustomCast {
    pub fn new(
        name: &str,
        distance: u32,
        implicit: bool,
        convert: impl Fn(Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_owned(),
            distance,
            implicit,
            convert: Arc::new(convert),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for CustomCast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomCast")
            .field("name", &self.name)
            .field("distance", &self.distance)
            .field("implicit", &self.implicit)
            .finish_non_exhaustive()
    }
}

/// A value conversion with a ranking distance.
///
/// Atomic casts capture their endpoint types when a resolver produces them,
/// so [`distance()`](Self::distance) needs no arguments. A
/// [`Linkage`](Self::Linkage) composes casts applied left to right.
#[derive(Debug, Clone)]
pub enum OpenCast {
    /// `int -> Integer`. The representation is shared, so values pass through.
    Boxing(Primitive),
    /// `Integer -> int`. Values pass through.
    Unboxing(Primitive),
    Widening {
        from: Primitive,
        to: Primitive,
    },
    /// Lossy primitive conversion. Never implicit.
    Narrowing {
        from: Primitive,
        to: Primitive,
    },
    /// Reference conversion to a superclass `depth` hops up.
    Upcast {
        depth: u32,
    },
    Custom(CustomCast),
    Linkage(Vec<OpenCast>),
}

impl OpenCast {
    /// Compose casts into a linkage applied in the given order.
    #[must_use]
    pub fn linkage(casts: Vec<OpenCast>) -> OpenCast {
        debug_assert!(!casts.is_empty(), "a linkage needs at least one cast");
        OpenCast::Linkage(casts)
    }

    /// `self` followed by `next`.
    #[must_use]
    pub fn then(self, next: OpenCast) -> OpenCast {
        match self {
            OpenCast::Linkage(mut casts) => {
                casts.push(next);
                OpenCast::Linkage(casts)
            }
            first => OpenCast::Linkage(vec![first, next]),
        }
    }

    /// Apply the conversion.
    ///
    /// A linkage maps `Null` to `Null` without consulting its components.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn convert(&self, value: Value) -> Value {
        match self {
            OpenCast::Boxing(_) | OpenCast::Unboxing(_) | OpenCast::Upcast { .. } => value,
            OpenCast::Widening { to, .. } => match (to, value) {
                (Primitive::Double, Value::Int(v)) => Value::Float(v as f64),
                (_, other) => other,
            },
            OpenCast::Narrowing { to, .. } => match (to, value) {
                (Primitive::Int, Value::Float(v)) => Value::Int(i64::from(v as i32)),
                (Primitive::Long, Value::Float(v)) => Value::Int(v as i64),
                (Primitive::Int, Value::Int(v)) => Value::Int(i64::from(v as i32)),
                (_, other) => other,
            },
            OpenCast::Custom(custom) => (custom.convert)(value),
            OpenCast::Linkage(casts) => {
                if value.is_null() {
                    return Value::Null;
                }
                casts.iter().fold(value, |acc, cast| cast.convert(acc))
            }
        }
    }

    /// Ranking distance. A linkage ranks as its worst component, not the
    /// sum of its components.
    #[must_use]
    pub fn distance(&self) -> u32 {
        match self {
            OpenCast::Boxing(_) => distance::BOXING,
            OpenCast::Unboxing(_) => distance::UNBOXING,
            OpenCast::Widening { from, to } => {
                let steps = match (from.widening_rank(), to.widening_rank()) {
                    (Some(a), Some(b)) if b > a => b - a,
                    _ => 1,
                };
                distance::WIDENING + steps - 1
            }
            OpenCast::Narrowing { .. } => distance::NARROWING,
            OpenCast::Upcast { depth } => distance::UPCAST + depth.saturating_sub(1),
            OpenCast::Custom(custom) => custom.distance,
            OpenCast::Linkage(casts) => casts.iter().map(OpenCast::distance).max().unwrap_or(0),
        }
    }

    /// Whether the conversion may be applied without explicit syntax.
    /// Linkages are never implicit, whatever their components declare.
    #[must_use]
    pub fn is_implicit(&self) -> bool {
        match self {
            OpenCast::Boxing(_)
            | OpenCast::Unboxing(_)
            | OpenCast::Widening { .. }
            | OpenCast::Upcast { .. } => true,
            OpenCast::Narrowing { .. } | OpenCast::Linkage(_) => false,
            OpenCast::Custom(custom) => custom.implicit,
        }
    }
}

impl fmt::Display for OpenCast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenCast::Boxing(p) => write!(f, "box({})", p.name()),
            OpenCast::Unboxing(p) => write!(f, "unbox({})", p.boxed_name()),
            OpenCast::Widening { from, to } => write!(f, "widen({} -> {})", from.name(), to.name()),
            OpenCast::Narrowing { from, to } => {
                write!(f, "narrow({} -> {})", from.name(), to.name())
            }
            OpenCast::Upcast { depth } => write!(f, "upcast({depth})"),
            OpenCast::Custom(custom) => write!(f, "{}", custom.name),
            OpenCast::Linkage(casts) => {
                write!(f, "linkage[")?;
                for (i, cast) in casts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " -> ")?;
                    }
                    write!(f, "{cast}")?;
                }
                write!(f, "]")
            }
        }
    }
}
