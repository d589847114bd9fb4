mod cast;
mod class;
mod error;
mod member;
mod resolver;
mod syntax;
mod value;

pub use cast::{distance, ConvertFn, CustomCast, OpenCast};
pub use class::{ClassKind, OpenClass, Primitive, TypeRegistry, NULL_TYPE};
pub use error::{BindError, CompileError, Diagnostic, DispatchError, Severity};
pub use member::{MemberKind, MemberRef, MethodBody, NativeFn, OpenField, OpenMethod};
pub use resolver::{CastResolver, CastTable, StandardCasts};
pub use syntax::{Span, SyntaxKind, SyntaxNode};
pub use value::{CompareOp, ObjectValue, Value};
