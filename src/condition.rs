//! Decision-table condition casting.
//!
//! A condition compares a table input against row cells typed by the
//! condition's parameter type. When the two types differ, exactly one side is
//! converted, chosen with a fixed precedence.

use crate::types::{CastResolver, OpenCast, OpenClass};
use crate::Value;

/// Conversion plan for one decision-table condition.
///
/// The enum makes "both sides converted" unrepresentable. [`ConditionCasts::None`]
/// carries no data, so every condition that needs no conversion shares it
/// without allocating.
#[derive(Debug, Clone, Default)]
pub enum ConditionCasts {
    #[default]
    None,
    /// Convert condition cells into the input type.
    ToInput(OpenCast),
    /// Convert the input value into the condition parameter type.
    ToCondition(OpenCast),
}

impl ConditionCasts {
    #[must_use]
    pub fn cast_to_input_type(&self) -> Option<&OpenCast> {
        match self {
            ConditionCasts::ToInput(cast) => Some(cast),
            _ => None,
        }
    }

    #[must_use]
    pub fn cast_to_condition_type(&self) -> Option<&OpenCast> {
        match self {
            ConditionCasts::ToCondition(cast) => Some(cast),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, ConditionCasts::None)
    }

    /// Apply the input-side conversion, if any.
    #[must_use]
    pub fn convert_input(&self, value: Value) -> Value {
        match self {
            ConditionCasts::ToCondition(cast) => cast.convert(value),
            _ => value,
        }
    }

    /// Apply the cell-side conversion, if any.
    #[must_use]
    pub fn convert_condition(&self, value: Value) -> Value {
        match self {
            ConditionCasts::ToInput(cast) => cast.convert(value),
            _ => value,
        }
    }
}

/// Decide how a condition of `condition_type` is matched against an input of
/// `input_type`.
///
/// Precedence: an implicit `input -> condition` cast, then an implicit
/// `condition -> input` cast, then no conversion. Non-implicit casts are
/// treated as absent.
#[must_use]
pub fn find_condition_casts(
    condition_type: &OpenClass,
    input_type: &OpenClass,
    resolver: &dyn CastResolver,
) -> ConditionCasts {
    if condition_type == input_type {
        return ConditionCasts::None;
    }
    if let Some(cast) = resolver.lookup_implicit_cast(input_type, condition_type) {
        return ConditionCasts::ToCondition(cast);
    }
    if let Some(cast) = resolver.lookup_implicit_cast(condition_type, input_type) {
        return ConditionCasts::ToInput(cast);
    }
    ConditionCasts::None
}
