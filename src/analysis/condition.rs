//! Threshold condition evaluation.
//!
//! Turns a value series into a breach mask. Missing samples never breach,
//! and neither do non-finite values that slipped through as `Some`.

use crate::model::{Condition, EQ_TOLERANCE, Operator};

/// Returns `true` if `value` satisfies `condition`.
pub fn holds(value: f64, condition: &Condition) -> bool {
    if !value.is_finite() {
        return false;
    }
    let t = condition.threshold;
    match condition.operator {
        Operator::Lt => value < t,
        Operator::Gt => value > t,
        Operator::Lte => value <= t,
        Operator::Gte => value >= t,
        Operator::Eq => (value - t).abs() < EQ_TOLERANCE,
    }
}

/// Evaluates `condition` over `values`, producing a mask of the same length.
pub fn evaluate(values: &[Option<f64>], condition: &Condition) -> Vec<bool> {
    values
        .iter()
        .map(|v| v.is_some_and(|v| holds(v, condition)))
        .collect()
}
