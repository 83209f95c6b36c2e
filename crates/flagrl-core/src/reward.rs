//! Reward and speedup from execution costs.

use crate::error::CoreError;

/// Reward for moving from cost `before` to cost `after`: `ln(before / after)`.
///
/// Positive when the program got faster, negative when it got slower and
/// zero when unchanged. Computed as a difference of logarithms so that
/// `speedup_reward(a, b) == -speedup_reward(b, a)` holds exactly.
pub fn speedup_reward(before: f64, after: f64) -> Result<f64, CoreError> {
    if !valid_cost(before) || !valid_cost(after) {
        return Err(CoreError::InvalidCost { before, after });
    }
    Ok(before.ln() - after.ln())
}

/// Plain speedup ratio `before / after` used for evaluation reports.
pub fn speedup(before: f64, after: f64) -> Result<f64, CoreError> {
    if !valid_cost(before) || !valid_cost(after) {
        return Err(CoreError::InvalidCost { before, after });
    }
    Ok(before / after)
}

fn valid_cost(cost: f64) -> bool {
    cost.is_finite() && cost > 0.0
}
