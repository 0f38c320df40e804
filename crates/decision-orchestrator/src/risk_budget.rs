/// Drawdown tiers, deepest first: (drawdown at or above, budget multiplier).
const DRAWDOWN_TIERS: [(f64, f64); 4] = [(0.20, 0.2), (0.15, 0.4), (0.10, 0.6), (0.05, 0.8)];

pub const MIN_RISK_BUDGET: f64 = 0.1;
pub const MAX_RISK_BUDGET: f64 = 1.0;

/// Step multiplier for the current fractional drawdown (0.12 = 12%).
pub fn drawdown_multiplier(drawdown: f64) -> f64 {
    DRAWDOWN_TIERS
        .iter()
        .find(|(threshold, _)| drawdown >= *threshold)
        .map(|(_, multiplier)| *multiplier)
        .unwrap_or(1.0)
}

/// Risk budget for the cycle: the drawdown step scaled by the regime's risk
/// posture, clamped to `[MIN_RISK_BUDGET, MAX_RISK_BUDGET]`.
pub fn risk_budget(drawdown: f64, risk_posture: f64) -> f64 {
    let posture = if risk_posture.is_finite() { risk_posture } else { 0.0 };
    (drawdown_multiplier(drawdown) * posture).clamp(MIN_RISK_BUDGET, MAX_RISK_BUDGET)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_tiers_at_boundaries() {
        assert_relative_eq!(drawdown_multiplier(0.0), 1.0);
        assert_relative_eq!(drawdown_multiplier(0.049), 1.0);
        assert_relative_eq!(drawdown_multiplier(0.05), 0.8);
        assert_relative_eq!(drawdown_multiplier(0.10), 0.6);
        assert_relative_eq!(drawdown_multiplier(0.15), 0.4);
        assert_relative_eq!(drawdown_multiplier(0.20), 0.2);
        assert_relative_eq!(drawdown_multiplier(0.65), 0.2);
    }

    #[test]
    fn test_budget_is_monotone_in_drawdown() {
        for posture in [0.3, 0.7, 1.0] {
            let budgets: Vec<f64> = [0.0, 0.05, 0.10, 0.15, 0.20]
                .iter()
                .map(|dd| risk_budget(*dd, posture))
                .collect();
            for pair in budgets.windows(2) {
                assert!(pair[1] <= pair[0], "budget rose with drawdown: {:?}", budgets);
            }
        }
    }

    #[test]
    fn test_budget_clamped() {
        assert_relative_eq!(risk_budget(0.25, 0.3), MIN_RISK_BUDGET);
        assert_relative_eq!(risk_budget(0.0, 1.7), MAX_RISK_BUDGET);
        assert_relative_eq!(risk_budget(0.0, f64::NAN), MIN_RISK_BUDGET);
        assert_relative_eq!(risk_budget(0.12, 1.0), 0.6);
    }
}
