//! # Score Aggregation
//!
//! Collapses an analyzer's per-component scores into one aggregate and
//! turns the aggregate into a verdict. Components the analyzer did not
//! return are excluded and the remaining weights renormalized, so a
//! partial analysis still produces a comparable aggregate.

use crate::config::ScoringConfig;
use crate::error::{AppError, AppResult};
use crate::session::model::Verdict;
use std::collections::BTreeMap;

/// Weighted aggregate over the components present in both the analysis
/// and the configured weights.
///
/// Every component value must be in `[0, 1]`; anything else is an
/// `InvalidScore` and the caller falls back to the degraded path
/// rather than recording a corrupt aggregate.
pub fn aggregate_score(
    components: &BTreeMap<String, f64>,
    config: &ScoringConfig,
) -> AppResult<f64> {
    for (name, value) in components {
        if !(0.0..=1.0).contains(value) || !value.is_finite() {
            return Err(AppError::InvalidScore(format!(
                "component '{}' is {}, expected [0, 1]",
                name, value
            )));
        }
    }

    let present: Vec<(&str, f64, f64)> = components
        .iter()
        .filter_map(|(name, value)| {
            config
                .weights
                .get(name)
                .map(|w| (name.as_str(), *value, *w))
        })
        .collect();

    let weight_sum: f64 = present.iter().map(|(_, _, w)| w).sum();
    if present.is_empty() || weight_sum <= 0.0 {
        return Err(AppError::InvalidScore(
            "analysis contained no weighted components".to_string(),
        ));
    }

    let aggregate: f64 = present
        .iter()
        .map(|(_, value, weight)| value * (weight / weight_sum))
        .sum();

    // Renormalized weighted mean of in-range values; clamp only guards
    // float rounding at the edges.
    Ok(aggregate.clamp(0.0, 1.0))
}

/// Verdict for a scored answer.
///
/// An analyzer recommendation to end the interview is honored only
/// once `progress` (answered / total quota) has reached the configured
/// minimum; before that the interview keeps going and the aggregate
/// bands decide.
pub fn verdict_for(
    aggregate: f64,
    recommend_end: bool,
    progress: f64,
    config: &ScoringConfig,
) -> Verdict {
    if recommend_end && progress >= config.min_progress_to_complete {
        return Verdict::Complete;
    }

    if aggregate >= config.drill_up_at {
        Verdict::DrillUp
    } else if aggregate < config.drill_down_below {
        Verdict::DrillDown
    } else {
        Verdict::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn components(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn test_full_component_aggregate() {
        let config = AppConfig::default().scoring;
        let scores = components(&[("correctness", 0.8), ("clarity", 0.7), ("depth", 0.65)]);

        // 0.5 * 0.8 + 0.3 * 0.7 + 0.2 * 0.65
        let aggregate = aggregate_score(&scores, &config).unwrap();
        assert!((aggregate - 0.74).abs() < 1e-9);
    }

    #[test]
    fn test_two_component_weighting() {
        let mut config = AppConfig::default().scoring;
        config.weights.clear();
        config.weights.insert("correctness".to_string(), 0.7);
        config.weights.insert("clarity".to_string(), 0.3);

        let scores = components(&[("correctness", 0.8), ("clarity", 0.6)]);
        let aggregate = aggregate_score(&scores, &config).unwrap();
        assert!((aggregate - 0.74).abs() < 1e-9);
    }

    #[test]
    fn test_missing_components_renormalize() {
        let config = AppConfig::default().scoring;
        let scores = components(&[("correctness", 0.8), ("clarity", 0.6)]);

        // Weights 0.5 and 0.3 renormalize to 0.625 and 0.375
        let aggregate = aggregate_score(&scores, &config).unwrap();
        assert!((aggregate - (0.8 * 0.625 + 0.6 * 0.375)).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_component_rejected() {
        let config = AppConfig::default().scoring;

        let scores = components(&[("correctness", 1.2)]);
        assert!(matches!(
            aggregate_score(&scores, &config),
            Err(AppError::InvalidScore(_))
        ));

        let scores = components(&[("correctness", -0.1)]);
        assert!(matches!(
            aggregate_score(&scores, &config),
            Err(AppError::InvalidScore(_))
        ));
    }

    #[test]
    fn test_unweighted_components_are_ignored() {
        let config = AppConfig::default().scoring;
        let scores = components(&[("correctness", 0.6), ("confidence", 1.0)]);

        let aggregate = aggregate_score(&scores, &config).unwrap();
        assert!((aggregate - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_no_weighted_components_is_invalid() {
        let config = AppConfig::default().scoring;
        let scores = components(&[("confidence", 0.9)]);
        assert!(matches!(
            aggregate_score(&scores, &config),
            Err(AppError::InvalidScore(_))
        ));
    }

    #[test]
    fn test_verdict_bands() {
        let config = AppConfig::default().scoring;

        assert_eq!(verdict_for(0.75, false, 0.0, &config), Verdict::DrillUp);
        assert_eq!(verdict_for(0.74, false, 0.0, &config), Verdict::Continue);
        assert_eq!(verdict_for(0.4, false, 0.0, &config), Verdict::Continue);
        assert_eq!(verdict_for(0.39, false, 0.0, &config), Verdict::DrillDown);
    }

    #[test]
    fn test_end_recommendation_gated_on_progress() {
        let config = AppConfig::default().scoring;

        // Below half the quota the recommendation is ignored
        assert_eq!(verdict_for(0.8, true, 0.4, &config), Verdict::DrillUp);
        // At or past the gate it completes
        assert_eq!(verdict_for(0.8, true, 0.5, &config), Verdict::Complete);
        assert_eq!(verdict_for(0.2, true, 0.9, &config), Verdict::Complete);
    }
}
