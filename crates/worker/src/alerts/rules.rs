//! Alert rules as pure functions over recent values.

use monitor_core::{AlertType, IndexType, Severity, Trigger};
use serde::{Deserialize, Serialize};

/// Standard deviations below this are treated as a flat series.
const FLAT_STD: f64 = 1e-9;

/// Rule thresholds. Tunable heuristics, not agronomic truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRules {
    /// Index the rules read
    #[serde(default = "default_rule_index")]
    pub rule_index: IndexType,
    /// Days before the latest observation forming the decline baseline
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default = "default_min_baseline_samples")]
    pub min_baseline_samples: usize,
    /// Percent drop below baseline raising a medium decline
    #[serde(default = "default_decline_pct")]
    pub decline_pct: f64,
    /// Percent drop below baseline raising a high decline
    #[serde(default = "default_decline_high_pct")]
    pub decline_high_pct: f64,
    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,
    #[serde(default = "default_sustained_low_count")]
    pub sustained_low_count: usize,
    #[serde(default = "default_low_floor")]
    pub low_floor: f64,
    /// Consecutive weekly points inspected for drought
    #[serde(default = "default_drought_weeks")]
    pub drought_weeks: usize,
    #[serde(default = "default_drought_floor")]
    pub drought_floor: f64,
    /// Weekly slope (index units per week) steeper than this is high severity
    #[serde(default = "default_drought_steep_slope")]
    pub drought_steep_slope: f64,
}

fn default_rule_index() -> IndexType {
    IndexType::Ndvi
}

fn default_window_days() -> u32 {
    30
}

fn default_min_baseline_samples() -> usize {
    5
}

fn default_decline_pct() -> f64 {
    15.0
}

fn default_decline_high_pct() -> f64 {
    30.0
}

fn default_z_threshold() -> f64 {
    2.0
}

fn default_sustained_low_count() -> usize {
    14
}

fn default_low_floor() -> f64 {
    0.3
}

fn default_drought_weeks() -> usize {
    3
}

fn default_drought_floor() -> f64 {
    0.4
}

fn default_drought_steep_slope() -> f64 {
    0.03
}

impl Default for AlertRules {
    fn default() -> Self {
        Self {
            rule_index: default_rule_index(),
            window_days: default_window_days(),
            min_baseline_samples: default_min_baseline_samples(),
            decline_pct: default_decline_pct(),
            decline_high_pct: default_decline_high_pct(),
            z_threshold: default_z_threshold(),
            sustained_low_count: default_sustained_low_count(),
            low_floor: default_low_floor(),
            drought_weeks: default_drought_weeks(),
            drought_floor: default_drought_floor(),
            drought_steep_slope: default_drought_steep_slope(),
        }
    }
}

/// Result of evaluating one rule.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleResult {
    Triggered(Trigger),
    /// Enough data to say the condition does not hold.
    Clear,
    /// Not enough data to decide either way.
    Inconclusive,
}

/// Mean and population standard deviation.
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

/// Z-score of `latest` against `baseline`. `None` for a short or flat baseline.
pub fn z_score(rules: &AlertRules, latest: f64, baseline: &[f64]) -> Option<f64> {
    if baseline.len() < rules.min_baseline_samples {
        return None;
    }
    let (mean, std) = mean_std(baseline)?;
    if std < FLAT_STD {
        return None;
    }
    Some((latest - mean) / std)
}

pub fn is_anomaly(rules: &AlertRules, latest: f64, baseline: &[f64]) -> bool {
    z_score(rules, latest, baseline).is_some_and(|z| z.abs() > rules.z_threshold)
}

pub fn is_downside_anomaly(rules: &AlertRules, latest: f64, baseline: &[f64]) -> bool {
    z_score(rules, latest, baseline).is_some_and(|z| z < -rules.z_threshold)
}

/// Least-squares slope of `values` against their position.
pub fn least_squares_slope(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n;
    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - x_mean;
            (num + dx * (y - y_mean), den + dx * dx)
        });
    Some(num / den)
}

/// Latest daily mean against the mean of the preceding window.
///
/// A downside anomaly that does not reach `decline_pct` still fires with low
/// severity.
pub fn vegetation_decline(rules: &AlertRules, latest: f64, baseline: &[f64]) -> RuleResult {
    if baseline.len() < rules.min_baseline_samples {
        return RuleResult::Inconclusive;
    }
    let Some((baseline_mean, _)) = mean_std(baseline) else {
        return RuleResult::Inconclusive;
    };
    if baseline_mean <= 0.0 {
        return RuleResult::Inconclusive;
    }

    let drop_pct = (baseline_mean - latest) / baseline_mean * 100.0;
    let anomaly = is_anomaly(rules, latest, baseline);
    let downside = is_downside_anomaly(rules, latest, baseline);

    let severity = if drop_pct > rules.decline_high_pct {
        Severity::High
    } else if drop_pct > rules.decline_pct {
        Severity::Medium
    } else if downside {
        Severity::Low
    } else {
        return RuleResult::Clear;
    };

    RuleResult::Triggered(Trigger {
        alert_type: AlertType::VegetationDecline,
        severity,
        reference_value: latest,
        baseline_value: baseline_mean,
        anomaly,
        message: format!(
            "{} {:.3} is {:.1}% below the {}-sample baseline {:.3}",
            rules.rule_index,
            latest,
            drop_pct,
            baseline.len(),
            baseline_mean
        ),
    })
}

/// The last `sustained_low_count` daily means all under `low_floor`.
pub fn sustained_low(rules: &AlertRules, recent: &[f64]) -> RuleResult {
    if recent.len() < rules.sustained_low_count || rules.sustained_low_count == 0 {
        return RuleResult::Inconclusive;
    }
    let window = &recent[recent.len() - rules.sustained_low_count..];
    if !window.iter().all(|v| *v < rules.low_floor) {
        return RuleResult::Clear;
    }
    let latest = window[window.len() - 1];
    let (mean, _) = mean_std(window).unwrap_or((latest, 0.0));

    RuleResult::Triggered(Trigger {
        alert_type: AlertType::SustainedLowNdvi,
        severity: Severity::Medium,
        reference_value: latest,
        baseline_value: rules.low_floor,
        anomaly: false,
        message: format!(
            "{} below {:.2} for {} consecutive observations (mean {:.3})",
            rules.rule_index,
            rules.low_floor,
            window.len(),
            mean
        ),
    })
}

/// The last `drought_weeks` weekly averages all under `drought_floor` and
/// trending down.
pub fn drought_risk(rules: &AlertRules, weekly: &[f64], latest_anomaly: bool) -> RuleResult {
    if weekly.len() < rules.drought_weeks || rules.drought_weeks < 2 {
        return RuleResult::Inconclusive;
    }
    let window = &weekly[weekly.len() - rules.drought_weeks..];
    let Some(slope) = least_squares_slope(window) else {
        return RuleResult::Inconclusive;
    };
    if !window.iter().all(|v| *v < rules.drought_floor) || slope >= 0.0 {
        return RuleResult::Clear;
    }

    let severity = if slope < -rules.drought_steep_slope || latest_anomaly {
        Severity::High
    } else {
        Severity::Medium
    };

    RuleResult::Triggered(Trigger {
        alert_type: AlertType::DroughtRisk,
        severity,
        reference_value: window[window.len() - 1],
        baseline_value: rules.drought_floor,
        anomaly: latest_anomaly,
        message: format!(
            "{} weekly average below {:.2} for {} weeks, trend {:+.3}/week",
            rules.rule_index,
            rules.drought_floor,
            window.len(),
            slope
        ),
    })
}
