use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Half-open time range `[start, end)` used for performance queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Aggregate performance over one window, recomputed on demand from the
/// external performance store and never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceWindow {
    pub range: DateRange,
    pub impressions: u64,
    pub clicks: u64,
    pub cost: Decimal,
    pub conversions: Decimal,
    pub conversion_value: Decimal,
}

impl PerformanceWindow {
    pub fn empty(range: DateRange) -> Self {
        Self {
            range,
            impressions: 0,
            clicks: 0,
            cost: Decimal::ZERO,
            conversions: Decimal::ZERO,
            conversion_value: Decimal::ZERO,
        }
    }

    /// Cost per acquisition; undefined when the window has no conversions.
    pub fn cpa(&self) -> Option<Decimal> {
        if self.conversions.is_zero() {
            return None;
        }
        Some(self.cost / self.conversions)
    }

    /// Return on ad spend; undefined when the window has no cost.
    pub fn roas(&self) -> Option<Decimal> {
        if self.cost.is_zero() {
            return None;
        }
        Some(self.conversion_value / self.cost)
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DeltaError {
    #[error("baseline window has zero conversions; deltas are undefined")]
    InsufficientBaseline,
}

/// Percentage deltas between a baseline and a current window. Ratios whose
/// denominator is undefined in either window stay `None`; they are rendered
/// as "insufficient data", never as NaN or infinity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceDelta {
    pub cpa_pct: Option<Decimal>,
    pub roas_pct: Option<Decimal>,
    pub conversions_pct: Decimal,
    pub conversion_value_pct: Option<Decimal>,
}

impl PerformanceDelta {
    pub fn between(
        baseline: &PerformanceWindow,
        current: &PerformanceWindow,
    ) -> Result<Self, DeltaError> {
        if baseline.conversions.is_zero() {
            return Err(DeltaError::InsufficientBaseline);
        }

        let conversions_pct = (current.conversions - baseline.conversions) / baseline.conversions
            * Decimal::ONE_HUNDRED;

        Ok(Self {
            cpa_pct: pct_change_opt(baseline.cpa(), current.cpa()),
            roas_pct: pct_change_opt(baseline.roas(), current.roas()),
            conversions_pct,
            conversion_value_pct: pct_change(baseline.conversion_value, current.conversion_value),
        })
    }

    /// Human-readable one-line summary embedded in rollback reasons and
    /// alert text.
    pub fn describe(&self) -> String {
        format!(
            "CPA {}, ROAS {}, conversions {}, conversion value {}",
            describe_opt(self.cpa_pct),
            describe_opt(self.roas_pct),
            signed_pct(self.conversions_pct),
            describe_opt(self.conversion_value_pct),
        )
    }
}

fn pct_change(baseline: Decimal, current: Decimal) -> Option<Decimal> {
    if baseline.is_zero() {
        return None;
    }
    Some((current - baseline) / baseline * Decimal::ONE_HUNDRED)
}

fn pct_change_opt(baseline: Option<Decimal>, current: Option<Decimal>) -> Option<Decimal> {
    match (baseline, current) {
        (Some(baseline), Some(current)) => pct_change(baseline, current),
        _ => None,
    }
}

pub fn signed_pct(value: Decimal) -> String {
    let rounded = value.round_dp(1);
    if rounded.is_sign_negative() {
        format!("{rounded}%")
    } else {
        format!("+{rounded}%")
    }
}

fn describe_opt(value: Option<Decimal>) -> String {
    match value {
        Some(value) => signed_pct(value),
        None => "n/a (insufficient data)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use super::{DateRange, DeltaError, PerformanceDelta, PerformanceWindow, signed_pct};

    fn window(cost: i64, conversions: i64, value: i64) -> PerformanceWindow {
        let end = Utc::now();
        PerformanceWindow {
            range: DateRange::new(end - Duration::days(7), end),
            impressions: 10_000,
            clicks: 400,
            cost: Decimal::new(cost, 2),
            conversions: Decimal::new(conversions, 0),
            conversion_value: Decimal::new(value, 2),
        }
    }

    #[test]
    fn cpa_rise_and_conversion_drop_are_computed() {
        // $20 CPA on 12 conversions -> $27 CPA on 10 conversions.
        let baseline = window(240_00, 12, 960_00);
        let current = window(270_00, 10, 860_00);

        let delta = PerformanceDelta::between(&baseline, &current).expect("delta");
        assert_eq!(delta.cpa_pct, Some(Decimal::new(35, 0)));
        assert!(delta.conversions_pct < Decimal::new(-16, 0));
        assert!(delta.conversions_pct > Decimal::new(-17, 0));
    }

    #[test]
    fn zero_baseline_conversions_is_insufficient_data() {
        let baseline = window(240_00, 0, 0);
        let current = window(270_00, 10, 860_00);

        assert_eq!(
            PerformanceDelta::between(&baseline, &current),
            Err(DeltaError::InsufficientBaseline)
        );
    }

    #[test]
    fn undefined_ratios_never_render_as_nan_or_infinity() {
        let baseline = window(240_00, 12, 960_00);
        // Current window collapsed to zero conversions: CPA is undefined.
        let current = window(270_00, 0, 0);

        let delta = PerformanceDelta::between(&baseline, &current).expect("delta");
        assert_eq!(delta.cpa_pct, None);
        assert_eq!(delta.conversions_pct, Decimal::new(-100, 0));

        let text = delta.describe();
        assert!(!text.contains("NaN"));
        assert!(!text.to_ascii_lowercase().contains("inf"));
        assert!(text.contains("insufficient data"));
    }

    #[test]
    fn zero_cost_current_window_leaves_roas_undefined() {
        let baseline = window(240_00, 12, 960_00);
        let mut current = window(0, 5, 400_00);
        current.cost = Decimal::ZERO;

        let delta = PerformanceDelta::between(&baseline, &current).expect("delta");
        assert_eq!(delta.roas_pct, None);
    }

    #[test]
    fn signed_pct_keeps_the_sign_visible() {
        assert_eq!(signed_pct(Decimal::new(35, 0)), "+35%");
        assert_eq!(signed_pct(Decimal::new(-167, 1)), "-16.7%");
    }
}
