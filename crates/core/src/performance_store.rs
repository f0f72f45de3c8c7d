//! Seam to the external performance time-series store. Read-only from this
//! core's perspective; aggregates are recomputed every sweep and never
//! cached here.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Duration;
use thiserror::Error;

use crate::domain::performance::{DateRange, PerformanceWindow};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PerformanceError {
    #[error("performance store failure: {0}")]
    Store(String),
}

#[async_trait]
pub trait PerformanceReader: Send + Sync {
    /// Aggregate metrics for one entity over a range. Entities without data
    /// in the range return an empty window, not an error.
    async fn window(
        &self,
        entity_id: &str,
        range: DateRange,
    ) -> Result<PerformanceWindow, PerformanceError>;

    /// Median click-to-conversion lag for the entity, when the store has
    /// enough history to estimate one.
    async fn median_conversion_lag(
        &self,
        entity_id: &str,
    ) -> Result<Option<Duration>, PerformanceError>;
}

/// Fixture-backed reader: windows registered per entity are matched by
/// range overlap. Serves tests and the metrics-snapshot CLI path.
#[derive(Debug, Default)]
pub struct StaticPerformanceReader {
    windows: Mutex<HashMap<String, Vec<PerformanceWindow>>>,
    lags: Mutex<HashMap<String, Duration>>,
}

impl StaticPerformanceReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_window(&self, entity_id: impl Into<String>, window: PerformanceWindow) {
        match self.windows.lock() {
            Ok(mut windows) => windows.entry(entity_id.into()).or_default().push(window),
            Err(poisoned) => {
                poisoned.into_inner().entry(entity_id.into()).or_default().push(window)
            }
        }
    }

    pub fn set_conversion_lag(&self, entity_id: impl Into<String>, lag: Duration) {
        match self.lags.lock() {
            Ok(mut lags) => {
                lags.insert(entity_id.into(), lag);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(entity_id.into(), lag);
            }
        }
    }
}

#[async_trait]
impl PerformanceReader for StaticPerformanceReader {
    async fn window(
        &self,
        entity_id: &str,
        range: DateRange,
    ) -> Result<PerformanceWindow, PerformanceError> {
        let stored = match self.windows.lock() {
            Ok(windows) => windows.get(entity_id).cloned(),
            Err(poisoned) => poisoned.into_inner().get(entity_id).cloned(),
        };

        let matched = stored
            .unwrap_or_default()
            .into_iter()
            .find(|window| window.range.overlaps(&range));

        Ok(match matched {
            Some(mut window) => {
                window.range = range;
                window
            }
            None => PerformanceWindow::empty(range),
        })
    }

    async fn median_conversion_lag(
        &self,
        entity_id: &str,
    ) -> Result<Option<Duration>, PerformanceError> {
        let lag = match self.lags.lock() {
            Ok(lags) => lags.get(entity_id).copied(),
            Err(poisoned) => poisoned.into_inner().get(entity_id).copied(),
        };
        Ok(lag)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use super::{PerformanceReader, StaticPerformanceReader};
    use crate::domain::performance::{DateRange, PerformanceWindow};

    #[tokio::test]
    async fn windows_match_by_overlap_and_missing_entities_are_empty() {
        let reader = StaticPerformanceReader::new();
        let now = Utc::now();
        let stored_range = DateRange::new(now - Duration::days(7), now);

        reader.insert_window(
            "cmp-1",
            PerformanceWindow {
                range: stored_range,
                impressions: 5_000,
                clicks: 200,
                cost: Decimal::new(240_00, 2),
                conversions: Decimal::new(12, 0),
                conversion_value: Decimal::new(960_00, 2),
            },
        );

        let requested = DateRange::new(now - Duration::days(6), now - Duration::days(1));
        let hit = reader.window("cmp-1", requested).await.expect("window");
        assert_eq!(hit.conversions, Decimal::new(12, 0));
        assert_eq!(hit.range, requested);

        let miss_range = DateRange::new(now - Duration::days(30), now - Duration::days(20));
        let miss = reader.window("cmp-1", miss_range).await.expect("window");
        assert_eq!(miss.conversions, Decimal::ZERO);

        let unknown = reader.window("cmp-9", requested).await.expect("window");
        assert_eq!(unknown.impressions, 0);
    }

    #[tokio::test]
    async fn conversion_lag_is_optional() {
        let reader = StaticPerformanceReader::new();
        reader.set_conversion_lag("cmp-1", Duration::hours(96));

        assert_eq!(
            reader.median_conversion_lag("cmp-1").await.expect("lag"),
            Some(Duration::hours(96))
        );
        assert_eq!(reader.median_conversion_lag("cmp-2").await.expect("lag"), None);
    }
}
