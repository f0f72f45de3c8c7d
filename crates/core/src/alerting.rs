//! Structured alert payloads for rollbacks and sweep summaries.
//!
//! This core only produces the message; delivery (log, chat, webhook) is a
//! sink implementation concern.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::action::{EntityRef, Lever};
use crate::domain::ledger::ChangeId;
use crate::domain::performance::{PerformanceDelta, PerformanceWindow};

/// Snapshot of one window's headline metrics, pre-derived so sinks never
/// recompute ratios (and never see a division).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub cost: Decimal,
    pub conversions: Decimal,
    pub conversion_value: Decimal,
    pub cpa: Option<Decimal>,
    pub roas: Option<Decimal>,
}

impl WindowSnapshot {
    pub fn from_window(window: &PerformanceWindow) -> Self {
        Self {
            cost: window.cost,
            conversions: window.conversions,
            conversion_value: window.conversion_value,
            cpa: window.cpa(),
            roas: window.roas(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RollbackAlert {
    pub customer_id: String,
    pub change_id: ChangeId,
    pub inverse_change_id: ChangeId,
    pub entity: EntityRef,
    pub lever: Lever,
    pub trigger_reason: String,
    pub baseline: WindowSnapshot,
    pub current: WindowSnapshot,
    pub delta: PerformanceDelta,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub customer_id: String,
    pub swept_at: DateTime<Utc>,
    pub monitored: usize,
    pub rolled_back: usize,
    pub confirmed_good: usize,
    pub insufficient_data: usize,
    pub deferred: usize,
    pub rollback_failures: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertMessage {
    Rollback(RollbackAlert),
    SweepSummary(SweepSummary),
}

pub trait AlertSink: Send + Sync {
    fn emit(&self, message: AlertMessage);
}

#[derive(Clone, Default)]
pub struct InMemoryAlertSink {
    messages: Arc<Mutex<Vec<AlertMessage>>>,
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<AlertMessage> {
        match self.messages.lock() {
            Ok(messages) => messages.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AlertSink for InMemoryAlertSink {
    fn emit(&self, message: AlertMessage) {
        match self.messages.lock() {
            Ok(mut messages) => messages.push(message),
            Err(poisoned) => poisoned.into_inner().push(message),
        }
    }
}
