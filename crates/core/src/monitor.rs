//! Rollback monitoring sweep.
//!
//! A scheduled sweep (never event-driven) re-evaluates the real-world effect
//! of every change still under monitoring: it compares the performance
//! window before the change against the window after it, applies the
//! client's KPI-specific regression trigger, and, when a regression is
//! attributable, synthesizes the inverse action and routes it back through
//! the executor. Status transitions are forward-only; an entry that cannot
//! be decided this sweep is simply revisited on the next one.

use std::cmp::max;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::alerting::{AlertMessage, AlertSink, RollbackAlert, SweepSummary, WindowSnapshot};
use crate::domain::action::{CandidateAction, EntityRef, Evidence, Lever};
use crate::domain::ledger::{ChangeId, LedgerEntry, RollbackStatus};
use crate::domain::performance::{signed_pct, DateRange, DeltaError, PerformanceDelta, PerformanceWindow};
use crate::domain::policy::{ClientPolicy, PolicyError, PrimaryKpi};
use crate::executor::{ExecutionError, ExecutionMode, Executor};
use crate::ledger::{ChangeLedger, LedgerError, LedgerReader, LedgerWriter, RollbackUpdate};
use crate::performance_store::{PerformanceError, PerformanceReader};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonitoringOutcome {
    /// Regression trigger fired and the inverse change was applied.
    RolledBack { inverse_change_id: ChangeId, reason: String },
    /// Window elapsed without an attributable regression (the note records
    /// suppression or age-out, when either applied).
    ConfirmedGood { note: Option<String> },
    /// Deltas could not be computed; the entry stays in monitoring.
    InsufficientData { detail: String },
    /// Not yet old enough once the entity's conversion lag is applied.
    Deferred { detail: String },
    /// Trigger fired but the inverse action was blocked or failed; the entry
    /// stays in monitoring for the next sweep.
    RollbackFailed { detail: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntryOutcome {
    pub change_id: ChangeId,
    pub entity: EntityRef,
    pub lever: Lever,
    pub outcome: MonitoringOutcome,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SweepReport {
    pub customer_id: String,
    pub swept_at: DateTime<Utc>,
    pub outcomes: Vec<EntryOutcome>,
}

impl SweepReport {
    fn count(&self, predicate: impl Fn(&MonitoringOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|entry| predicate(&entry.outcome)).count()
    }

    pub fn rolled_back(&self) -> usize {
        self.count(|outcome| matches!(outcome, MonitoringOutcome::RolledBack { .. }))
    }

    pub fn confirmed_good(&self) -> usize {
        self.count(|outcome| matches!(outcome, MonitoringOutcome::ConfirmedGood { .. }))
    }

    pub fn insufficient_data(&self) -> usize {
        self.count(|outcome| matches!(outcome, MonitoringOutcome::InsufficientData { .. }))
    }

    pub fn deferred(&self) -> usize {
        self.count(|outcome| matches!(outcome, MonitoringOutcome::Deferred { .. }))
    }

    pub fn rollback_failures(&self) -> usize {
        self.count(|outcome| matches!(outcome, MonitoringOutcome::RollbackFailed { .. }))
    }

    pub fn to_summary(&self) -> SweepSummary {
        SweepSummary {
            customer_id: self.customer_id.clone(),
            swept_at: self.swept_at,
            monitored: self.outcomes.len(),
            rolled_back: self.rolled_back(),
            confirmed_good: self.confirmed_good(),
            insufficient_data: self.insufficient_data(),
            deferred: self.deferred(),
            rollback_failures: self.rollback_failures(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Performance(#[from] PerformanceError),
    #[error("inverse execution failed: {0}")]
    Execution(#[from] ExecutionError),
}

pub struct RollbackMonitor {
    ledger_reader: Arc<dyn LedgerReader>,
    ledger_writer: Arc<dyn LedgerWriter>,
    performance: Arc<dyn PerformanceReader>,
    executor: Arc<Executor>,
    alerts: Arc<dyn AlertSink>,
}

impl RollbackMonitor {
    pub fn new<L, P, A>(
        ledger: Arc<L>,
        performance: Arc<P>,
        executor: Arc<Executor>,
        alerts: Arc<A>,
    ) -> Self
    where
        L: ChangeLedger + 'static,
        P: PerformanceReader + 'static,
        A: AlertSink + 'static,
    {
        Self {
            ledger_reader: ledger.clone(),
            ledger_writer: ledger,
            performance,
            executor,
            alerts,
        }
    }

    /// One monitoring sweep for one customer. Emits a summary alert
    /// regardless of outcome, plus one alert per applied rollback.
    pub async fn sweep(
        &self,
        policy: &ClientPolicy,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, SweepError> {
        policy.validate()?;

        let floor = Duration::hours(policy.monitoring.min_monitoring_hours);
        let due = self
            .ledger_reader
            .entries_due_for_monitoring(&policy.customer_id, now - floor)
            .await?;
        info!(customer_id = %policy.customer_id, due = due.len(), "rollback sweep started");

        let mut outcomes = Vec::with_capacity(due.len());
        for entry in due {
            let outcome = self.evaluate_entry(&entry, policy, now, floor).await?;
            outcomes.push(EntryOutcome {
                change_id: entry.change_id,
                entity: entry.entity.clone(),
                lever: entry.lever,
                outcome,
            });
        }

        let report = SweepReport { customer_id: policy.customer_id.clone(), swept_at: now, outcomes };
        self.alerts.emit(AlertMessage::SweepSummary(report.to_summary()));
        info!(
            customer_id = %policy.customer_id,
            rolled_back = report.rolled_back(),
            confirmed_good = report.confirmed_good(),
            "rollback sweep finished"
        );
        Ok(report)
    }

    async fn evaluate_entry(
        &self,
        entry: &LedgerEntry,
        policy: &ClientPolicy,
        now: DateTime<Utc>,
        floor: Duration,
    ) -> Result<MonitoringOutcome, SweepError> {
        let entity_id = entry.entity.entity_id.as_str();
        let age = now - entry.executed_at;

        // Entities with a long click-to-conversion lag need more runway
        // than the 72-hour floor before their deltas mean anything.
        let lag = self.performance.median_conversion_lag(entity_id).await?.unwrap_or(Duration::zero());
        let required_age = max(floor, lag);
        if age < required_age {
            return Ok(MonitoringOutcome::Deferred {
                detail: format!(
                    "entity conversion lag requires {} hours of monitoring; {} elapsed",
                    required_age.num_hours(),
                    age.num_hours()
                ),
            });
        }

        let window = Duration::days(policy.monitoring.monitoring_window_days);
        let baseline_range = DateRange::new(entry.executed_at - window, entry.executed_at);
        let current_start = max(entry.executed_at, now - window);
        let current_range = DateRange::new(current_start, now);

        let baseline = self.performance.window(entity_id, baseline_range).await?;
        let current = self.performance.window(entity_id, current_range).await?;

        let delta = match PerformanceDelta::between(&baseline, &current) {
            Ok(delta) => delta,
            Err(DeltaError::InsufficientBaseline) => {
                return self.handle_insufficient_data(entry, policy, now, age).await;
            }
        };

        let Some(reason) = trigger_reason(policy, &delta) else {
            self.ledger_writer
                .transition_rollback_status(
                    entry.change_id,
                    RollbackStatus::Monitoring,
                    RollbackStatus::ConfirmedGood,
                    RollbackUpdate {
                        monitoring_completed_at: Some(now),
                        ..RollbackUpdate::default()
                    },
                )
                .await?;
            return Ok(MonitoringOutcome::ConfirmedGood { note: None });
        };

        // Anti-oscillation: if another lever moved on this entity since the
        // change, the regression cannot be attributed to it. Defer to human
        // review instead of reversing blind.
        let since_execution = self
            .ledger_reader
            .changes_for_entity_since(&policy.customer_id, entity_id, entry.executed_at)
            .await?;
        let confounder = since_execution.iter().find(|other| {
            other.change_id != entry.change_id
                && other.lever != entry.lever
                && entry.lever.confounds(other.lever)
        });

        if let Some(confounder) = confounder {
            let note = format!(
                "regression observed ({reason}) but the {} lever also changed on {}; attribution is ambiguous, deferring to human review",
                confounder.lever, entry.entity
            );
            warn!(change_id = %entry.change_id, %note, "rollback suppressed");
            self.ledger_writer
                .transition_rollback_status(
                    entry.change_id,
                    RollbackStatus::Monitoring,
                    RollbackStatus::ConfirmedGood,
                    RollbackUpdate {
                        rollback_reason: Some(note.clone()),
                        monitoring_completed_at: Some(now),
                        ..RollbackUpdate::default()
                    },
                )
                .await?;
            return Ok(MonitoringOutcome::ConfirmedGood { note: Some(note) });
        }

        self.apply_rollback(entry, policy, now, reason, &delta, &baseline, &current).await
    }

    async fn handle_insufficient_data(
        &self,
        entry: &LedgerEntry,
        policy: &ClientPolicy,
        now: DateTime<Utc>,
        age: Duration,
    ) -> Result<MonitoringOutcome, SweepError> {
        let max_age = Duration::days(policy.monitoring.max_monitoring_days);
        if age >= max_age {
            let note = format!(
                "monitoring aged out after {} days without sufficient baseline data",
                age.num_days()
            );
            self.ledger_writer
                .transition_rollback_status(
                    entry.change_id,
                    RollbackStatus::Monitoring,
                    RollbackStatus::ConfirmedGood,
                    RollbackUpdate {
                        rollback_reason: Some(note.clone()),
                        monitoring_completed_at: Some(now),
                        ..RollbackUpdate::default()
                    },
                )
                .await?;
            return Ok(MonitoringOutcome::ConfirmedGood { note: Some(note) });
        }

        Ok(MonitoringOutcome::InsufficientData {
            detail: "baseline window has zero conversions; deltas recomputed next sweep".to_string(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_rollback(
        &self,
        entry: &LedgerEntry,
        policy: &ClientPolicy,
        now: DateTime<Utc>,
        reason: String,
        delta: &PerformanceDelta,
        baseline: &PerformanceWindow,
        current: &PerformanceWindow,
    ) -> Result<MonitoringOutcome, SweepError> {
        let inverse = inverse_action(entry, &reason);
        let result = self
            .executor
            .execute(&policy.customer_id, vec![inverse], policy, ExecutionMode::Live)
            .await?;

        let Some(executed) = result.successful.first() else {
            let detail = if let Some(blocked) = result.blocked.first() {
                format!("inverse action blocked: {}", blocked.reasons.join("; "))
            } else if let Some(failure) = result.failed.first() {
                format!("inverse mutation failed: {}", failure.error)
            } else {
                "inverse action produced no outcome".to_string()
            };
            warn!(change_id = %entry.change_id, %detail, "rollback not applied");
            return Ok(MonitoringOutcome::RollbackFailed { detail });
        };

        let inverse_change_id = executed.entry.change_id;
        let rollback_reason = format!("{reason}; reversed by change {inverse_change_id}");
        self.ledger_writer
            .transition_rollback_status(
                entry.change_id,
                RollbackStatus::Monitoring,
                RollbackStatus::RolledBack,
                RollbackUpdate {
                    rollback_of_id: Some(inverse_change_id),
                    rollback_reason: Some(rollback_reason.clone()),
                    monitoring_completed_at: Some(now),
                },
            )
            .await?;

        self.alerts.emit(AlertMessage::Rollback(RollbackAlert {
            customer_id: policy.customer_id.clone(),
            change_id: entry.change_id,
            inverse_change_id,
            entity: entry.entity.clone(),
            lever: entry.lever,
            trigger_reason: reason.clone(),
            baseline: WindowSnapshot::from_window(baseline),
            current: WindowSnapshot::from_window(current),
            delta: delta.clone(),
            occurred_at: now,
        }));

        info!(
            change_id = %entry.change_id,
            inverse_change_id = %inverse_change_id,
            %reason,
            "change rolled back"
        );
        Ok(MonitoringOutcome::RolledBack { inverse_change_id, reason })
    }
}

/// The inverse swaps old and new values and is flagged as restorative so the
/// history-based guardrails let it through while the safety-critical ones
/// still apply.
fn inverse_action(entry: &LedgerEntry, reason: &str) -> CandidateAction {
    CandidateAction {
        rule_id: "rollback_monitor".to_string(),
        customer_id: entry.customer_id.clone(),
        entity: entry.entity.clone(),
        lever: entry.lever,
        current_value: entry.new_value,
        proposed_value: entry.old_value,
        risk_tier: entry.risk_tier,
        confidence: 1.0,
        evidence: Evidence::None,
        rationale: reason.to_string(),
        rollback_of: Some(entry.change_id),
    }
}

/// KPI-specific regression trigger.
///
/// CPA clients need both a CPA rise and a conversion drop (a CPA rise alone
/// is not damning if volume held). ROAS clients trigger on either a ROAS or
/// a value drop: each alone indicates revenue harm.
fn trigger_reason(policy: &ClientPolicy, delta: &PerformanceDelta) -> Option<String> {
    let monitoring = &policy.monitoring;
    match policy.primary_kpi {
        PrimaryKpi::Cpa => {
            let cpa_rise = delta
                .cpa_pct
                .map_or(false, |pct| pct >= monitoring.cpa_rise_trigger_pct);
            let conversions_drop =
                delta.conversions_pct <= -monitoring.conversions_drop_trigger_pct;
            (cpa_rise && conversions_drop).then(|| {
                format!(
                    "CPA rose {} while conversions fell {} (triggers: +{}% CPA and -{}% conversions)",
                    describe(delta.cpa_pct),
                    signed_pct(delta.conversions_pct),
                    monitoring.cpa_rise_trigger_pct,
                    monitoring.conversions_drop_trigger_pct
                )
            })
        }
        PrimaryKpi::Roas => {
            let roas_drop = delta
                .roas_pct
                .map_or(false, |pct| pct <= -monitoring.roas_drop_trigger_pct);
            let value_drop = delta
                .conversion_value_pct
                .map_or(false, |pct| pct <= -monitoring.value_drop_trigger_pct);
            (roas_drop || value_drop).then(|| {
                format!(
                    "ROAS moved {} and conversion value moved {} (triggers: -{}% ROAS or -{}% value)",
                    describe(delta.roas_pct),
                    describe(delta.conversion_value_pct),
                    monitoring.roas_drop_trigger_pct,
                    monitoring.value_drop_trigger_pct
                )
            })
        }
    }
}

fn describe(value: Option<rust_decimal::Decimal>) -> String {
    match value {
        Some(value) => signed_pct(value),
        None => "n/a (insufficient data)".to_string(),
    }
}
