//! Change ledger contracts and the in-memory reference implementation.
//!
//! The ledger is the single source of truth for cooldown, rate-limit, and
//! rollback-linkage queries. Writes are single-entry appends; the only
//! permitted update touches the rollback fields, and only forward.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::action::{ActionCategory, Lever};
use crate::domain::ledger::{ChangeId, LedgerEntry, NewLedgerEntry, RollbackStatus};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger storage failure: {0}")]
    Storage(String),
    #[error("invalid rollback transition from {from:?} to {to:?} for change {change_id}")]
    InvalidTransition { change_id: ChangeId, from: RollbackStatus, to: RollbackStatus },
    #[error("change {change_id} is not in the expected {expected:?} state")]
    Conflict { change_id: ChangeId, expected: RollbackStatus },
    #[error("change not found: {0}")]
    NotFound(ChangeId),
}

/// Rollback-side fields applied during a status transition. Value fields of
/// an entry have no update path anywhere in this crate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RollbackUpdate {
    pub rollback_of_id: Option<ChangeId>,
    pub rollback_reason: Option<String>,
    pub monitoring_completed_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Most recent change to `(entity_id, lever)` for the customer, for the
    /// cooldown gate.
    async fn last_change(
        &self,
        customer_id: &str,
        entity_id: &str,
        lever: Lever,
    ) -> Result<Option<DateTime<Utc>>, LedgerError>;

    /// All changes to the entity since `since`, newest last. The
    /// anti-oscillation checks filter these by lever.
    async fn changes_for_entity_since(
        &self,
        customer_id: &str,
        entity_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Count of executed actions in a category on a calendar day, for the
    /// rate-limit gate.
    async fn count_actions(
        &self,
        customer_id: &str,
        category: ActionCategory,
        date: NaiveDate,
    ) -> Result<u32, LedgerError>;

    /// Entries still in `monitoring` whose execution time is at or before
    /// `executed_before`. The monitor applies any per-entity conversion-lag
    /// extension on top of this floor.
    async fn entries_due_for_monitoring(
        &self,
        customer_id: &str,
        executed_before: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, LedgerError>;

    async fn entry(&self, change_id: ChangeId) -> Result<Option<LedgerEntry>, LedgerError>;
}

#[async_trait]
pub trait LedgerWriter: Send + Sync {
    async fn append(&self, entry: NewLedgerEntry) -> Result<LedgerEntry, LedgerError>;

    /// Advance the rollback status of an entry. Fails with
    /// [`LedgerError::InvalidTransition`] for non-forward transitions and
    /// [`LedgerError::Conflict`] when the stored status no longer matches
    /// `from`.
    async fn transition_rollback_status(
        &self,
        change_id: ChangeId,
        from: RollbackStatus,
        to: RollbackStatus,
        update: RollbackUpdate,
    ) -> Result<LedgerEntry, LedgerError>;
}

pub trait ChangeLedger: LedgerReader + LedgerWriter {}

impl<T: LedgerReader + LedgerWriter> ChangeLedger for T {}

/// In-memory ledger used by unit tests and as the reference semantics for
/// the SQL implementation.
#[derive(Debug, Default)]
pub struct InMemoryChangeLedger {
    state: Mutex<InMemoryState>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    next_id: i64,
    entries: Vec<LedgerEntry>,
}

impl InMemoryChangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.state.lock().await.entries.clone()
    }
}

#[async_trait]
impl LedgerReader for InMemoryChangeLedger {
    async fn last_change(
        &self,
        customer_id: &str,
        entity_id: &str,
        lever: Lever,
    ) -> Result<Option<DateTime<Utc>>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .filter(|entry| {
                entry.customer_id == customer_id
                    && entry.entity.entity_id == entity_id
                    && entry.lever == lever
            })
            .map(|entry| entry.executed_at)
            .max())
    }

    async fn changes_for_entity_since(
        &self,
        customer_id: &str,
        entity_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.state.lock().await;
        let mut matched: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|entry| {
                entry.customer_id == customer_id
                    && entry.entity.entity_id == entity_id
                    && entry.executed_at > since
            })
            .cloned()
            .collect();
        matched.sort_by_key(|entry| entry.executed_at);
        Ok(matched)
    }

    async fn count_actions(
        &self,
        customer_id: &str,
        category: ActionCategory,
        date: NaiveDate,
    ) -> Result<u32, LedgerError> {
        let state = self.state.lock().await;
        let count = state
            .entries
            .iter()
            .filter(|entry| {
                entry.customer_id == customer_id
                    && entry.action_category == category
                    && entry.executed_at.date_naive() == date
            })
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn entries_due_for_monitoring(
        &self,
        customer_id: &str,
        executed_before: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.state.lock().await;
        let mut due: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|entry| {
                entry.customer_id == customer_id
                    && entry.rollback_status == RollbackStatus::Monitoring
                    && entry.executed_at <= executed_before
            })
            .cloned()
            .collect();
        due.sort_by_key(|entry| entry.executed_at);
        Ok(due)
    }

    async fn entry(&self, change_id: ChangeId) -> Result<Option<LedgerEntry>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state.entries.iter().find(|entry| entry.change_id == change_id).cloned())
    }
}

#[async_trait]
impl LedgerWriter for InMemoryChangeLedger {
    async fn append(&self, entry: NewLedgerEntry) -> Result<LedgerEntry, LedgerError> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let entry = entry.into_entry(ChangeId(state.next_id));
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn transition_rollback_status(
        &self,
        change_id: ChangeId,
        from: RollbackStatus,
        to: RollbackStatus,
        update: RollbackUpdate,
    ) -> Result<LedgerEntry, LedgerError> {
        if !from.can_transition_to(to) {
            return Err(LedgerError::InvalidTransition { change_id, from, to });
        }

        let mut state = self.state.lock().await;
        let entry = state
            .entries
            .iter_mut()
            .find(|entry| entry.change_id == change_id)
            .ok_or(LedgerError::NotFound(change_id))?;

        if entry.rollback_status != from {
            return Err(LedgerError::Conflict { change_id, expected: from });
        }

        entry.rollback_status = to;
        if let Some(rollback_of_id) = update.rollback_of_id {
            entry.rollback_of_id = Some(rollback_of_id);
        }
        if let Some(reason) = update.rollback_reason {
            entry.rollback_reason = Some(reason);
        }
        if let Some(completed_at) = update.monitoring_completed_at {
            entry.monitoring_completed_at = Some(completed_at);
        }

        Ok(entry.clone())
    }
}
