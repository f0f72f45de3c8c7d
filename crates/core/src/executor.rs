//! Guarded batch execution.
//!
//! Every item is re-validated against the live ledger immediately before its
//! mutation, so approvals can never go stale inside a batch: an item executed
//! at position N consumes cooldowns and daily caps that the re-validation of
//! item N+1 observes. One item's failure never aborts the batch; failures
//! are data in the result, not exceptions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::domain::action::CandidateAction;
use crate::domain::ledger::{LedgerEntry, NewLedgerEntry, RollbackStatus};
use crate::domain::policy::{ClientPolicy, PolicyError};
use crate::guardrails::{GuardrailDecision, GuardrailEvaluator, GuardrailVerdict};
use crate::ledger::{ChangeLedger, LedgerError, LedgerReader, LedgerWriter};
use crate::mutation::{ChangeRequest, MutationClient, MutationError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    DryRun,
    Live,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DryRun => "dry_run",
            Self::Live => "live",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExecutedChange {
    pub action: CandidateAction,
    pub entry: LedgerEntry,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BlockedAction {
    pub action: CandidateAction,
    pub reasons: Vec<String>,
    /// True when the action itself was sound but the client's automation
    /// mode routes it to a human approval queue.
    pub requires_manual: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FailedMutation {
    pub action: CandidateAction,
    pub error: MutationError,
}

/// Per-batch outcome, suitable for direct display. A caller can always
/// distinguish "38 of 40 succeeded" from a full abort.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchResult {
    pub customer_id: String,
    pub mode: ExecutionMode,
    pub successful: Vec<ExecutedChange>,
    pub blocked: Vec<BlockedAction>,
    pub failed: Vec<FailedMutation>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchResult {
    pub fn summary(&self) -> String {
        format!(
            "{} mode: {} executed, {} blocked, {} failed",
            self.mode.as_str(),
            self.successful.len(),
            self.blocked.len(),
            self.failed.len()
        )
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("batch for customer {expected} contains an action for customer {found}")]
    CustomerMismatch { expected: String, found: String },
}

/// One logical writer per customer: executor runs for the same customer
/// serialize on an advisory lock, while different customers proceed
/// concurrently.
#[derive(Debug, Default)]
pub struct CustomerLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl CustomerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, customer_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(locks) => locks,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(locks.entry(customer_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

pub struct Executor {
    ledger_reader: Arc<dyn LedgerReader>,
    ledger_writer: Arc<dyn LedgerWriter>,
    mutations: Arc<dyn MutationClient>,
    evaluator: GuardrailEvaluator,
    locks: CustomerLocks,
    approved_by: String,
}

impl Executor {
    pub fn new<L, M>(ledger: Arc<L>, mutations: Arc<M>) -> Self
    where
        L: ChangeLedger + 'static,
        M: MutationClient + 'static,
    {
        Self {
            ledger_reader: ledger.clone(),
            ledger_writer: ledger,
            mutations,
            evaluator: GuardrailEvaluator::with_default_rules(),
            locks: CustomerLocks::new(),
            approved_by: "autopilot".to_string(),
        }
    }

    /// Identity stamped into `approved_by` on live entries (the rollback
    /// monitor uses its own).
    pub fn with_approver(mut self, approved_by: impl Into<String>) -> Self {
        self.approved_by = approved_by.into();
        self
    }

    pub fn with_evaluator(mut self, evaluator: GuardrailEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Run a batch in caller-supplied order. Fails fast on a malformed
    /// policy or a cross-customer batch; everything after that point is
    /// per-item data in the result.
    pub async fn execute(
        &self,
        customer_id: &str,
        batch: Vec<CandidateAction>,
        policy: &ClientPolicy,
        mode: ExecutionMode,
    ) -> Result<BatchResult, ExecutionError> {
        policy.validate()?;

        if let Some(stranger) = batch.iter().find(|action| action.customer_id != customer_id) {
            return Err(ExecutionError::CustomerMismatch {
                expected: customer_id.to_string(),
                found: stranger.customer_id.clone(),
            });
        }

        let _guard = self.locks.acquire(customer_id).await;
        let started_at = Utc::now();
        info!(customer_id, mode = mode.as_str(), items = batch.len(), "executing batch");

        let mut successful = Vec::new();
        let mut blocked = Vec::new();
        let mut failed = Vec::new();

        for action in batch {
            let now = Utc::now();
            let verdict = self
                .evaluator
                .evaluate(&action, policy, self.ledger_reader.as_ref(), now)
                .await?;

            match verdict.decision {
                GuardrailDecision::Block => {
                    debug!(
                        entity = %action.entity,
                        lever = %action.lever,
                        reasons = ?verdict.blocked_reasons,
                        "action blocked by guardrails"
                    );
                    blocked.push(blocked_action(action, verdict, false));
                }
                GuardrailDecision::AllowManual => {
                    debug!(
                        entity = %action.entity,
                        lever = %action.lever,
                        "action routed to manual approval"
                    );
                    blocked.push(blocked_action(action, verdict, true));
                }
                GuardrailDecision::Allow => match mode {
                    ExecutionMode::DryRun => {
                        let entry = self.journal_dry_run(&action, now).await?;
                        successful.push(ExecutedChange { action, entry });
                    }
                    ExecutionMode::Live => {
                        let request = ChangeRequest::from_action(&action);
                        match self.mutations.apply(&request).await {
                            Ok(receipt) => {
                                let entry =
                                    self.journal_live(&action, now, &receipt.reference).await?;
                                info!(
                                    change_id = %entry.change_id,
                                    entity = %entry.entity,
                                    lever = %entry.lever,
                                    "mutation applied"
                                );
                                successful.push(ExecutedChange { action, entry });
                            }
                            Err(error) => {
                                warn!(
                                    entity = %action.entity,
                                    lever = %action.lever,
                                    old_value = %action.current_value,
                                    new_value = %action.proposed_value,
                                    error_class = error.error_class(),
                                    %error,
                                    "mutation failed; continuing batch"
                                );
                                failed.push(FailedMutation { action, error });
                            }
                        }
                    }
                },
            }
        }

        let result = BatchResult {
            customer_id: customer_id.to_string(),
            mode,
            successful,
            blocked,
            failed,
            started_at,
            finished_at: Utc::now(),
        };
        info!(customer_id, summary = %result.summary(), "batch finished");
        Ok(result)
    }

    /// Dry-run entries are journaled so that cooldown and rate-limit logic
    /// behaves identically on subsequent dry-run calls, but they never enter
    /// monitoring.
    async fn journal_dry_run(
        &self,
        action: &CandidateAction,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, LedgerError> {
        let entry = NewLedgerEntry::from_action(action, "dry_run", now, RollbackStatus::None, None);
        self.ledger_writer.append(entry).await
    }

    async fn journal_live(
        &self,
        action: &CandidateAction,
        now: DateTime<Utc>,
        platform_reference: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        // Rollback entries are terminal on arrival: they restore state and
        // are never themselves monitored. Everything else starts monitoring.
        let (status, monitoring_started_at) = if action.is_rollback() {
            (RollbackStatus::None, None)
        } else {
            (RollbackStatus::Monitoring, Some(now))
        };

        let entry = NewLedgerEntry::from_action(action, &self.approved_by, now, status, monitoring_started_at)
            .with_metadata("platform_reference", platform_reference);
        self.ledger_writer.append(entry).await
    }
}

fn blocked_action(
    action: CandidateAction,
    verdict: GuardrailVerdict,
    requires_manual: bool,
) -> BlockedAction {
    let reasons = if requires_manual { verdict.manual_reasons } else { verdict.blocked_reasons };
    BlockedAction { action, reasons, requires_manual }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use super::{ExecutionError, ExecutionMode, Executor};
    use crate::domain::action::{
        ActionCategory, CandidateAction, EntityRef, EntityType, Evidence, Lever, RiskTier,
    };
    use crate::domain::ledger::RollbackStatus;
    use crate::domain::policy::{AutomationMode, ClientPolicy};
    use crate::ledger::InMemoryChangeLedger;
    use crate::mutation::{MutationError, ScriptedMutationClient};

    fn autopilot_policy() -> ClientPolicy {
        let mut policy = ClientPolicy::new("cust-1");
        policy.automation_mode = AutomationMode::Autopilot;
        policy
    }

    fn budget_action(entity_id: &str) -> CandidateAction {
        CandidateAction {
            rule_id: "budget_scaler".to_string(),
            customer_id: "cust-1".to_string(),
            entity: EntityRef::new(EntityType::Campaign, entity_id),
            lever: Lever::Budget,
            current_value: Decimal::new(100_00, 2),
            proposed_value: Decimal::new(105_00, 2),
            risk_tier: RiskTier::Low,
            confidence: 0.9,
            evidence: Evidence::Budget {
                spend_7d: Decimal::new(650_00, 2),
                conversions_7d: 40,
                budget_utilization_pct: Decimal::new(97, 0),
            },
            rationale: "budget constrained".to_string(),
            rollback_of: None,
        }
    }

    fn keyword_add(entity_id: &str) -> CandidateAction {
        CandidateAction {
            rule_id: "keyword_miner".to_string(),
            customer_id: "cust-1".to_string(),
            entity: EntityRef::new(EntityType::Keyword, entity_id),
            lever: Lever::Keyword,
            current_value: Decimal::ZERO,
            proposed_value: Decimal::ONE,
            risk_tier: RiskTier::Low,
            confidence: 0.8,
            evidence: Evidence::Keyword { clicks_30d: 120, conversions_30d: 9, quality_score: Some(7) },
            rationale: "search term converting".to_string(),
            rollback_of: None,
        }
    }

    fn executor(ledger: &Arc<InMemoryChangeLedger>, client: &Arc<ScriptedMutationClient>) -> Executor {
        Executor::new(Arc::clone(ledger), Arc::clone(client))
    }

    #[tokio::test]
    async fn dry_run_never_calls_the_mutation_client() {
        let ledger = Arc::new(InMemoryChangeLedger::new());
        let client = Arc::new(ScriptedMutationClient::new());
        let executor = executor(&ledger, &client);

        let result = executor
            .execute("cust-1", vec![budget_action("cmp-1")], &autopilot_policy(), ExecutionMode::DryRun)
            .await
            .expect("execute");

        assert_eq!(result.successful.len(), 1);
        assert!(client.calls().is_empty());
        assert_eq!(result.successful[0].entry.approved_by, "dry_run");
        assert_eq!(result.successful[0].entry.rollback_status, RollbackStatus::None);
    }

    #[tokio::test]
    async fn second_identical_dry_run_blocks_on_cooldown() {
        let ledger = Arc::new(InMemoryChangeLedger::new());
        let client = Arc::new(ScriptedMutationClient::new());
        let executor = executor(&ledger, &client);
        let policy = autopilot_policy();

        let first = executor
            .execute("cust-1", vec![budget_action("cmp-1")], &policy, ExecutionMode::DryRun)
            .await
            .expect("first run");
        assert_eq!(first.successful.len(), 1);

        let second = executor
            .execute("cust-1", vec![budget_action("cmp-1")], &policy, ExecutionMode::DryRun)
            .await
            .expect("second run");
        assert!(second.successful.is_empty());
        assert_eq!(second.blocked.len(), 1);
        assert!(second.blocked[0].reasons.iter().any(|reason| reason.contains("cooldown")));
    }

    #[tokio::test]
    async fn live_success_starts_monitoring() {
        let ledger = Arc::new(InMemoryChangeLedger::new());
        let client = Arc::new(ScriptedMutationClient::new());
        let executor = executor(&ledger, &client);

        let result = executor
            .execute("cust-1", vec![budget_action("cmp-1")], &autopilot_policy(), ExecutionMode::Live)
            .await
            .expect("execute");

        assert_eq!(result.successful.len(), 1);
        let entry = &result.successful[0].entry;
        assert_eq!(entry.rollback_status, RollbackStatus::Monitoring);
        assert!(entry.monitoring_started_at.is_some());
        assert_eq!(entry.approved_by, "autopilot");
        assert!(entry.metadata.contains_key("platform_reference"));
    }

    #[tokio::test]
    async fn one_failed_mutation_never_aborts_the_batch() {
        let ledger = Arc::new(InMemoryChangeLedger::new());
        let client = Arc::new(ScriptedMutationClient::new());
        client.fail_entity("cmp-2", MutationError::Transport("connection reset".into()));
        let executor = executor(&ledger, &client);

        let batch = vec![budget_action("cmp-1"), budget_action("cmp-2"), budget_action("cmp-3")];
        let result = executor
            .execute("cust-1", batch, &autopilot_policy(), ExecutionMode::Live)
            .await
            .expect("execute");

        assert_eq!(result.successful.len(), 2);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].action.entity.entity_id, "cmp-2");
        assert_eq!(result.failed[0].error.error_class(), "transport");
        // No ledger entry for the failed mutation.
        assert_eq!(ledger.entries().await.len(), 2);
    }

    #[tokio::test]
    async fn intra_batch_rate_limit_blocks_the_second_item() {
        let ledger = Arc::new(InMemoryChangeLedger::new());
        let client = Arc::new(ScriptedMutationClient::new());
        let executor = executor(&ledger, &client);

        let mut policy = autopilot_policy();
        policy.daily_caps.insert(ActionCategory::KeywordAdd, 1);

        let batch = vec![keyword_add("kw-1"), keyword_add("kw-2")];
        let result = executor
            .execute("cust-1", batch, &policy, ExecutionMode::Live)
            .await
            .expect("execute");

        assert_eq!(result.successful.len(), 1);
        assert_eq!(result.successful[0].action.entity.entity_id, "kw-1");
        assert_eq!(result.blocked.len(), 1);
        assert_eq!(result.blocked[0].action.entity.entity_id, "kw-2");
        assert!(result.blocked[0].reasons.iter().any(|reason| reason.contains("daily cap")));
    }

    #[tokio::test]
    async fn suggest_mode_routes_items_to_manual_queue() {
        let ledger = Arc::new(InMemoryChangeLedger::new());
        let client = Arc::new(ScriptedMutationClient::new());
        let executor = executor(&ledger, &client);

        let mut policy = autopilot_policy();
        policy.automation_mode = AutomationMode::Suggest;

        let result = executor
            .execute("cust-1", vec![budget_action("cmp-1")], &policy, ExecutionMode::Live)
            .await
            .expect("execute");

        assert!(result.successful.is_empty());
        assert_eq!(result.blocked.len(), 1);
        assert!(result.blocked[0].requires_manual);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn cross_customer_batch_is_rejected_before_any_mutation() {
        let ledger = Arc::new(InMemoryChangeLedger::new());
        let client = Arc::new(ScriptedMutationClient::new());
        let executor = executor(&ledger, &client);

        let mut foreign = budget_action("cmp-1");
        foreign.customer_id = "cust-2".to_string();

        let error = executor
            .execute("cust-1", vec![foreign], &autopilot_policy(), ExecutionMode::Live)
            .await
            .expect_err("mismatched batch must fail");

        assert!(matches!(error, ExecutionError::CustomerMismatch { .. }));
        assert!(client.calls().is_empty());
        assert!(ledger.entries().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_policy_aborts_before_any_mutation() {
        let ledger = Arc::new(InMemoryChangeLedger::new());
        let client = Arc::new(ScriptedMutationClient::new());
        let executor = executor(&ledger, &client);

        let mut policy = autopilot_policy();
        policy.monitoring.monitoring_window_days = 2;

        let error = executor
            .execute("cust-1", vec![budget_action("cmp-1")], &policy, ExecutionMode::Live)
            .await
            .expect_err("invalid policy must abort");

        assert!(matches!(error, ExecutionError::Policy(_)));
        assert!(client.calls().is_empty());
    }
}
