//! Guardrail evaluation: layered safety preconditions checked before every
//! mutation.
//!
//! Rules are registered explicitly at construction and run in a fixed,
//! declared order. Every rule is always evaluated, with no short-circuit,
//! so a verdict carries the complete list of violated
//! preconditions, not just the first. Evaluation is pure with respect to its
//! inputs: all history arrives through the [`LedgerReader`] view, which makes
//! verdicts deterministic against a fake ledger.

pub mod rules;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::action::CandidateAction;
use crate::domain::policy::ClientPolicy;
use crate::ledger::{LedgerError, LedgerReader};

pub use rules::{
    AutomationModeRule, CooldownRule, DataSufficiencyRule, EntityStateRule, MagnitudeRule,
    OneLeverRule, ProtectedEntityRule, RateLimitRule,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailDecision {
    Allow,
    /// Permitted, but only via a human approval path (suggest mode).
    AllowManual,
    Block,
}

/// Outcome of a full guardrail evaluation. Ephemeral: logged, never
/// persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GuardrailVerdict {
    pub decision: GuardrailDecision,
    /// Every violated precondition, in rule declaration order. Empty unless
    /// the decision is `Block`.
    pub blocked_reasons: Vec<String>,
    /// Reasons the action needs a human, when the decision is `AllowManual`.
    pub manual_reasons: Vec<String>,
    /// Audit trail of every rule evaluated, in order.
    pub checked_rules: Vec<&'static str>,
}

impl GuardrailVerdict {
    pub fn allowed(&self) -> bool {
        self.decision == GuardrailDecision::Allow
    }

    pub fn is_blocked(&self) -> bool {
        self.decision == GuardrailDecision::Block
    }
}

/// Per-rule result. `Violation` blocks the action; `RequireManual` downgrades
/// an otherwise-allowed action to the manual approval path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleOutcome {
    Pass,
    RequireManual(String),
    Violation(String),
}

pub struct GuardrailContext<'a> {
    pub action: &'a CandidateAction,
    pub policy: &'a ClientPolicy,
    pub ledger: &'a dyn LedgerReader,
    pub now: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait GuardrailRule: Send + Sync {
    fn id(&self) -> &'static str;

    async fn evaluate(&self, ctx: &GuardrailContext<'_>) -> Result<RuleOutcome, LedgerError>;
}

pub struct GuardrailEvaluator {
    rules: Vec<Box<dyn GuardrailRule>>,
}

impl GuardrailEvaluator {
    /// Empty registry; callers compose their own rule set.
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// The standard rule set, in its canonical order.
    pub fn with_default_rules() -> Self {
        let mut evaluator = Self::new();
        evaluator
            .register(AutomationModeRule)
            .register(ProtectedEntityRule)
            .register(DataSufficiencyRule)
            .register(MagnitudeRule)
            .register(CooldownRule)
            .register(OneLeverRule)
            .register(RateLimitRule)
            .register(EntityStateRule);
        evaluator
    }

    pub fn register(&mut self, rule: impl GuardrailRule + 'static) -> &mut Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.id()).collect()
    }

    pub async fn evaluate(
        &self,
        action: &CandidateAction,
        policy: &ClientPolicy,
        ledger: &dyn LedgerReader,
        now: DateTime<Utc>,
    ) -> Result<GuardrailVerdict, LedgerError> {
        let ctx = GuardrailContext { action, policy, ledger, now };

        let mut blocked_reasons = Vec::new();
        let mut manual_reasons = Vec::new();
        let mut checked_rules = Vec::with_capacity(self.rules.len());

        for rule in &self.rules {
            checked_rules.push(rule.id());
            match rule.evaluate(&ctx).await? {
                RuleOutcome::Pass => {}
                RuleOutcome::RequireManual(reason) => manual_reasons.push(reason),
                RuleOutcome::Violation(reason) => blocked_reasons.push(reason),
            }
        }

        let decision = if !blocked_reasons.is_empty() {
            GuardrailDecision::Block
        } else if !manual_reasons.is_empty() {
            GuardrailDecision::AllowManual
        } else {
            GuardrailDecision::Allow
        };

        Ok(GuardrailVerdict { decision, blocked_reasons, manual_reasons, checked_rules })
    }
}

impl Default for GuardrailEvaluator {
    fn default() -> Self {
        Self::with_default_rules()
    }
}
