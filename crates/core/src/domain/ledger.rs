use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::action::{ActionCategory, CandidateAction, EntityRef, Lever, RiskTier};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeId(pub i64);

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of the rollback linkage on a ledger entry.
///
/// Transitions are forward-only: `none -> monitoring -> {rolled_back |
/// confirmed_good}`. Both end states are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    None,
    Monitoring,
    RolledBack,
    ConfirmedGood,
}

impl RollbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Monitoring => "monitoring",
            Self::RolledBack => "rolled_back",
            Self::ConfirmedGood => "confirmed_good",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "monitoring" => Some(Self::Monitoring),
            "rolled_back" => Some(Self::RolledBack),
            "confirmed_good" => Some(Self::ConfirmedGood),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, to: RollbackStatus) -> bool {
        matches!(
            (self, to),
            (Self::None, Self::Monitoring)
                | (Self::Monitoring, Self::RolledBack)
                | (Self::Monitoring, Self::ConfirmedGood)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RolledBack | Self::ConfirmedGood)
    }
}

/// Immutable record of one applied change.
///
/// Value fields are write-once; only the rollback fields transition after
/// insert, and only forward. Blocked attempts are never journaled; the
/// ledger records applied state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub change_id: ChangeId,
    pub customer_id: String,
    pub entity: EntityRef,
    pub lever: Lever,
    pub action_category: ActionCategory,
    pub old_value: Decimal,
    pub new_value: Decimal,
    pub change_pct: Decimal,
    pub executed_at: DateTime<Utc>,
    pub approved_by: String,
    pub rule_id: String,
    pub risk_tier: RiskTier,
    pub confidence: f64,
    pub evidence_json: String,
    pub evidence_fingerprint: String,
    pub rationale: String,
    pub metadata: BTreeMap<String, String>,
    pub rollback_status: RollbackStatus,
    pub rollback_of_id: Option<ChangeId>,
    pub rollback_reason: Option<String>,
    pub monitoring_started_at: Option<DateTime<Utc>>,
    pub monitoring_completed_at: Option<DateTime<Utc>>,
}

/// Ledger entry pending id assignment by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub customer_id: String,
    pub entity: EntityRef,
    pub lever: Lever,
    pub action_category: ActionCategory,
    pub old_value: Decimal,
    pub new_value: Decimal,
    pub change_pct: Decimal,
    pub executed_at: DateTime<Utc>,
    pub approved_by: String,
    pub rule_id: String,
    pub risk_tier: RiskTier,
    pub confidence: f64,
    pub evidence_json: String,
    pub evidence_fingerprint: String,
    pub rationale: String,
    pub metadata: BTreeMap<String, String>,
    pub rollback_status: RollbackStatus,
    pub rollback_of_id: Option<ChangeId>,
    pub monitoring_started_at: Option<DateTime<Utc>>,
}

impl NewLedgerEntry {
    pub fn from_action(
        action: &CandidateAction,
        approved_by: impl Into<String>,
        executed_at: DateTime<Utc>,
        rollback_status: RollbackStatus,
        monitoring_started_at: Option<DateTime<Utc>>,
    ) -> Self {
        let evidence_json = match serde_json::to_string(&action.evidence) {
            Ok(payload) => payload,
            Err(_) => "{}".to_string(),
        };
        let evidence_fingerprint = fingerprint(&evidence_json);

        Self {
            customer_id: action.customer_id.clone(),
            entity: action.entity.clone(),
            lever: action.lever,
            action_category: action.category(),
            old_value: action.current_value,
            new_value: action.proposed_value,
            change_pct: action.change_pct(),
            executed_at,
            approved_by: approved_by.into(),
            rule_id: action.rule_id.clone(),
            risk_tier: action.risk_tier,
            confidence: action.confidence,
            evidence_json,
            evidence_fingerprint,
            rationale: action.rationale.clone(),
            metadata: BTreeMap::new(),
            rollback_status,
            rollback_of_id: action.rollback_of,
            monitoring_started_at,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn into_entry(self, change_id: ChangeId) -> LedgerEntry {
        LedgerEntry {
            change_id,
            customer_id: self.customer_id,
            entity: self.entity,
            lever: self.lever,
            action_category: self.action_category,
            old_value: self.old_value,
            new_value: self.new_value,
            change_pct: self.change_pct,
            executed_at: self.executed_at,
            approved_by: self.approved_by,
            rule_id: self.rule_id,
            risk_tier: self.risk_tier,
            confidence: self.confidence,
            evidence_json: self.evidence_json,
            evidence_fingerprint: self.evidence_fingerprint,
            rationale: self.rationale,
            metadata: self.metadata,
            rollback_status: self.rollback_status,
            rollback_of_id: self.rollback_of_id,
            rollback_reason: None,
            monitoring_started_at: self.monitoring_started_at,
            monitoring_completed_at: None,
        }
    }
}

pub fn fingerprint(payload: &str) -> String {
    let digest = Sha256::digest(payload.as_bytes());
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
