//! Deterministic demo seeds for the change ledger.
//!
//! Three entries covering the interesting lifecycle states: a budget change
//! still under monitoring, a bid change that aged to confirmed-good, and a
//! keyword pause that was rolled back (with its inverse entry). Used by the
//! `seed` CLI command and smoke checks.

use adpilot_core::chrono::{Duration, Utc};
use adpilot_core::domain::action::{CandidateAction, EntityRef, EntityType, Evidence, Lever, RiskTier};
use adpilot_core::domain::ledger::{NewLedgerEntry, RollbackStatus};
use adpilot_core::ledger::{LedgerError, LedgerReader, LedgerWriter, RollbackUpdate};
use adpilot_core::rust_decimal::Decimal;

use crate::repositories::SqlChangeLedger;
use crate::DbPool;

pub const SEED_CUSTOMER_ID: &str = "demo-customer";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub entries_created: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedVerification {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub async fn load(pool: &DbPool) -> Result<SeedResult, LedgerError> {
        let ledger = SqlChangeLedger::new(pool.clone());
        let now = Utc::now();
        let mut entries_created = 0;

        // Idempotent: re-seeding an already-seeded database is a no-op.
        let existing = ledger
            .changes_for_entity_since(SEED_CUSTOMER_ID, "demo-cmp-monitoring", now - Duration::days(90))
            .await?;
        if !existing.is_empty() {
            return Ok(SeedResult { entries_created: 0 });
        }

        let monitored = budget_action("demo-cmp-monitoring", 100_00, 108_00);
        ledger
            .append(NewLedgerEntry::from_action(
                &monitored,
                "autopilot",
                now - Duration::days(4),
                RollbackStatus::Monitoring,
                Some(now - Duration::days(4)),
            ))
            .await?;
        entries_created += 1;

        let confirmed = bid_action("demo-kw-confirmed", 1_50, 1_60);
        let confirmed_entry = ledger
            .append(NewLedgerEntry::from_action(
                &confirmed,
                "autopilot",
                now - Duration::days(12),
                RollbackStatus::Monitoring,
                Some(now - Duration::days(12)),
            ))
            .await?;
        ledger
            .transition_rollback_status(
                confirmed_entry.change_id,
                RollbackStatus::Monitoring,
                RollbackStatus::ConfirmedGood,
                RollbackUpdate {
                    monitoring_completed_at: Some(now - Duration::days(5)),
                    ..RollbackUpdate::default()
                },
            )
            .await?;
        entries_created += 1;

        let paused = keyword_pause("demo-kw-rolled-back");
        let paused_entry = ledger
            .append(NewLedgerEntry::from_action(
                &paused,
                "autopilot",
                now - Duration::days(10),
                RollbackStatus::Monitoring,
                Some(now - Duration::days(10)),
            ))
            .await?;

        let mut inverse = paused.clone();
        inverse.rule_id = "rollback_monitor".to_string();
        inverse.current_value = paused.proposed_value;
        inverse.proposed_value = paused.current_value;
        inverse.rollback_of = Some(paused_entry.change_id);
        inverse.rationale = "conversions fell after the pause".to_string();
        let inverse_entry = ledger
            .append(NewLedgerEntry::from_action(
                &inverse,
                "rollback_monitor",
                now - Duration::days(3),
                RollbackStatus::None,
                None,
            ))
            .await?;
        ledger
            .transition_rollback_status(
                paused_entry.change_id,
                RollbackStatus::Monitoring,
                RollbackStatus::RolledBack,
                RollbackUpdate {
                    rollback_of_id: Some(inverse_entry.change_id),
                    rollback_reason: Some(format!(
                        "conversions fell -22.0% after the pause; reversed by change {}",
                        inverse_entry.change_id
                    )),
                    monitoring_completed_at: Some(now - Duration::days(3)),
                },
            )
            .await?;
        entries_created += 2;

        Ok(SeedResult { entries_created })
    }

    pub async fn verify(pool: &DbPool) -> Result<SeedVerification, LedgerError> {
        let ledger = SqlChangeLedger::new(pool.clone());
        let since = Utc::now() - Duration::days(90);

        let mut checks = Vec::new();
        for (name, entity_id, status) in [
            ("monitoring_entry", "demo-cmp-monitoring", RollbackStatus::Monitoring),
            ("confirmed_good_entry", "demo-kw-confirmed", RollbackStatus::ConfirmedGood),
            ("rolled_back_entry", "demo-kw-rolled-back", RollbackStatus::RolledBack),
        ] {
            let entries =
                ledger.changes_for_entity_since(SEED_CUSTOMER_ID, entity_id, since).await?;
            let present = entries.iter().any(|entry| entry.rollback_status == status);
            checks.push((name, present));
        }

        let rollback_entries = ledger
            .changes_for_entity_since(SEED_CUSTOMER_ID, "demo-kw-rolled-back", since)
            .await?;
        let linked = rollback_entries.iter().any(|entry| entry.rollback_of_id.is_some());
        checks.push(("rollback_linkage", linked));

        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(SeedVerification { all_present, checks })
    }
}

fn budget_action(entity_id: &str, current_cents: i64, proposed_cents: i64) -> CandidateAction {
    CandidateAction {
        rule_id: "budget_scaler".to_string(),
        customer_id: SEED_CUSTOMER_ID.to_string(),
        entity: EntityRef::new(EntityType::Campaign, entity_id),
        lever: Lever::Budget,
        current_value: Decimal::new(current_cents, 2),
        proposed_value: Decimal::new(proposed_cents, 2),
        risk_tier: RiskTier::Low,
        confidence: 0.88,
        evidence: Evidence::Budget {
            spend_7d: Decimal::new(670_00, 2),
            conversions_7d: 34,
            budget_utilization_pct: Decimal::new(97, 0),
        },
        rationale: "budget utilization consistently above 95%".to_string(),
        rollback_of: None,
    }
}

fn bid_action(entity_id: &str, current_cents: i64, proposed_cents: i64) -> CandidateAction {
    CandidateAction {
        rule_id: "bid_raiser".to_string(),
        customer_id: SEED_CUSTOMER_ID.to_string(),
        entity: EntityRef::new(EntityType::Keyword, entity_id),
        lever: Lever::Bid,
        current_value: Decimal::new(current_cents, 2),
        proposed_value: Decimal::new(proposed_cents, 2),
        risk_tier: RiskTier::Medium,
        confidence: 0.74,
        evidence: Evidence::Bid {
            clicks_7d: 58,
            conversions_7d: 6,
            cost_7d: Decimal::new(92_00, 2),
        },
        rationale: "conversion rate above ad group average".to_string(),
        rollback_of: None,
    }
}

fn keyword_pause(entity_id: &str) -> CandidateAction {
    CandidateAction {
        rule_id: "keyword_pruner".to_string(),
        customer_id: SEED_CUSTOMER_ID.to_string(),
        entity: EntityRef::new(EntityType::Keyword, entity_id),
        lever: Lever::Keyword,
        current_value: Decimal::ONE,
        proposed_value: Decimal::ZERO,
        risk_tier: RiskTier::High,
        confidence: 0.61,
        evidence: Evidence::Keyword { clicks_30d: 84, conversions_30d: 0, quality_score: Some(3) },
        rationale: "84 clicks and zero conversions in 30 days".to_string(),
        rollback_of: None,
    }
}
