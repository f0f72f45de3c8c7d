//! SQL-backed change ledger.
//!
//! Appends are single-row inserts; the only update path touches the rollback
//! fields and carries the expected prior status in its `WHERE` clause, so
//! value fields are write-once and status transitions are monotonic at the
//! storage layer as well as in the domain type.

use std::collections::BTreeMap;
use std::str::FromStr;

use adpilot_core::chrono::{DateTime, NaiveDate, Utc};
use adpilot_core::domain::action::{ActionCategory, EntityRef, EntityType, Lever, RiskTier};
use adpilot_core::domain::ledger::{ChangeId, LedgerEntry, NewLedgerEntry, RollbackStatus};
use adpilot_core::ledger::{LedgerError, LedgerReader, LedgerWriter, RollbackUpdate};
use adpilot_core::rust_decimal::Decimal;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::RepositoryError;
use crate::DbPool;

const ENTRY_COLUMNS: &str = "change_id, customer_id, entity_type, entity_id, lever, \
     action_category, old_value, new_value, change_pct, executed_at, approved_by, rule_id, \
     risk_tier, confidence, evidence_json, evidence_fingerprint, rationale, metadata_json, \
     rollback_status, rollback_of_id, rollback_reason, monitoring_started_at, \
     monitoring_completed_at";

pub struct SqlChangeLedger {
    pool: DbPool,
}

impl SqlChangeLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch_entry(&self, change_id: ChangeId) -> Result<Option<LedgerEntry>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM change_ledger WHERE change_id = ?"
        ))
        .bind(change_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(entry_from_row).transpose()
    }
}

#[async_trait]
impl LedgerReader for SqlChangeLedger {
    async fn last_change(
        &self,
        customer_id: &str,
        entity_id: &str,
        lever: Lever,
    ) -> Result<Option<DateTime<Utc>>, LedgerError> {
        let row = sqlx::query(
            "SELECT MAX(executed_at) AS executed_at
             FROM change_ledger
             WHERE customer_id = ? AND entity_id = ? AND lever = ?",
        )
        .bind(customer_id)
        .bind(entity_id)
        .bind(lever.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let executed_at: Option<String> = row.get("executed_at");
        executed_at
            .map(|value| parse_timestamp(&value))
            .transpose()
            .map_err(LedgerError::from)
    }

    async fn changes_for_entity_since(
        &self,
        customer_id: &str,
        entity_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS}
             FROM change_ledger
             WHERE customer_id = ? AND entity_id = ? AND executed_at > ?
             ORDER BY executed_at ASC"
        ))
        .bind(customer_id)
        .bind(entity_id)
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.iter()
            .map(entry_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(LedgerError::from)
    }

    async fn count_actions(
        &self,
        customer_id: &str,
        category: ActionCategory,
        date: NaiveDate,
    ) -> Result<u32, LedgerError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count
             FROM change_ledger
             WHERE customer_id = ? AND action_category = ? AND executed_date = ?",
        )
        .bind(customer_id)
        .bind(category.as_str())
        .bind(date.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let count: i64 = row.get("count");
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn entries_due_for_monitoring(
        &self,
        customer_id: &str,
        executed_before: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS}
             FROM change_ledger
             WHERE customer_id = ? AND rollback_status = 'monitoring' AND executed_at <= ?
             ORDER BY executed_at ASC"
        ))
        .bind(customer_id)
        .bind(executed_before.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.iter()
            .map(entry_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(LedgerError::from)
    }

    async fn entry(&self, change_id: ChangeId) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self.fetch_entry(change_id).await?)
    }
}

#[async_trait]
impl LedgerWriter for SqlChangeLedger {
    async fn append(&self, entry: NewLedgerEntry) -> Result<LedgerEntry, LedgerError> {
        let metadata_json = serde_json::to_string(&entry.metadata)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        let result = sqlx::query(
            "INSERT INTO change_ledger (
                customer_id, entity_type, entity_id, lever, action_category,
                old_value, new_value, change_pct, executed_at, executed_date,
                approved_by, rule_id, risk_tier, confidence, evidence_json,
                evidence_fingerprint, rationale, metadata_json, rollback_status,
                rollback_of_id, monitoring_started_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.customer_id)
        .bind(entry.entity.entity_type.as_str())
        .bind(&entry.entity.entity_id)
        .bind(entry.lever.as_str())
        .bind(entry.action_category.as_str())
        .bind(entry.old_value.to_string())
        .bind(entry.new_value.to_string())
        .bind(entry.change_pct.to_string())
        .bind(entry.executed_at.to_rfc3339())
        .bind(entry.executed_at.date_naive().to_string())
        .bind(&entry.approved_by)
        .bind(&entry.rule_id)
        .bind(entry.risk_tier.as_str())
        .bind(entry.confidence)
        .bind(&entry.evidence_json)
        .bind(&entry.evidence_fingerprint)
        .bind(&entry.rationale)
        .bind(metadata_json)
        .bind(entry.rollback_status.as_str())
        .bind(entry.rollback_of_id.map(|id| id.0))
        .bind(entry.monitoring_started_at.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let change_id = ChangeId(result.last_insert_rowid());
        Ok(entry.into_entry(change_id))
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

        let result = sqlx::query(
            "UPDATE change_ledger
             SET rollback_status = ?,
                 rollback_of_id = COALESCE(?, rollback_of_id),
                 rollback_reason = COALESCE(?, rollback_reason),
                 monitoring_completed_at = COALESCE(?, monitoring_completed_at)
             WHERE change_id = ? AND rollback_status = ?",
        )
        .bind(to.as_str())
        .bind(update.rollback_of_id.map(|id| id.0))
        .bind(update.rollback_reason.as_deref())
        .bind(update.monitoring_completed_at.map(|value| value.to_rfc3339()))
        .bind(change_id.0)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 0 {
            return match self.fetch_entry(change_id).await? {
                Some(_) => Err(LedgerError::Conflict { change_id, expected: from }),
                None => Err(LedgerError::NotFound(change_id)),
            };
        }

        self.fetch_entry(change_id)
            .await?
            .ok_or(LedgerError::NotFound(change_id))
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<LedgerEntry, RepositoryError> {
    let entity_type = parse_with(row.get::<String, _>("entity_type"), EntityType::parse, "entity_type")?;
    let lever = parse_with(row.get::<String, _>("lever"), Lever::parse, "lever")?;
    let action_category =
        parse_with(row.get::<String, _>("action_category"), ActionCategory::parse, "action_category")?;
    let risk_tier = parse_with(row.get::<String, _>("risk_tier"), RiskTier::parse, "risk_tier")?;
    let rollback_status =
        parse_with(row.get::<String, _>("rollback_status"), RollbackStatus::parse, "rollback_status")?;

    let metadata: BTreeMap<String, String> =
        serde_json::from_str(&row.get::<String, _>("metadata_json"))
            .map_err(|error| RepositoryError::Decode(format!("metadata_json: {error}")))?;

    Ok(LedgerEntry {
        change_id: ChangeId(row.get::<i64, _>("change_id")),
        customer_id: row.get("customer_id"),
        entity: EntityRef { entity_type, entity_id: row.get("entity_id") },
        lever,
        action_category,
        old_value: parse_decimal(&row.get::<String, _>("old_value"), "old_value")?,
        new_value: parse_decimal(&row.get::<String, _>("new_value"), "new_value")?,
        change_pct: parse_decimal(&row.get::<String, _>("change_pct"), "change_pct")?,
        executed_at: parse_timestamp(&row.get::<String, _>("executed_at"))?,
        approved_by: row.get("approved_by"),
        rule_id: row.get("rule_id"),
        risk_tier,
        confidence: row.get("confidence"),
        evidence_json: row.get("evidence_json"),
        evidence_fingerprint: row.get("evidence_fingerprint"),
        rationale: row.get("rationale"),
        metadata,
        rollback_status,
        rollback_of_id: row.get::<Option<i64>, _>("rollback_of_id").map(ChangeId),
        rollback_reason: row.get("rollback_reason"),
        monitoring_started_at: row
            .get::<Option<String>, _>("monitoring_started_at")
            .map(|value| parse_timestamp(&value))
            .transpose()?,
        monitoring_completed_at: row
            .get::<Option<String>, _>("monitoring_completed_at")
            .map(|value| parse_timestamp(&value))
            .transpose()?,
    })
}

fn parse_with<T>(
    value: String,
    parse: impl Fn(&str) -> Option<T>,
    column: &str,
) -> Result<T, RepositoryError> {
    parse(&value).ok_or_else(|| RepositoryError::Decode(format!("{column}: unknown value `{value}`")))
}

fn parse_decimal(value: &str, column: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("timestamp: {error}")))
}

#[cfg(test)]
mod tests {
    use adpilot_core::chrono::{Duration, Utc};
    use adpilot_core::domain::action::{
        ActionCategory, CandidateAction, EntityRef, EntityType, Evidence, Lever, RiskTier,
    };
    use adpilot_core::domain::ledger::{NewLedgerEntry, RollbackStatus};
    use adpilot_core::ledger::{LedgerError, LedgerReader, LedgerWriter, RollbackUpdate};
    use adpilot_core::rust_decimal::Decimal;

    use super::SqlChangeLedger;
    use crate::{connect_with_settings, migrations};

    async fn ledger() -> SqlChangeLedger {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlChangeLedger::new(pool)
    }

    fn action(entity_id: &str, lever: Lever) -> CandidateAction {
        CandidateAction {
            rule_id: "budget_scaler".to_string(),
            customer_id: "cust-1".to_string(),
            entity: EntityRef::new(EntityType::Campaign, entity_id),
            lever,
            current_value: Decimal::new(100_00, 2),
            proposed_value: Decimal::new(108_00, 2),
            risk_tier: RiskTier::Medium,
            confidence: 0.82,
            evidence: Evidence::Budget {
                spend_7d: Decimal::new(640_00, 2),
                conversions_7d: 31,
                budget_utilization_pct: Decimal::new(96, 0),
            },
            rationale: "utilization consistently above 95%".to_string(),
            rollback_of: None,
        }
    }

    #[tokio::test]
    async fn append_then_read_round_trips_every_field() {
        let ledger = ledger().await;
        let now = Utc::now();

        let appended = ledger
            .append(
                NewLedgerEntry::from_action(
                    &action("cmp-1", Lever::Budget),
                    "autopilot",
                    now,
                    RollbackStatus::Monitoring,
                    Some(now),
                )
                .with_metadata("platform_reference", "op-123"),
            )
            .await
            .expect("append");

        let loaded = ledger
            .entry(appended.change_id)
            .await
            .expect("query")
            .expect("entry exists");

        assert_eq!(loaded.customer_id, "cust-1");
        assert_eq!(loaded.entity.entity_id, "cmp-1");
        assert_eq!(loaded.lever, Lever::Budget);
        assert_eq!(loaded.action_category, ActionCategory::BudgetChange);
        assert_eq!(loaded.old_value, Decimal::new(100_00, 2));
        assert_eq!(loaded.new_value, Decimal::new(108_00, 2));
        assert_eq!(loaded.change_pct, Decimal::new(8, 0));
        assert_eq!(loaded.rollback_status, RollbackStatus::Monitoring);
        assert_eq!(loaded.metadata.get("platform_reference").map(String::as_str), Some("op-123"));
        assert_eq!(loaded.evidence_fingerprint, appended.evidence_fingerprint);
    }

    #[tokio::test]
    async fn cooldown_and_rate_limit_query_shapes() {
        let ledger = ledger().await;
        let now = Utc::now();

        ledger
            .append(NewLedgerEntry::from_action(
                &action("cmp-1", Lever::Budget),
                "autopilot",
                now - Duration::days(2),
                RollbackStatus::Monitoring,
                None,
            ))
            .await
            .expect("append");
        ledger
            .append(NewLedgerEntry::from_action(
                &action("cmp-1", Lever::Bid),
                "autopilot",
                now,
                RollbackStatus::Monitoring,
                None,
            ))
            .await
            .expect("append");

        let last_budget =
            ledger.last_change("cust-1", "cmp-1", Lever::Budget).await.expect("query");
        assert!(last_budget.is_some());
        let last_status = ledger.last_change("cust-1", "cmp-1", Lever::Status).await.expect("query");
        assert_eq!(last_status, None);

        let since = ledger
            .changes_for_entity_since("cust-1", "cmp-1", now - Duration::days(1))
            .await
            .expect("query");
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].lever, Lever::Bid);

        let today_bids = ledger
            .count_actions("cust-1", ActionCategory::BidChange, now.date_naive())
            .await
            .expect("count");
        assert_eq!(today_bids, 1);
        let today_budgets = ledger
            .count_actions("cust-1", ActionCategory::BudgetChange, now.date_naive())
            .await
            .expect("count");
        assert_eq!(today_budgets, 0, "the budget change was two days ago");
    }

    #[tokio::test]
    async fn entries_due_for_monitoring_filters_status_and_age() {
        let ledger = ledger().await;
        let now = Utc::now();

        let due = ledger
            .append(NewLedgerEntry::from_action(
                &action("cmp-1", Lever::Budget),
                "autopilot",
                now - Duration::days(5),
                RollbackStatus::Monitoring,
                Some(now - Duration::days(5)),
            ))
            .await
            .expect("append");
        ledger
            .append(NewLedgerEntry::from_action(
                &action("cmp-2", Lever::Budget),
                "autopilot",
                now - Duration::hours(10),
                RollbackStatus::Monitoring,
                Some(now - Duration::hours(10)),
            ))
            .await
            .expect("append");
        ledger
            .append(NewLedgerEntry::from_action(
                &action("cmp-3", Lever::Budget),
                "dry_run",
                now - Duration::days(6),
                RollbackStatus::None,
                None,
            ))
            .await
            .expect("append");

        let entries = ledger
            .entries_due_for_monitoring("cust-1", now - Duration::hours(72))
            .await
            .expect("query");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].change_id, due.change_id);
    }

    #[tokio::test]
    async fn transitions_are_guarded_in_sql() {
        let ledger = ledger().await;
        let now = Utc::now();

        let entry = ledger
            .append(NewLedgerEntry::from_action(
                &action("cmp-1", Lever::Budget),
                "autopilot",
                now - Duration::days(5),
                RollbackStatus::Monitoring,
                Some(now - Duration::days(5)),
            ))
            .await
            .expect("append");

        // Backward transition is rejected before touching the database.
        let backward = ledger
            .transition_rollback_status(
                entry.change_id,
                RollbackStatus::Monitoring,
                RollbackStatus::None,
                RollbackUpdate::default(),
            )
            .await;
        assert!(matches!(backward, Err(LedgerError::InvalidTransition { .. })));

        let rolled_back = ledger
            .transition_rollback_status(
                entry.change_id,
                RollbackStatus::Monitoring,
                RollbackStatus::RolledBack,
                RollbackUpdate {
                    rollback_of_id: Some(entry.change_id),
                    rollback_reason: Some("CPA regression".to_string()),
                    monitoring_completed_at: Some(now),
                },
            )
            .await
            .expect("transition");
        assert_eq!(rolled_back.rollback_status, RollbackStatus::RolledBack);
        assert_eq!(rolled_back.rollback_reason.as_deref(), Some("CPA regression"));

        // The stored status no longer matches, so the same transition now
        // conflicts instead of double-applying.
        let replay = ledger
            .transition_rollback_status(
                entry.change_id,
                RollbackStatus::Monitoring,
                RollbackStatus::ConfirmedGood,
                RollbackUpdate::default(),
            )
            .await;
        assert!(matches!(replay, Err(LedgerError::Conflict { .. })));

        // Value fields never changed across the transition.
        let reloaded = ledger.entry(entry.change_id).await.expect("query").expect("exists");
        assert_eq!(reloaded.old_value, entry.old_value);
        assert_eq!(reloaded.new_value, entry.new_value);
        assert_eq!(reloaded.executed_at, entry.executed_at);
    }
}
