//! The standard guardrail rule set.
//!
//! Restorative actions synthesized by the rollback monitor
//! (`action.is_rollback()`) are exempt from the history-based gates
//! (cooldown, one-lever, rate-limit) and from data sufficiency; they
//! restore a previous state rather than propose a new one. The remaining
//! gates still apply to them.

use async_trait::async_trait;

use super::{GuardrailContext, GuardrailRule, RuleOutcome};
use crate::domain::action::{ActionCategory, EntityType, Lever};
use crate::domain::policy::AutomationMode;
use crate::ledger::LedgerError;

/// Gate 1: the client's automation mode decides whether anything may run at
/// all, and whether it runs hands-off or via human approval.
pub struct AutomationModeRule;

#[async_trait]
impl GuardrailRule for AutomationModeRule {
    fn id(&self) -> &'static str {
        "automation_mode"
    }

    async fn evaluate(&self, ctx: &GuardrailContext<'_>) -> Result<RuleOutcome, LedgerError> {
        Ok(match ctx.policy.automation_mode {
            AutomationMode::Insights => RuleOutcome::Violation(
                "automation mode is insights-only; no mutations are permitted".to_string(),
            ),
            AutomationMode::Suggest => RuleOutcome::RequireManual(
                "automation mode is suggest; this change requires manual approval".to_string(),
            ),
            AutomationMode::Autopilot => RuleOutcome::Pass,
        })
    }
}

/// Gate 2: entities on the protected list, and brand campaigns, are never
/// touched.
pub struct ProtectedEntityRule;

#[async_trait]
impl GuardrailRule for ProtectedEntityRule {
    fn id(&self) -> &'static str {
        "protected_entity"
    }

    async fn evaluate(&self, ctx: &GuardrailContext<'_>) -> Result<RuleOutcome, LedgerError> {
        let entity = &ctx.action.entity;

        if ctx.policy.is_protected(&entity.entity_id) {
            return Ok(RuleOutcome::Violation(format!(
                "entity {entity} is on the protected list"
            )));
        }

        if entity.entity_type == EntityType::Campaign && ctx.policy.is_brand_campaign(&entity.entity_id)
        {
            return Ok(RuleOutcome::Violation(format!(
                "campaign {} is brand-protected",
                entity.entity_id
            )));
        }

        Ok(RuleOutcome::Pass)
    }
}

/// Gate 3: per-lever minimum evidence before acting. Bid changes need a
/// week of click volume; keyword pauses and ad pauses need a month of
/// signal, because sparse data makes their downside irreversible in
/// practice.
pub struct DataSufficiencyRule;

#[async_trait]
impl GuardrailRule for DataSufficiencyRule {
    fn id(&self) -> &'static str {
        "data_sufficiency"
    }

    async fn evaluate(&self, ctx: &GuardrailContext<'_>) -> Result<RuleOutcome, LedgerError> {
        if ctx.action.is_rollback() {
            return Ok(RuleOutcome::Pass);
        }

        let thresholds = &ctx.policy.evidence;
        let evidence = &ctx.action.evidence;

        match (ctx.action.lever, ctx.action.category()) {
            (Lever::Bid, _) | (Lever::ProductBid, _) => match evidence.clicks_7d().or_else(|| evidence.clicks_30d()) {
                Some(clicks) if ctx.action.lever == Lever::Bid => {
                    if clicks < thresholds.min_bid_clicks_7d {
                        return Ok(RuleOutcome::Violation(format!(
                            "insufficient data: bid changes require at least {} clicks in the trailing 7 days, observed {clicks}",
                            thresholds.min_bid_clicks_7d
                        )));
                    }
                    Ok(RuleOutcome::Pass)
                }
                Some(clicks) => {
                    if clicks < thresholds.min_bid_clicks_7d {
                        return Ok(RuleOutcome::Violation(format!(
                            "insufficient data: product bid changes require at least {} observed clicks, observed {clicks}",
                            thresholds.min_bid_clicks_7d
                        )));
                    }
                    Ok(RuleOutcome::Pass)
                }
                None => Ok(RuleOutcome::Violation(
                    "insufficient data: no click evidence supplied for a bid change".to_string(),
                )),
            },
            (_, ActionCategory::KeywordPause) => match evidence.clicks_30d() {
                Some(clicks) if clicks >= thresholds.min_keyword_pause_clicks_30d => {
                    Ok(RuleOutcome::Pass)
                }
                Some(clicks) => Ok(RuleOutcome::Violation(format!(
                    "insufficient data: keyword pauses require at least {} clicks in the trailing 30 days, observed {clicks}",
                    thresholds.min_keyword_pause_clicks_30d
                ))),
                None => Ok(RuleOutcome::Violation(
                    "insufficient data: no click evidence supplied for a keyword pause".to_string(),
                )),
            },
            (_, ActionCategory::AdPause) => match evidence.impressions_30d() {
                Some(impressions) if impressions >= thresholds.min_ad_pause_impressions_30d => {
                    Ok(RuleOutcome::Pass)
                }
                Some(impressions) => Ok(RuleOutcome::Violation(format!(
                    "insufficient data: CTR-based ad pauses require at least {} impressions in the trailing 30 days, observed {impressions}",
                    thresholds.min_ad_pause_impressions_30d
                ))),
                None => Ok(RuleOutcome::Violation(
                    "insufficient data: no impression evidence supplied for an ad pause".to_string(),
                )),
            },
            _ => Ok(RuleOutcome::Pass),
        }
    }
}

/// Gate 4: magnitude cap. Applies to every action, including rollbacks:
/// an inverse of an in-cap change is itself in cap.
pub struct MagnitudeRule;

#[async_trait]
impl GuardrailRule for MagnitudeRule {
    fn id(&self) -> &'static str {
        "magnitude"
    }

    async fn evaluate(&self, ctx: &GuardrailContext<'_>) -> Result<RuleOutcome, LedgerError> {
        let change_pct = ctx.action.change_pct();
        let cap = ctx.policy.max_change_pct_for(ctx.action.lever);

        if change_pct.abs() > cap {
            return Ok(RuleOutcome::Violation(format!(
                "change of {:.1}% exceeds the ±{cap}% cap for the {} lever",
                change_pct, ctx.action.lever
            )));
        }

        Ok(RuleOutcome::Pass)
    }
}

/// Gate 5: cooldown. The same entity/lever pair may not be changed twice
/// inside the lever's cooldown window. Dry-run entries count: repeated
/// dry-runs observe the same cadence a live run would.
pub struct CooldownRule;

#[async_trait]
impl GuardrailRule for CooldownRule {
    fn id(&self) -> &'static str {
        "cooldown"
    }

    async fn evaluate(&self, ctx: &GuardrailContext<'_>) -> Result<RuleOutcome, LedgerError> {
        if ctx.action.is_rollback() {
            return Ok(RuleOutcome::Pass);
        }

        let cooldown = ctx.policy.cooldown_for(ctx.action.lever);
        let last = ctx
            .ledger
            .last_change(&ctx.action.customer_id, &ctx.action.entity.entity_id, ctx.action.lever)
            .await?;

        if let Some(changed_at) = last {
            let elapsed = ctx.now - changed_at;
            if elapsed < cooldown {
                return Ok(RuleOutcome::Violation(format!(
                    "the {} lever on {} changed {} hours ago; cooldown is {} days",
                    ctx.action.lever,
                    ctx.action.entity,
                    elapsed.num_hours(),
                    cooldown.num_days()
                )));
            }
        }

        Ok(RuleOutcome::Pass)
    }
}

/// Gate 6: anti-oscillation. If a different, confounding lever moved on the
/// same entity inside this lever's cooldown window, attribution for a new
/// change would be ambiguous, so the change waits.
pub struct OneLeverRule;

#[async_trait]
impl GuardrailRule for OneLeverRule {
    fn id(&self) -> &'static str {
        "one_lever"
    }

    async fn evaluate(&self, ctx: &GuardrailContext<'_>) -> Result<RuleOutcome, LedgerError> {
        if ctx.action.is_rollback() {
            return Ok(RuleOutcome::Pass);
        }

        let cooldown = ctx.policy.cooldown_for(ctx.action.lever);
        let since = ctx.now - cooldown;
        let recent = ctx
            .ledger
            .changes_for_entity_since(&ctx.action.customer_id, &ctx.action.entity.entity_id, since)
            .await?;

        let conflicting = recent
            .iter()
            .find(|entry| entry.lever != ctx.action.lever && ctx.action.lever.confounds(entry.lever));

        if let Some(entry) = conflicting {
            return Ok(RuleOutcome::Violation(format!(
                "the {} lever on {} changed within the cooldown window; holding the {} change to keep attribution clean",
                entry.lever, ctx.action.entity, ctx.action.lever
            )));
        }

        Ok(RuleOutcome::Pass)
    }
}

/// Gate 7: daily rate limit per action category. Counts are read from the
/// ledger, so items executed earlier in the same batch consume the cap for
/// later ones.
pub struct RateLimitRule;

#[async_trait]
impl GuardrailRule for RateLimitRule {
    fn id(&self) -> &'static str {
        "rate_limit"
    }

    async fn evaluate(&self, ctx: &GuardrailContext<'_>) -> Result<RuleOutcome, LedgerError> {
        if ctx.action.is_rollback() {
            return Ok(RuleOutcome::Pass);
        }

        let category = ctx.action.category();
        let Some(cap) = ctx.policy.daily_cap_for(category) else {
            return Ok(RuleOutcome::Pass);
        };

        let executed_today = ctx
            .ledger
            .count_actions(&ctx.action.customer_id, category, ctx.now.date_naive())
            .await?;

        if executed_today >= cap {
            return Ok(RuleOutcome::Violation(format!(
                "daily cap of {cap} {} actions reached ({executed_today} already executed today)",
                category.as_str()
            )));
        }

        Ok(RuleOutcome::Pass)
    }
}

/// Gate 8: entity-state preconditions. An ad pause must leave enough active
/// ads behind, and out-of-stock or feed-flagged products are never mutated.
pub struct EntityStateRule;

#[async_trait]
impl GuardrailRule for EntityStateRule {
    fn id(&self) -> &'static str {
        "entity_state"
    }

    async fn evaluate(&self, ctx: &GuardrailContext<'_>) -> Result<RuleOutcome, LedgerError> {
        let action = ctx.action;

        if action.category() == ActionCategory::AdPause {
            if let Some(active) = action.evidence.active_ads_in_group() {
                let remaining = active.saturating_sub(1);
                if remaining < ctx.policy.min_active_ads {
                    return Ok(RuleOutcome::Violation(format!(
                        "pausing this ad would leave {remaining} active ads in the group; minimum is {}",
                        ctx.policy.min_active_ads
                    )));
                }
            }
        }

        if action.entity.entity_type == EntityType::Product {
            if action.evidence.out_of_stock() == Some(true) {
                return Ok(RuleOutcome::Violation(
                    "product is out of stock; mutations are withheld until it returns".to_string(),
                ));
            }
            if action.evidence.feed_quality_flagged() == Some(true) {
                return Ok(RuleOutcome::Violation(
                    "product carries feed quality flags; mutations are withheld".to_string(),
                ));
            }
        }

        Ok(RuleOutcome::Pass)
    }
}
