use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::ledger::ChangeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Campaign,
    AdGroup,
    Keyword,
    Ad,
    Product,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Campaign => "campaign",
            Self::AdGroup => "ad_group",
            Self::Keyword => "keyword",
            Self::Ad => "ad",
            Self::Product => "product",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "campaign" => Some(Self::Campaign),
            "ad_group" => Some(Self::AdGroup),
            "keyword" => Some(Self::Keyword),
            "ad" => Some(Self::Ad),
            "product" => Some(Self::Product),
            _ => None,
        }
    }
}

/// The dimension of an entity being changed.
///
/// Levers are the unit of cooldown and attribution: two changes to the same
/// lever on one entity compete for the cooldown window, and a change to any
/// *other* lever on that entity confounds causal attribution (see
/// [`Lever::confounds`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lever {
    Budget,
    Bid,
    Status,
    Keyword,
    Ad,
    ProductBid,
    Exclusion,
}

impl Lever {
    pub const ALL: [Lever; 7] = [
        Lever::Budget,
        Lever::Bid,
        Lever::Status,
        Lever::Keyword,
        Lever::Ad,
        Lever::ProductBid,
        Lever::Exclusion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Budget => "budget",
            Self::Bid => "bid",
            Self::Status => "status",
            Self::Keyword => "keyword",
            Self::Ad => "ad",
            Self::ProductBid => "product_bid",
            Self::Exclusion => "exclusion",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "budget" => Some(Self::Budget),
            "bid" => Some(Self::Bid),
            "status" => Some(Self::Status),
            "keyword" => Some(Self::Keyword),
            "ad" => Some(Self::Ad),
            "product_bid" => Some(Self::ProductBid),
            "exclusion" => Some(Self::Exclusion),
            _ => None,
        }
    }

    /// Baseline cooldown before the same lever may be touched again on an
    /// entity. Keyword and exclusion changes need longer observation because
    /// their conversion signal is sparser.
    pub fn default_cooldown_days(&self) -> i64 {
        match self {
            Self::Keyword | Self::Exclusion => 14,
            _ => 7,
        }
    }

    /// Default magnitude cap on a single change, in percent.
    pub fn default_max_change_pct(&self) -> Decimal {
        Decimal::new(10, 0)
    }

    /// Lever independence matrix.
    ///
    /// A change to `other` on the same entity confounds attribution for a
    /// change to `self`. Every distinct lever pair confounds (including
    /// `Status`, which gates delivery for all other levers), so the matrix
    /// reduces to inequality. Kept as an explicit method so the boundary is
    /// documented and testable rather than inferred from action strings.
    pub fn confounds(&self, other: Lever) -> bool {
        *self != other
    }
}

impl fmt::Display for Lever {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rate-limit bucket for daily caps, derived from the entity/lever pair and
/// the direction of the change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    BudgetChange,
    BidChange,
    KeywordAdd,
    KeywordPause,
    AdPause,
    AdEnable,
    ProductBidChange,
    ExclusionAdd,
    StatusChange,
}

impl ActionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BudgetChange => "budget_change",
            Self::BidChange => "bid_change",
            Self::KeywordAdd => "keyword_add",
            Self::KeywordPause => "keyword_pause",
            Self::AdPause => "ad_pause",
            Self::AdEnable => "ad_enable",
            Self::ProductBidChange => "product_bid_change",
            Self::ExclusionAdd => "exclusion_add",
            Self::StatusChange => "status_change",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "budget_change" => Some(Self::BudgetChange),
            "bid_change" => Some(Self::BidChange),
            "keyword_add" => Some(Self::KeywordAdd),
            "keyword_pause" => Some(Self::KeywordPause),
            "ad_pause" => Some(Self::AdPause),
            "ad_enable" => Some(Self::AdEnable),
            "product_bid_change" => Some(Self::ProductBidChange),
            "exclusion_add" => Some(Self::ExclusionAdd),
            "status_change" => Some(Self::StatusChange),
            _ => None,
        }
    }

    /// Status-like levers encode active=1 / paused=0 in the proposed value;
    /// everything else maps straight from the lever.
    pub fn derive(entity_type: EntityType, lever: Lever, proposed_value: Decimal) -> Self {
        match (entity_type, lever) {
            (EntityType::Keyword, Lever::Keyword) | (EntityType::Keyword, Lever::Status) => {
                if proposed_value.is_zero() {
                    Self::KeywordPause
                } else {
                    Self::KeywordAdd
                }
            }
            (EntityType::Ad, Lever::Ad) | (EntityType::Ad, Lever::Status) => {
                if proposed_value.is_zero() {
                    Self::AdPause
                } else {
                    Self::AdEnable
                }
            }
            (_, Lever::Budget) => Self::BudgetChange,
            (_, Lever::Bid) => Self::BidChange,
            (_, Lever::ProductBid) => Self::ProductBidChange,
            (_, Lever::Exclusion) => Self::ExclusionAdd,
            (_, Lever::Status) => Self::StatusChange,
            (_, Lever::Keyword) => Self::KeywordAdd,
            (_, Lever::Ad) => Self::AdPause,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self { entity_type, entity_id: entity_id.into() }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type.as_str(), self.entity_id)
    }
}

/// Supporting metrics attached to a candidate action, typed per lever so each
/// guardrail rule reads exactly the fields it needs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
    Budget {
        spend_7d: Decimal,
        conversions_7d: u32,
        budget_utilization_pct: Decimal,
    },
    Bid {
        clicks_7d: u32,
        conversions_7d: u32,
        cost_7d: Decimal,
    },
    Keyword {
        clicks_30d: u32,
        conversions_30d: u32,
        quality_score: Option<u8>,
    },
    Ad {
        impressions_30d: u64,
        clicks_30d: u32,
        ctr_30d: Decimal,
        active_ads_in_group: u32,
    },
    Product {
        clicks_30d: u32,
        out_of_stock: bool,
        feed_quality_flagged: bool,
    },
    #[default]
    None,
}

impl Evidence {
    pub fn clicks_7d(&self) -> Option<u32> {
        match self {
            Self::Bid { clicks_7d, .. } => Some(*clicks_7d),
            _ => None,
        }
    }

    pub fn clicks_30d(&self) -> Option<u32> {
        match self {
            Self::Keyword { clicks_30d, .. }
            | Self::Ad { clicks_30d, .. }
            | Self::Product { clicks_30d, .. } => Some(*clicks_30d),
            _ => None,
        }
    }

    pub fn impressions_30d(&self) -> Option<u64> {
        match self {
            Self::Ad { impressions_30d, .. } => Some(*impressions_30d),
            _ => None,
        }
    }

    pub fn active_ads_in_group(&self) -> Option<u32> {
        match self {
            Self::Ad { active_ads_in_group, .. } => Some(*active_ads_in_group),
            _ => None,
        }
    }

    pub fn out_of_stock(&self) -> Option<bool> {
        match self {
            Self::Product { out_of_stock, .. } => Some(*out_of_stock),
            _ => None,
        }
    }

    pub fn feed_quality_flagged(&self) -> Option<bool> {
        match self {
            Self::Product { feed_quality_flagged, .. } => Some(*feed_quality_flagged),
            _ => None,
        }
    }
}

/// A proposed mutation, produced by the rule-evaluation step (or synthesized
/// by the rollback monitor) and not yet applied. Immutable once created;
/// consumed exactly once by the guardrail/executor path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateAction {
    pub rule_id: String,
    pub customer_id: String,
    pub entity: EntityRef,
    pub lever: Lever,
    pub current_value: Decimal,
    pub proposed_value: Decimal,
    pub risk_tier: RiskTier,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Evidence,
    pub rationale: String,
    /// Set only on actions synthesized by the rollback monitor: the ledger
    /// entry this action reverses. Restorative actions are exempt from
    /// cooldown, data-sufficiency, anti-oscillation, and rate-limit gates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_of: Option<ChangeId>,
}

impl CandidateAction {
    /// Signed percentage change implied by the proposal. Zero when the
    /// current value is zero (new budgets and status flips have no
    /// meaningful relative magnitude).
    pub fn change_pct(&self) -> Decimal {
        if self.current_value.is_zero() {
            return Decimal::ZERO;
        }
        (self.proposed_value - self.current_value) / self.current_value * Decimal::ONE_HUNDRED
    }

    pub fn category(&self) -> ActionCategory {
        ActionCategory::derive(self.entity.entity_type, self.lever, self.proposed_value)
    }

    pub fn is_rollback(&self) -> bool {
        self.rollback_of.is_some()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{ActionCategory, CandidateAction, EntityRef, EntityType, Evidence, Lever, RiskTier};

    fn budget_action(current: i64, proposed: i64) -> CandidateAction {
        CandidateAction {
            rule_id: "budget_scaler".to_string(),
            customer_id: "cust-1".to_string(),
            entity: EntityRef::new(EntityType::Campaign, "cmp-100"),
            lever: Lever::Budget,
            current_value: Decimal::new(current, 2),
            proposed_value: Decimal::new(proposed, 2),
            risk_tier: RiskTier::Low,
            confidence: 0.9,
            evidence: Evidence::None,
            rationale: "budget headroom".to_string(),
            rollback_of: None,
        }
    }

    #[test]
    fn lever_codec_round_trips() {
        for lever in Lever::ALL {
            assert_eq!(Lever::parse(lever.as_str()), Some(lever));
        }
    }

    #[test]
    fn change_pct_is_signed_and_relative() {
        assert_eq!(budget_action(10_000, 11_000).change_pct(), Decimal::new(10, 0));
        assert_eq!(budget_action(10_000, 9_500).change_pct(), Decimal::new(-5, 0));
    }

    #[test]
    fn change_pct_with_zero_current_value_is_zero() {
        assert_eq!(budget_action(0, 5_000).change_pct(), Decimal::ZERO);
    }

    #[test]
    fn every_distinct_lever_pair_confounds() {
        for a in Lever::ALL {
            for b in Lever::ALL {
                assert_eq!(a.confounds(b), a != b, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn category_derivation_distinguishes_pause_from_add() {
        assert_eq!(
            ActionCategory::derive(EntityType::Keyword, Lever::Keyword, Decimal::ZERO),
            ActionCategory::KeywordPause
        );
        assert_eq!(
            ActionCategory::derive(EntityType::Keyword, Lever::Keyword, Decimal::ONE),
            ActionCategory::KeywordAdd
        );
        assert_eq!(
            ActionCategory::derive(EntityType::Ad, Lever::Status, Decimal::ZERO),
            ActionCategory::AdPause
        );
        assert_eq!(
            ActionCategory::derive(EntityType::Campaign, Lever::Budget, Decimal::ONE),
            ActionCategory::BudgetChange
        );
        assert_eq!(
            ActionCategory::derive(EntityType::Product, Lever::ProductBid, Decimal::ONE),
            ActionCategory::ProductBidChange
        );
    }

    #[test]
    fn evidence_accessors_expose_only_their_variant_fields() {
        let keyword = Evidence::Keyword { clicks_30d: 42, conversions_30d: 3, quality_score: Some(7) };
        assert_eq!(keyword.clicks_30d(), Some(42));
        assert_eq!(keyword.clicks_7d(), None);
        assert_eq!(keyword.impressions_30d(), None);

        let ad = Evidence::Ad {
            impressions_30d: 1_500,
            clicks_30d: 60,
            ctr_30d: Decimal::new(4, 2),
            active_ads_in_group: 3,
        };
        assert_eq!(ad.impressions_30d(), Some(1_500));
        assert_eq!(ad.active_ads_in_group(), Some(3));
        assert_eq!(ad.out_of_stock(), None);
    }
}
