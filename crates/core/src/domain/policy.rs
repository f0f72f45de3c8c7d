use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::action::{ActionCategory, Lever};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationMode {
    /// Read-only: surface findings, never mutate.
    Insights,
    /// Propose changes; a human applies them.
    Suggest,
    /// Apply changes automatically within guardrails.
    Autopilot,
}

impl AutomationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insights => "insights",
            Self::Suggest => "suggest",
            Self::Autopilot => "autopilot",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "insights" => Some(Self::Insights),
            "suggest" => Some(Self::Suggest),
            "autopilot" => Some(Self::Autopilot),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Conservative,
    Standard,
    Aggressive,
}

impl RiskTolerance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Standard => "standard",
            Self::Aggressive => "aggressive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "conservative" => Some(Self::Conservative),
            "standard" => Some(Self::Standard),
            "aggressive" => Some(Self::Aggressive),
            _ => None,
        }
    }

    /// Scales the per-lever magnitude caps.
    pub fn cap_multiplier(&self) -> Decimal {
        match self {
            Self::Conservative => Decimal::new(5, 1),
            Self::Standard => Decimal::ONE,
            Self::Aggressive => Decimal::new(15, 1),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryKpi {
    Cpa,
    Roas,
}

impl PrimaryKpi {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpa => "cpa",
            Self::Roas => "roas",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cpa" => Some(Self::Cpa),
            "roas" => Some(Self::Roas),
            _ => None,
        }
    }
}

/// Minimum evidence required before a lever may be pulled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceThresholds {
    pub min_bid_clicks_7d: u32,
    pub min_keyword_pause_clicks_30d: u32,
    pub min_ad_pause_impressions_30d: u64,
}

impl Default for EvidenceThresholds {
    fn default() -> Self {
        Self {
            min_bid_clicks_7d: 30,
            min_keyword_pause_clicks_30d: 30,
            min_ad_pause_impressions_30d: 1_000,
        }
    }
}

/// Knobs for the post-change monitoring window and regression triggers.
/// Trigger percentages are positive magnitudes; the direction is implied by
/// the KPI (CPA rises, ROAS/value/conversions fall).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringPolicy {
    pub min_monitoring_hours: i64,
    pub monitoring_window_days: i64,
    pub max_monitoring_days: i64,
    pub cpa_rise_trigger_pct: Decimal,
    pub conversions_drop_trigger_pct: Decimal,
    pub roas_drop_trigger_pct: Decimal,
    pub value_drop_trigger_pct: Decimal,
}

impl Default for MonitoringPolicy {
    fn default() -> Self {
        Self {
            min_monitoring_hours: 72,
            monitoring_window_days: 7,
            max_monitoring_days: 30,
            cpa_rise_trigger_pct: Decimal::new(20, 0),
            conversions_drop_trigger_pct: Decimal::new(10, 0),
            roas_drop_trigger_pct: Decimal::new(15, 0),
            value_drop_trigger_pct: Decimal::new(15, 0),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("client policy validation failed: {0}")]
    Validation(String),
}

/// Immutable per-client policy passed into every guardrail, executor, and
/// monitor call. Loaded by an external configuration collaborator; this core
/// only validates and reads it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientPolicy {
    pub customer_id: String,
    pub automation_mode: AutomationMode,
    pub risk_tolerance: RiskTolerance,
    pub primary_kpi: PrimaryKpi,
    /// Per-lever overrides of the magnitude cap, in percent (pre-scaling).
    pub max_change_pct: BTreeMap<Lever, Decimal>,
    /// Per-lever overrides of the cooldown, in days.
    pub cooldown_days: BTreeMap<Lever, i64>,
    /// Per-category daily execution caps; absent categories are uncapped.
    pub daily_caps: BTreeMap<ActionCategory, u32>,
    pub protected_entities: BTreeSet<String>,
    pub brand_campaigns: BTreeSet<String>,
    pub min_active_ads: u32,
    pub evidence: EvidenceThresholds,
    pub monitoring: MonitoringPolicy,
}

impl Default for ClientPolicy {
    fn default() -> Self {
        Self {
            customer_id: String::new(),
            automation_mode: AutomationMode::Suggest,
            risk_tolerance: RiskTolerance::Standard,
            primary_kpi: PrimaryKpi::Cpa,
            max_change_pct: BTreeMap::new(),
            cooldown_days: BTreeMap::new(),
            daily_caps: BTreeMap::new(),
            protected_entities: BTreeSet::new(),
            brand_campaigns: BTreeSet::new(),
            min_active_ads: 2,
            evidence: EvidenceThresholds::default(),
            monitoring: MonitoringPolicy::default(),
        }
    }
}

impl ClientPolicy {
    pub fn new(customer_id: impl Into<String>) -> Self {
        Self { customer_id: customer_id.into(), ..Self::default() }
    }

    /// Effective magnitude cap for a lever: policy override or lever
    /// default, scaled by risk tolerance.
    pub fn max_change_pct_for(&self, lever: Lever) -> Decimal {
        let base = self
            .max_change_pct
            .get(&lever)
            .copied()
            .unwrap_or_else(|| lever.default_max_change_pct());
        base * self.risk_tolerance.cap_multiplier()
    }

    pub fn cooldown_for(&self, lever: Lever) -> Duration {
        let days = self.cooldown_days.get(&lever).copied().unwrap_or_else(|| lever.default_cooldown_days());
        Duration::days(days)
    }

    pub fn daily_cap_for(&self, category: ActionCategory) -> Option<u32> {
        self.daily_caps.get(&category).copied()
    }

    pub fn is_protected(&self, entity_id: &str) -> bool {
        self.protected_entities.contains(entity_id)
    }

    pub fn is_brand_campaign(&self, campaign_id: &str) -> bool {
        self.brand_campaigns.contains(campaign_id)
    }

    /// Fails fast on malformed policy; callers must reject the whole run
    /// before any mutation is attempted.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.customer_id.trim().is_empty() {
            return Err(PolicyError::Validation("customer_id must not be empty".to_string()));
        }

        for (lever, cap) in &self.max_change_pct {
            if *cap <= Decimal::ZERO {
                return Err(PolicyError::Validation(format!(
                    "max_change_pct for {lever} must be positive"
                )));
            }
        }

        for (lever, days) in &self.cooldown_days {
            if *days <= 0 {
                return Err(PolicyError::Validation(format!(
                    "cooldown_days for {lever} must be positive"
                )));
            }
        }

        for (category, cap) in &self.daily_caps {
            if *cap == 0 {
                return Err(PolicyError::Validation(format!(
                    "daily cap for {} must be positive (omit the category to uncap it)",
                    category.as_str()
                )));
            }
        }

        let monitoring = &self.monitoring;
        if monitoring.min_monitoring_hours < 1 {
            return Err(PolicyError::Validation(
                "monitoring.min_monitoring_hours must be at least 1".to_string(),
            ));
        }
        if !(7..=14).contains(&monitoring.monitoring_window_days) {
            return Err(PolicyError::Validation(
                "monitoring.monitoring_window_days must be in range 7..=14".to_string(),
            ));
        }
        if monitoring.max_monitoring_days <= monitoring.monitoring_window_days {
            return Err(PolicyError::Validation(
                "monitoring.max_monitoring_days must exceed the monitoring window".to_string(),
            ));
        }
        for (name, value) in [
            ("cpa_rise_trigger_pct", monitoring.cpa_rise_trigger_pct),
            ("conversions_drop_trigger_pct", monitoring.conversions_drop_trigger_pct),
            ("roas_drop_trigger_pct", monitoring.roas_drop_trigger_pct),
            ("value_drop_trigger_pct", monitoring.value_drop_trigger_pct),
        ] {
            if value <= Decimal::ZERO {
                return Err(PolicyError::Validation(format!(
                    "monitoring.{name} must be positive"
                )));
            }
        }

        Ok(())
    }
}

/// Short-lived per-process cache of loaded client policies, keyed by
/// customer id with explicit invalidation. Replaces ambient mutable state:
/// callers still receive an owned, immutable `ClientPolicy` value.
#[derive(Debug, Default)]
pub struct PolicyCache {
    inner: Mutex<HashMap<String, ClientPolicy>>,
}

impl PolicyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, customer_id: &str) -> Option<ClientPolicy> {
        match self.inner.lock() {
            Ok(cache) => cache.get(customer_id).cloned(),
            Err(poisoned) => poisoned.into_inner().get(customer_id).cloned(),
        }
    }

    pub fn insert(&self, policy: ClientPolicy) {
        let key = policy.customer_id.clone();
        match self.inner.lock() {
            Ok(mut cache) => {
                cache.insert(key, policy);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key, policy);
            }
        }
    }

    pub fn invalidate(&self, customer_id: &str) {
        match self.inner.lock() {
            Ok(mut cache) => {
                cache.remove(customer_id);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(customer_id);
            }
        }
    }

    pub fn clear(&self) {
        match self.inner.lock() {
            Ok(mut cache) => cache.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}
