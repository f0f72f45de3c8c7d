//! Seam to the advertising-platform mutation API.
//!
//! The real client lives outside this core; the executor only needs a
//! blocking, possibly-failing call per entity per lever. Failures are data
//! returned to the caller, never retried here.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::action::{CandidateAction, EntityRef, Lever};

/// One mutation against one entity/lever pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub customer_id: String,
    pub entity: EntityRef,
    pub lever: Lever,
    pub current_value: Decimal,
    pub proposed_value: Decimal,
}

impl ChangeRequest {
    pub fn from_action(action: &CandidateAction) -> Self {
        Self {
            customer_id: action.customer_id.clone(),
            entity: action.entity.clone(),
            lever: action.lever,
            current_value: action.current_value,
            proposed_value: action.proposed_value,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationReceipt {
    pub reference: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationError {
    #[error("mutation rejected by platform: {0}")]
    Rejected(String),
    #[error("platform rate limited the request: {0}")]
    RateLimited(String),
    #[error("mutation timed out after {0} seconds")]
    Timeout(u64),
    #[error("transport failure: {0}")]
    Transport(String),
}

impl MutationError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "rejected",
            Self::RateLimited(_) => "rate_limited",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
        }
    }
}

#[async_trait]
pub trait MutationClient: Send + Sync {
    async fn apply(&self, request: &ChangeRequest) -> Result<MutationReceipt, MutationError>;
}

/// Applies nothing and always succeeds. Used for demos and environments
/// without platform credentials; the dry-run path never reaches any client.
#[derive(Debug, Default)]
pub struct SimulatedMutationClient;

impl SimulatedMutationClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MutationClient for SimulatedMutationClient {
    async fn apply(&self, _request: &ChangeRequest) -> Result<MutationReceipt, MutationError> {
        Ok(MutationReceipt { reference: format!("sim-{}", Uuid::new_v4()), applied_at: Utc::now() })
    }
}

/// Test double with per-entity scripted failures and a call log.
#[derive(Debug, Default)]
pub struct ScriptedMutationClient {
    failures: Mutex<HashMap<String, MutationError>>,
    calls: Mutex<Vec<ChangeRequest>>,
}

impl ScriptedMutationClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_entity(&self, entity_id: impl Into<String>, error: MutationError) {
        match self.failures.lock() {
            Ok(mut failures) => {
                failures.insert(entity_id.into(), error);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(entity_id.into(), error);
            }
        }
    }

    pub fn calls(&self) -> Vec<ChangeRequest> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl MutationClient for ScriptedMutationClient {
    async fn apply(&self, request: &ChangeRequest) -> Result<MutationReceipt, MutationError> {
        match self.calls.lock() {
            Ok(mut calls) => calls.push(request.clone()),
            Err(poisoned) => poisoned.into_inner().push(request.clone()),
        }

        let scripted = match self.failures.lock() {
            Ok(failures) => failures.get(&request.entity.entity_id).cloned(),
            Err(poisoned) => poisoned.into_inner().get(&request.entity.entity_id).cloned(),
        };

        match scripted {
            Some(error) => Err(error),
            None => Ok(MutationReceipt {
                reference: format!("scripted-{}", Uuid::new_v4()),
                applied_at: Utc::now(),
            }),
        }
    }
}
