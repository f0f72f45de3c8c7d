pub mod alerting;
pub mod config;
pub mod domain;
pub mod errors;
pub mod executor;
pub mod guardrails;
pub mod ledger;
pub mod monitor;
pub mod mutation;
pub mod performance_store;

pub use chrono;
pub use rust_decimal;

pub use alerting::{
    AlertMessage, AlertSink, InMemoryAlertSink, RollbackAlert, SweepSummary, WindowSnapshot,
};
pub use domain::action::{
    ActionCategory, CandidateAction, EntityRef, EntityType, Evidence, Lever, RiskTier,
};
pub use domain::ledger::{ChangeId, LedgerEntry, NewLedgerEntry, RollbackStatus};
pub use domain::performance::{DateRange, DeltaError, PerformanceDelta, PerformanceWindow};
pub use domain::policy::{
    AutomationMode, ClientPolicy, EvidenceThresholds, MonitoringPolicy, PolicyCache, PolicyError,
    PrimaryKpi, RiskTolerance,
};
pub use errors::ApplicationError;
pub use executor::{
    BatchResult, BlockedAction, CustomerLocks, ExecutedChange, ExecutionError, ExecutionMode,
    Executor, FailedMutation,
};
pub use guardrails::{GuardrailDecision, GuardrailEvaluator, GuardrailRule, GuardrailVerdict};
pub use ledger::{
    ChangeLedger, InMemoryChangeLedger, LedgerError, LedgerReader, LedgerWriter, RollbackUpdate,
};
pub use monitor::{EntryOutcome, MonitoringOutcome, RollbackMonitor, SweepError, SweepReport};
pub use mutation::{
    ChangeRequest, MutationClient, MutationError, MutationReceipt, ScriptedMutationClient,
    SimulatedMutationClient,
};
pub use performance_store::{PerformanceError, PerformanceReader, StaticPerformanceReader};
