pub mod allocator;
pub mod anomaly;
pub mod bandit;
pub mod config;
pub mod domain;
pub mod drift;
pub mod engine;
pub mod errors;
pub mod guardrails;
pub mod persistence;
pub mod stats;

mod sync;

pub use allocator::{AllocatorHealth, AllocatorMetrics, AllocatorSettings, BudgetAllocator};
pub use anomaly::{AnomalyDetector, AnomalyMetrics, AnomalyRecord, AnomalySettings, AnomalySink, Severity};
pub use bandit::{BanditEngine, PerformanceSignal, RecalibrationReport, Selection};
pub use domain::allocation::{
    AllocationDecision, AllocationLine, AllocationPlan, AllocationStrategy, DecisionId,
};
pub use domain::arm::{Arm, ArmCategory, ArmId, TacticPayload};
pub use domain::campaign::{Campaign, CampaignId, CampaignPatch};
pub use domain::context::{DecisionContext, RawDecisionContext};
pub use domain::outcome::Outcome;
pub use drift::{DriftCheck, DriftDetector, DriftMetrics, DriftStatus};
pub use engine::{DecisionEngine, EngineSettings, EngineStatus, FlushReport, OutcomeReport, RestoreReport};
pub use errors::{ApplicationError, DomainError, InterfaceError, PersistenceError};
pub use guardrails::{GuardrailSnapshot, GuardrailState, GuardrailThresholds, Guardrails};
pub use persistence::{DocumentKind, StateStore};
