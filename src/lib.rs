//! Compliance and trust layer for autonomous agents executing financial
//! transactions: a tamper-evident digest chain, an in-memory action
//! store, stateless sanctions/threshold screening, and history-derived
//! trust scoring with rule-based anomaly detection, wired behind a
//! single synchronous `Context` facade.

pub mod action_store;
pub mod compliance;
pub mod config;
pub mod decimal;
pub mod digest_chain;
pub mod error;
pub mod export;
pub mod orchestrator;
pub mod storage;
pub mod timestamp;
pub mod trust;
pub mod value;

pub use action_store::{
    Action, ActionStore, ActionType, AnomalyEvent, ApprovalDecision, ApprovalFields, Severity, Task,
    TaskStatus, ToolCallFields,
};
pub use compliance::{ComplianceCheck, ComplianceConfig, ComplianceEngine, ComplianceVerdict, RiskLevel};
pub use config::ContextConfig;
pub use decimal::Amount;
pub use digest_chain::{DigestChain, DigestLink, VerifyReport};
pub use error::{KontextError, Result};
pub use orchestrator::{Context, VerifyInput, VerifyResult};
pub use timestamp::PreciseTimestamp;
pub use trust::{TrustLevel, TrustScore, TrustScorer};
pub use value::Value;
