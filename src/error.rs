//! Error taxonomy for the core. Each subsystem gets its own enum; the
//! facade-level [`KontextError`] wraps them so callers have one type to
//! match on at the boundary.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DigestError {
    #[error("action id is empty")]
    EmptyActionId,
    #[error("action with id {0:?} was already appended")]
    DuplicateAction(String),
    #[error("failed to canonicalize action for hashing: {0}")]
    CanonicalizationFailed(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("id is empty")]
    EmptyId,
    #[error("timestamp is malformed: {0}")]
    MalformedTimestamp(String),
    #[error("amount {0:?} does not parse as a decimal")]
    InvalidAmount(String),
    #[error("task {0} not found")]
    TaskNotFound(String),
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task {0} not found")]
    NotFound(String),
    #[error("task {0} is already confirmed")]
    AlreadyConfirmed(String),
    #[error("task {0} expired at {1}")]
    Expired(String, String),
    #[error("missing required evidence keys: {0:?}")]
    InsufficientEvidence(Vec<String>),
    #[error("illegal task transition: {from:?} -> {to:?}")]
    IllegalTransition { from: String, to: String },
}

#[derive(Error, Debug)]
pub enum AnomalyConfigError {
    #[error("cannot enable anomaly detection with an empty rule set")]
    EmptyRuleSet,
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("{field} is required")]
    MissingField { field: &'static str },
    #[error("{field} is malformed: {reason}")]
    Malformed { field: &'static str, reason: String },
}

/// Cross-cutting gate failure: the caller's plan tier doesn't unlock a
/// feature. The core only raises this for the one predicate it owns
/// (extended chain support); broader plan gating lives in the adapter.
#[derive(Error, Debug)]
#[error("feature requires plan tier {required_tier}")]
pub struct PlanRequired {
    pub required_tier: String,
}

#[derive(Error, Debug)]
pub enum KontextError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Digest(#[from] DigestError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    AnomalyConfig(#[from] AnomalyConfigError),
    #[error(transparent)]
    PlanRequired(#[from] PlanRequired),
    #[error("chain invariant violated at sequence {sequence}: {detail}")]
    ChainInvariant { sequence: u64, detail: String },
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded after {completed} of {total} items")]
    DeadlineExceeded { completed: usize, total: usize },
}

pub type Result<T> = std::result::Result<T, KontextError>;
