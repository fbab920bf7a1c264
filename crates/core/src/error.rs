use thiserror::Error;

/// Error taxonomy for the trade lifecycle engine.
///
/// Callers branch on the kind: gate rejections and missing contracts are
/// normal outcomes persisted on the alert, transient broker errors are
/// retried, and invariant violations signal a bug.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Alert malformed or missing required fields. Surfaced to the caller,
    /// never persisted as an ERROR state.
    #[error("validation error: {0}")]
    Validation(String),

    /// Webhook secret mismatch.
    #[error("invalid webhook secret")]
    Auth,

    /// A risk-gate predicate failed. Carries the machine-readable reason code.
    #[error("gate rejection: {0}")]
    GateRejection(String),

    /// Contract selection found nothing liquid enough to trade.
    #[error("no liquid contract for {0}")]
    NoLiquidContract(String),

    /// Network failure, 5xx, or rate limit. Retry with backoff; never a
    /// state transition.
    #[error("transient broker error: {0}")]
    TransientBroker(String),

    /// Order rejected or expired by the broker.
    #[error("permanent broker error: {0}")]
    PermanentBroker(String),

    /// An illegal state transition was attempted. Bug signal.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl EngineError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientBroker(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
