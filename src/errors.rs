use sea_orm::error::DbErr;
use thiserror::Error;

/// Error taxonomy for the purchase engine.
///
/// Out-of-stock is deliberately absent: it is a legitimate business outcome,
/// modeled as [`crate::services::ledger::FinalizeOutcome::OutOfStock`] and as
/// a terminal state-machine reply, never as an error.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] DbErr),

    /// Payment provider unreachable or returned malformed data. Distinct from
    /// a `pending` payment status: "poll again" and "something is wrong" must
    /// never be conflated.
    #[error("payment provider error: {0}")]
    Provider(String),

    /// The ledger's atomicity contract failed to hold. Must never occur;
    /// surfaced loudly instead of silently dropping stock or purchases.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl CoreError {
    /// Whether the buyer can sensibly retry the same action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Provider(_))
    }

    /// Message safe to render to the buyer. Names the next action and never
    /// exposes internal detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "This item is no longer available.",
            Self::Storage(_) => "Something went wrong on our side. Please try again in a moment.",
            Self::Provider(_) => {
                "The payment service is not responding right now. Please try again."
            }
            Self::InvariantViolation(_) => {
                "Something went wrong with your purchase. Please contact support."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(CoreError::Provider("timeout".into()).is_retryable());
        assert!(CoreError::Storage(DbErr::Custom("pool exhausted".into())).is_retryable());
        assert!(!CoreError::NotFound("product".into()).is_retryable());
        assert!(!CoreError::InvariantViolation("x".into()).is_retryable());
    }

    #[test]
    fn user_messages_hide_internals() {
        let err = CoreError::Storage(DbErr::Custom("connection refused to 10.0.0.3".into()));
        assert!(!err.user_message().contains("10.0.0.3"));

        let err = CoreError::Provider("500 from https://pay.example/api".into());
        assert!(!err.user_message().contains("pay.example"));
        // Retryable errors tell the buyer to try again.
        assert!(err.user_message().contains("try again"));
    }
}
