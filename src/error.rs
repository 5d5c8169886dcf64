// =============================================================================
// Error taxonomy — every failure in the engine falls into one of these kinds
// =============================================================================
//
// Recovery policy by kind:
//   TransientIo   — retry/backoff locally, never surfaces as a trade failure
//   DataStale     — skip the dependent trade, continue the tick
//   ValidationReject — arithmetic degeneracy / insufficient history; callers
//                   see Option::None rather than this error in hot paths
//   RiskReject    — risk gate refusal, logged with a reason code
//   OrderRejected — CLOB rejected the order; the market enters cooldown
//   Fatal         — unrecoverable; the only kind allowed to reach main()
// =============================================================================

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("transient IO error: {0}")]
    TransientIo(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("stale data: {0}")]
    DataStale(String),

    #[error("validation reject: {0}")]
    ValidationReject(String),

    #[error("risk reject: {0}")]
    RiskReject(String),

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl BotError {
    /// True when the caller should retry with backoff instead of bubbling up.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientIo(_) | Self::Http(_) | Self::WebSocket(_) | Self::DataStale(_)
        )
    }

    /// Only Fatal may propagate to the top of the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BotError::TransientIo("dns".into()).is_transient());
        assert!(BotError::DataStale("feed silent".into()).is_transient());
        assert!(!BotError::OrderRejected("bad price".into()).is_transient());
        assert!(!BotError::Fatal("corrupt store".into()).is_transient());
    }

    #[test]
    fn only_fatal_is_fatal() {
        assert!(BotError::Fatal("unreadable config".into()).is_fatal());
        assert!(!BotError::RiskReject("exposure".into()).is_fatal());
    }
}
