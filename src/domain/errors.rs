use thiserror::Error;

/// Errors raised by the candle cache.
#[derive(Debug, Error)]
pub enum MarketCacheError {
    #[error("no candle summary for symbol {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("no candle buffer for {symbol}/{interval}")]
    IntervalNotFound { symbol: String, interval: String },
}

/// Errors raised by the message queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("MUST_COMMIT_BEFORE_CONSUMING")]
    MustCommitBeforeConsuming,

    #[error("NO_MESSAGE")]
    NoMessage,
}

/// Errors raised by the priority heap / signal service.
#[derive(Debug, Error)]
pub enum HeapError {
    #[error("no heap registered for interval {interval}")]
    UnknownInterval { interval: String },
}

/// Errors raised by the decision engine and order executor.
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("invalid decision input: {reason}")]
    InvalidInput { reason: String },

    #[error("order execution failed: {reason}")]
    ExecutionFailed { reason: String },
}

/// Safety/guard rule violations.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("rule {rule} triggered: {message}")]
    RuleTriggered { rule: String, message: String },
}

/// Market-data connectivity errors.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("invalid market data for {symbol}: {reason}")]
    InvalidData { symbol: String, reason: String },

    #[error("rate limit exceeded: retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_error_messages_match_protocol_strings() {
        assert_eq!(
            QueueError::MustCommitBeforeConsuming.to_string(),
            "MUST_COMMIT_BEFORE_CONSUMING"
        );
        assert_eq!(QueueError::NoMessage.to_string(), "NO_MESSAGE");
    }
}
