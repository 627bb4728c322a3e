use thiserror::Error;

/// Validation errors raised while building domain records
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid timeframe: {0}")]
    InvalidTimeframe(String),

    #[error("Invalid option symbol {symbol}: {reason}")]
    InvalidOptionSymbol { symbol: String, reason: String },

    #[error("Invalid bar at {timestamp}: {reason}")]
    InvalidBar { timestamp: String, reason: String },
}
