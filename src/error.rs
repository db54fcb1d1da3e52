use crate::models::PriceSource;

/// Top-level error type for swingbot.
///
/// Split along the recovery boundaries the control loop cares about:
/// transient I/O (retry next cycle), insufficient data (skip), invalid trade
/// parameters (reject before execution), and everything else.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("no reasonable price: all providers exhausted and no cached quote")]
    NoReasonablePrice,

    #[error("price provider {source} failed: {reason}")]
    Provider { source: PriceSource, reason: String },

    #[error("invalid stop: entry price {entry} equals stop price")]
    InvalidStop { entry: f64 },

    #[error("insufficient data: have {have} candles, need {needed}")]
    InsufficientData { have: usize, needed: usize },

    #[error("invalid historical candles: {0}")]
    InvalidHistory(String),

    #[error("invalid trade size: {0}")]
    InvalidTradeSize(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("oracle quote rejected: {0}")]
    OracleQuote(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl BotError {
    /// Transient failures are swallowed by the control loop and retried on
    /// the next cycle; everything else is a hard reject of the current step.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BotError::NoReasonablePrice
                | BotError::Provider { .. }
                | BotError::Http(_)
                | BotError::OracleQuote(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
