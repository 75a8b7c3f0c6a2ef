use thiserror::Error;

/// Everything that can go wrong between the meter and the attribute store.
///
/// `Configuration` and `IdentityUnavailable` only ever surface during startup
/// and stop the process. The rest are raised per poll tick and are isolated
/// by the scheduler.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("meter response does not contain a 'mac' attribute")]
    IdentityUnavailable,

    #[error("meter unreachable: {0}")]
    MeterUnreachable(String),

    #[error("invalid meter response: {0}")]
    InvalidResponse(String),

    #[error("channel {channel} not reported by meter ({available} channels available)")]
    ChannelOutOfRange { channel: usize, available: usize },

    #[error("publish failed: {0}")]
    PublishFailure(String),
}

impl BridgeError {
    /// True for faults the poll loop swallows and retries on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::MeterUnreachable(_)
                | BridgeError::InvalidResponse(_)
                | BridgeError::PublishFailure(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
