use crate::{FarmName, FarmSet};
use std::{fmt, time::Duration};

/// Accepts load balancer configuration.
///
/// Declarations are upserts by farm name; the sink never infers removals from
/// them, so removed farms and backends are deleted explicitly. Deleting
/// something that does not exist succeeds.
#[async_trait::async_trait]
pub trait ConfigSink: Send + Sync {
    async fn apply(&self, farms: &FarmSet) -> Result<(), SinkError>;

    async fn delete_farm(&self, farm: &FarmName) -> Result<(), SinkError>;

    async fn delete_backend(&self, farm: &FarmName, backend: &str) -> Result<(), SinkError>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SinkOp {
    Apply,
    DeleteFarm,
    DeleteBackend,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("unexpected response status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

// === impl SinkOp ===

impl SinkOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::DeleteFarm => "delete_farm",
            Self::DeleteBackend => "delete_backend",
        }
    }
}

impl fmt::Display for SinkOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl SinkError ===

impl SinkError {
    /// Client errors are not retried: resending the same request cannot
    /// succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => {
                !(400..500).contains(status) || *status == 408 || *status == 429
            }
            Self::Timeout(_) | Self::Transport(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable() {
        let status = |status| SinkError::Status {
            status,
            body: String::new(),
        };
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(401).is_retryable());
        assert!(SinkError::Timeout(Duration::from_secs(1)).is_retryable());
    }
}
