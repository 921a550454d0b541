use std::time::Duration;
use thiserror::Error;

/// Failure of a single exchange with the translation service
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("translation service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response body: {0}")]
    Decode(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: TransportError,
    },

    #[error("request was cancelled before it was admitted")]
    QueueCancelled,

    #[error("batch {batch} failed after {attempts} attempts: {source}")]
    BatchExhausted {
        batch: usize,
        attempts: u32,
        #[source]
        source: Box<SyncError>,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller-supplied value that can't be sent to the service as-is
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    pub(crate) fn transport(context: impl Into<String>, source: TransportError) -> Self {
        SyncError::Transport {
            context: context.into(),
            source,
        }
    }

    /// Prefix the context of a transport failure with the operation that issued it
    pub(crate) fn context(self, operation: impl AsRef<str>) -> Self {
        match self {
            SyncError::Transport { context, source } => SyncError::Transport {
                context: format!("{} ({})", operation.as_ref(), context),
                source,
            },
            other => other,
        }
    }

    /// HTTP status returned by the translation service, if that is what failed
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Transport {
                source: TransportError::Status { status, .. },
                ..
            } => Some(*status),
            SyncError::BatchExhausted { source, .. } => source.status(),
            _ => None,
        }
    }
}
