//! Port through which the webhook copies images into the mirror.

use async_trait::async_trait;
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("request to image daemon failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("image daemon returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("{0}")]
    Stream(String),

    #[error("malformed progress message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid image reference {image}: {source}")]
    InvalidImage {
        image: String,
        #[source]
        source: crate::image_reference::ParseError,
    },
}

/// The three steps of copying one image into the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOperation {
    Pull,
    Tag,
    Push,
}

impl fmt::Display for TransferOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOperation::Pull => write!(f, "pull"),
            TransferOperation::Tag => write!(f, "tag"),
            TransferOperation::Push => write!(f, "push"),
        }
    }
}

/// Pull, tag and push against a container daemon or registry.
///
/// Implementations are shared by all in-flight reviews and must not hold
/// per-request state. Calls are never retried by the caller.
#[async_trait]
pub trait ImageTransfer: Send + Sync {
    async fn pull(&self, image: &str) -> Result<(), TransferError>;

    async fn tag(&self, source: &str, target: &str) -> Result<(), TransferError>;

    async fn push(&self, image: &str) -> Result<(), TransferError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Call {
        Pull(String),
        Tag(String, String),
        Push(String),
    }

    /// Records every call and fails the configured operation for one image.
    #[derive(Default)]
    pub(crate) struct ScriptedTransfer {
        pub(crate) calls: Mutex<Vec<Call>>,
        fail: Option<(TransferOperation, String)>,
        delay: Option<Duration>,
    }

    impl ScriptedTransfer {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Fail `operation` when it is applied to `image` (the source for pull/tag, the target for push).
        pub(crate) fn failing(operation: TransferOperation, image: &str) -> Self {
            Self {
                fail: Some((operation, image.to_string())),
                ..Self::default()
            }
        }

        pub(crate) fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        async fn record(
            &self,
            call: Call,
            operation: TransferOperation,
            image: &str,
        ) -> Result<(), TransferError> {
            self.calls.lock().unwrap().push(call);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.fail {
                Some((op, failing)) if *op == operation && failing == image => Err(
                    TransferError::Stream(format!("error image {}: {}", operation, image)),
                ),
                _ => Ok(()),
            }
        }
    }

    #[async_trait]
    impl ImageTransfer for ScriptedTransfer {
        async fn pull(&self, image: &str) -> Result<(), TransferError> {
            self.record(Call::Pull(image.to_string()), TransferOperation::Pull, image)
                .await
        }

        async fn tag(&self, source: &str, target: &str) -> Result<(), TransferError> {
            self.record(
                Call::Tag(source.to_string(), target.to_string()),
                TransferOperation::Tag,
                source,
            )
            .await
        }

        async fn push(&self, image: &str) -> Result<(), TransferError> {
            self.record(Call::Push(image.to_string()), TransferOperation::Push, image)
                .await
        }
    }
}
