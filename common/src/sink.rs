//! Object store interface used by the replication engine

use crate::retry::Classify;

/// Metadata stored alongside an uploaded object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    /// Canned ACL name, e.g. `public-read`
    pub acl: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed uploading {key}: {source:#}")]
    Put {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

// uploads never fail because of the kind of an entry
impl Classify for SinkError {}

/// Destination of a replication. Must be safe to call from many tasks at once.
#[async_trait::async_trait]
pub trait Sink: Send + Sync + 'static {
    /// Stores `body` under `key`, overwriting any existing object.
    async fn put_object(
        &self,
        body: bytes::Bytes,
        key: &str,
        options: &PutOptions,
    ) -> Result<(), SinkError>;
}
