//! Remote file server interface used by the replication engine

use crate::retry::Classify;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed connecting to {host}: {source:#}")]
    Connect {
        host: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed logging in as {user}: {source:#}")]
    Auth {
        user: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed listing {path}: {source:#}")]
    List {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{path} is a directory")]
    IsDirectory { path: String },
    #[error("failed reading {path}: {source:#}")]
    Read {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed closing connection: {source:#}")]
    Close {
        #[source]
        source: anyhow::Error,
    },
}

impl Classify for SourceError {
    fn is_container(&self) -> bool {
        matches!(self, SourceError::IsDirectory { .. })
    }
}

/// A remote file server the replication reads from.
///
/// Connections are opened per operation and never shared between tasks.
#[async_trait::async_trait]
pub trait Source: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Self::Connection, SourceError>;

    async fn authenticate(&self, conn: &mut Self::Connection) -> Result<(), SourceError>;

    /// Names of the entries directly under `path`.
    async fn list(
        &self,
        conn: &mut Self::Connection,
        path: &str,
    ) -> Result<Vec<String>, SourceError>;

    /// Full contents of the entry at `path`.
    ///
    /// Must fail with [`SourceError::IsDirectory`] when `path` is a directory.
    async fn read_all(
        &self,
        conn: &mut Self::Connection,
        path: &str,
    ) -> Result<bytes::Bytes, SourceError>;

    async fn close(&self, conn: Self::Connection) -> Result<(), SourceError>;
}

/// Connects and authenticates, closing the connection again if the login is rejected.
pub async fn open<S: Source>(
    source: &S,
    timeout: std::time::Duration,
) -> Result<S::Connection, SourceError> {
    let mut conn = source.connect(timeout).await?;
    if let Err(error) = source.authenticate(&mut conn).await {
        close_quietly(source, conn, "login rejected").await;
        return Err(error);
    }
    Ok(conn)
}

/// Closes `conn`; failures are logged and otherwise ignored.
pub async fn close_quietly<S: Source>(source: &S, conn: S::Connection, context: &str) {
    if let Err(error) = source.close(conn).await {
        tracing::debug!("{} -- failed to close source connection: {}", context, &error);
    }
}
