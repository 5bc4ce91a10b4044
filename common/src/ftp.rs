//! FTP implementation of [`Source`](crate::source::Source)
//!
//! `suppaftp`'s blocking client is driven from tokio's blocking thread pool, one connection per
//! operation. The number of blocking threads (`--max-blocking-threads`) therefore also caps the
//! number of FTP commands in flight.

use std::net::ToSocketAddrs;

use anyhow::Context;
use suppaftp::{FtpError, FtpStream};

use crate::source::{Source, SourceError};

/// Reply fragments servers use when a retrieved path turns out to be a directory.
const DIRECTORY_REPLIES: &[&str] = &["is a directory", "not a regular file", "not a plain file"];

#[derive(Clone)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for FtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug)]
pub struct FtpSource {
    config: FtpConfig,
}

impl FtpSource {
    pub fn new(config: FtpConfig) -> Self {
        Self { config }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}

pub struct FtpConnection {
    // None only while a blocking call owns the stream, or after that call was lost
    stream: Option<FtpStream>,
}

impl FtpConnection {
    async fn call<T, F>(&mut self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut FtpStream) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut stream = self
            .stream
            .take()
            .context("ftp connection is no longer usable")?;
        let (stream, res) = tokio::task::spawn_blocking(move || {
            let res = f(&mut stream);
            (stream, res)
        })
        .await
        .context("ftp worker thread failed")?;
        self.stream = Some(stream);
        res
    }
}

pub fn is_directory_reply(text: &str) -> bool {
    let text = text.to_lowercase();
    DIRECTORY_REPLIES.iter().any(|reply| text.contains(reply))
}

fn is_directory_error(error: &FtpError) -> bool {
    match error {
        FtpError::UnexpectedResponse(response) => {
            is_directory_reply(&String::from_utf8_lossy(&response.body))
        }
        _ => false,
    }
}

#[async_trait::async_trait]
impl Source for FtpSource {
    type Connection = FtpConnection;

    async fn connect(&self, timeout: std::time::Duration) -> Result<FtpConnection, SourceError> {
        let address = self.address();
        let stream = tokio::task::spawn_blocking(move || -> anyhow::Result<FtpStream> {
            let addr = address
                .to_socket_addrs()
                .with_context(|| format!("failed resolving {address}"))?
                .next()
                .with_context(|| format!("no address found for {address}"))?;
            Ok(FtpStream::connect_timeout(addr, timeout)?)
        })
        .await
        .context("ftp worker thread failed")
        .and_then(|res| res)
        .map_err(|source| SourceError::Connect {
            host: self.address(),
            source,
        })?;
        tracing::trace!("connected to {}", self.address());
        Ok(FtpConnection {
            stream: Some(stream),
        })
    }

    async fn authenticate(&self, conn: &mut FtpConnection) -> Result<(), SourceError> {
        let user = self.config.user.clone();
        let password = self.config.password.clone();
        conn.call(move |stream| {
            stream.login(user.as_str(), password.as_str())?;
            stream.transfer_type(suppaftp::types::FileType::Binary)?;
            Ok(())
        })
        .await
        .map_err(|source| SourceError::Auth {
            user: self.config.user.clone(),
            source,
        })
    }

    async fn list(&self, conn: &mut FtpConnection, path: &str) -> Result<Vec<String>, SourceError> {
        let dir = path.to_string();
        conn.call(move |stream| {
            stream.cwd(dir.as_str())?;
            Ok(stream.nlst(None)?)
        })
        .await
        .map_err(|source| SourceError::List {
            path: path.to_string(),
            source,
        })
    }

    async fn read_all(
        &self,
        conn: &mut FtpConnection,
        path: &str,
    ) -> Result<bytes::Bytes, SourceError> {
        let entry = path.to_string();
        let data = conn
            .call(move |stream| match stream.retr_as_buffer(entry.as_str()) {
                Ok(cursor) => Ok(Some(cursor.into_inner())),
                Err(error) if is_directory_error(&error) => Ok(None),
                Err(error) => Err(error.into()),
            })
            .await
            .map_err(|source| SourceError::Read {
                path: path.to_string(),
                source,
            })?;
        match data {
            Some(data) => Ok(bytes::Bytes::from(data)),
            None => Err(SourceError::IsDirectory {
                path: path.to_string(),
            }),
        }
    }

    async fn close(&self, mut conn: FtpConnection) -> Result<(), SourceError> {
        conn.call(|stream| Ok(stream.quit()?))
            .await
            .map_err(|source| SourceError::Close { source })
    }
}
