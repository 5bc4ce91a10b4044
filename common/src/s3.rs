//! S3 implementation of [`Sink`](crate::sink::Sink)

use anyhow::bail;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;

use crate::sink::{PutOptions, Sink, SinkError};

/// Configuration for S3 access.
#[derive(Clone, Default)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// AWS region
    pub region: Option<String>,
    /// Custom endpoint URL (S3 compatible stores, LocalStack)
    pub endpoint: Option<String>,
    /// Explicit AWS access key (optional)
    pub access_key: Option<String>,
    /// Explicit AWS secret key (optional)
    pub secret_key: Option<String>,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl S3Config {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bucket.is_empty() {
            bail!("destination bucket must not be empty");
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            bail!("access key and secret key must be specified together");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct S3Sink {
    client: Client,
    bucket: String,
}

impl S3Sink {
    /// Builds the S3 client. Errors here are fatal: nothing has been replicated yet.
    pub async fn new(config: &S3Config) -> anyhow::Result<Self> {
        config.validate()?;
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            let credentials = aws_sdk_s3::config::Credentials::new(
                access_key, secret_key, None, None, "ftp2s3",
            );
            loader = loader.credentials_provider(credentials);
        }
        let aws_config = loader.load().await;
        let builder = aws_sdk_s3::config::Builder::from(&aws_config);
        // custom endpoints rarely support virtual-hosted buckets
        let s3_config = if config.endpoint.is_some() {
            builder.force_path_style(true).build()
        } else {
            builder.build()
        };
        tracing::debug!("created S3 client for bucket {}", &config.bucket);
        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait::async_trait]
impl Sink for S3Sink {
    async fn put_object(
        &self,
        body: bytes::Bytes,
        key: &str,
        options: &PutOptions,
    ) -> Result<(), SinkError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(aws_sdk_s3::primitives::ByteStream::from(body))
            .set_content_type(options.content_type.clone())
            .set_cache_control(options.cache_control.clone())
            .set_acl(
                options
                    .acl
                    .as_deref()
                    .map(aws_sdk_s3::types::ObjectCannedAcl::from),
            )
            .send()
            .await
            .map_err(|error| SinkError::Put {
                key: key.to_string(),
                source: anyhow::anyhow!("{}", aws_sdk_s3::error::DisplayErrorContext(&error)),
            })?;
        Ok(())
    }
}
