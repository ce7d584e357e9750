// src/storage.rs

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::primitives::ByteStream;
use std::fmt;

#[derive(Debug)]
pub struct StorageError(pub String);

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "storage error: {}", self.0)
    }
}

impl std::error::Error for StorageError {}

/// Where generated images end up. Returns a URL the client can fetch.
#[async_trait]
pub trait ImageStorage: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, StorageError>;
}

pub struct S3ImageStorage {
    client: S3Client,
    bucket: String,
    public_base_url: String,
}

impl S3ImageStorage {
    pub fn new(client: S3Client, bucket: String, public_base_url: String) -> Self {
        Self {
            client,
            bucket,
            public_base_url,
        }
    }

    /// Builds the client from the ambient AWS config, with an optional
    /// S3-compatible endpoint (MinIO and similar need path-style addressing).
    pub async fn from_env(bucket: String, endpoint: Option<String>, public_base_url: String) -> Self {
        let region_provider = RegionProviderChain::default_provider().or_else("us-east-1");
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;
        let mut builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Self::new(S3Client::from_conf(builder.build()), bucket, public_base_url)
    }
}

#[async_trait]
impl ImageStorage for S3ImageStorage {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError(format!("put_object {key}: {e}")))?;

        Ok(public_object_url(&self.public_base_url, &self.bucket, key))
    }
}

/// Public address of an uploaded object. `base` is either a template with
/// `{bucket}` / `{key}` placeholders, a URL already scoped to the bucket (as a host
/// label or path segment), or a bare endpoint that still needs the bucket segment.
pub fn public_object_url(base: &str, bucket: &str, key: &str) -> String {
    let base = base.trim_end_matches('/');
    let key = key.trim_start_matches('/');

    if base.contains("{bucket}") || base.contains("{key}") {
        return base.replace("{bucket}", bucket).replace("{key}", key);
    }

    let scoped = base.split(['/', '.']).any(|part| part == bucket);
    if scoped {
        format!("{base}/{key}")
    } else {
        format!("{base}/{bucket}/{key}")
    }
}
