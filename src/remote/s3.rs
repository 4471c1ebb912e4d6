//! S3-compatible backend built on `aws-sdk-s3`.
//!
//! Google Cloud Storage is reached through its S3 interoperability endpoint
//! (`--s3-endpoint https://storage.googleapis.com` with HMAC keys in the
//! usual `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` variables).

use super::{ObjectMeta, ObjectStore, RemoteBucket, RemoteObject, StoreError, StoreResult};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, timeout::TimeoutConfig};
use aws_sdk_s3::{Client, error::DisplayErrorContext, primitives::ByteStream};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use chrono::{DateTime, Utc};
use std::{io, path::Path, sync::Arc, time::Duration};
use tokio::{fs::File, io::AsyncReadExt};
use tracing::debug;

#[derive(Clone)]
pub struct S3ObjectStore {
    config: aws_config::SdkConfig,
    force_path_style: bool,
}

impl S3ObjectStore {
    /// Load credentials and region from the default provider chain.
    /// A custom endpoint switches to path-style addressing. `read_timeout`
    /// bounds connecting and each socket read; whole operations are not
    /// capped so large uploads can finish.
    pub async fn from_env(endpoint: Option<&str>, read_timeout: Duration) -> Self {
        let timeouts = TimeoutConfig::builder()
            .connect_timeout(read_timeout)
            .read_timeout(read_timeout)
            .build();
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).timeout_config(timeouts);
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        Self {
            config: loader.load().await,
            force_path_style: endpoint.is_some(),
        }
    }

    fn client(&self) -> Client {
        let conf = aws_sdk_s3::config::Builder::from(&self.config)
            .force_path_style(self.force_path_style)
            .build();
        Client::from_conf(conf)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn bucket(&self, name: &str) -> StoreResult<Arc<dyn RemoteBucket>> {
        let client = self.client();
        client
            .head_bucket()
            .bucket(name)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(service_err) if service_err.is_not_found() => {
                    StoreError::BucketNotFound(name.to_string())
                }
                _ => StoreError::BucketUnavailable {
                    bucket: name.to_string(),
                    reason: DisplayErrorContext(&err).to_string(),
                },
            })?;

        Ok(Arc::new(S3Bucket {
            client,
            bucket: name.to_string(),
        }))
    }
}

struct S3Bucket {
    client: Client,
    bucket: String,
}

#[async_trait]
impl RemoteBucket for S3Bucket {
    fn name(&self) -> &str {
        &self.bucket
    }

    async fn put_file(&self, key: &str, path: &Path) -> StoreResult<()> {
        let (digest, size) = file_md5(path).await?;
        let checksum = B64.encode(digest.0);
        let body = ByteStream::from_path(path)
            .await
            .map_err(|err| StoreError::Upload {
                key: key.to_string(),
                reason: err.to_string(),
            })?;
        debug!(key, bytes = size, "uploading object");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_md5(checksum)
            .body(body)
            .send()
            .await
            .map_err(|err| StoreError::Upload {
                key: key.to_string(),
                reason: DisplayErrorContext(&err).to_string(),
            })?;
        Ok(())
    }

    async fn reload(&self, key: &str) -> StoreResult<Option<ObjectMeta>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(head) => Ok(Some(ObjectMeta {
                key: key.to_string(),
                size_bytes: head.content_length(),
                etag: head.e_tag().map(|tag| tag.trim_matches('"').to_string()),
                last_modified: head.last_modified().and_then(to_chrono),
            })),
            Err(err) => match err.as_service_error() {
                Some(service_err) if service_err.is_not_found() => Ok(None),
                _ => Err(StoreError::Metadata {
                    key: key.to_string(),
                    reason: DisplayErrorContext(&err).to_string(),
                }),
            },
        }
    }

    async fn open(&self, key: &str) -> StoreResult<Option<RemoteObject>> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                return match err.as_service_error() {
                    Some(service_err) if service_err.is_no_such_key() => Ok(None),
                    _ => Err(StoreError::Download {
                        key: key.to_string(),
                        reason: DisplayErrorContext(&err).to_string(),
                    }),
                };
            }
        };

        let meta = ObjectMeta {
            key: key.to_string(),
            size_bytes: output.content_length(),
            etag: output.e_tag().map(|tag| tag.trim_matches('"').to_string()),
            last_modified: output.last_modified().and_then(to_chrono),
        };
        let content_type = output.content_type().map(str::to_string);

        Ok(Some(RemoteObject {
            meta,
            content_type,
            body: Box::pin(output.body.into_async_read()),
        }))
    }
}

/// MD5 of the file at `path`, read in chunks, plus its length.
async fn file_md5(path: &Path) -> io::Result<(md5::Digest, u64)> {
    let mut file = File::open(path).await?;
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        context.consume(&buf[..read]);
        size += read as u64;
    }
    Ok((context.compute(), size))
}

fn to_chrono(ts: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())
}
