//! Cloud object store seam.
//!
//! The offload cycle and the resume read path only ever talk to a bucket
//! through [`RemoteBucket`]. [`ObjectStore::bucket`] resolves a bucket once
//! per batch so a whole cycle shares one client.

#[cfg(test)]
pub mod fake;
pub mod local;
pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    future::Future,
    io,
    path::{Component, Path},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, ReadBuf},
    time::{Instant, Sleep, sleep},
};

/// Key namespace all resumes are mirrored under.
pub const RESUME_PREFIX: &str = "resumes";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{bucket}` unavailable: {reason}")]
    BucketUnavailable { bucket: String, reason: String },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("upload of `{key}` failed: {reason}")]
    Upload { key: String, reason: String },
    #[error("metadata request for `{key}` failed: {reason}")]
    Metadata { key: String, reason: String },
    #[error("download of `{key}` failed: {reason}")]
    Download { key: String, reason: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Metadata returned by a metadata reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size_bytes: Option<i64>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

pub type ObjectBody = Pin<Box<dyn AsyncRead + Send>>;

/// A remote object opened for streaming.
pub struct RemoteObject {
    pub meta: ObjectMeta,
    pub content_type: Option<String>,
    pub body: ObjectBody,
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObject")
            .field("meta", &self.meta)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Bound every read of `body` by `idle`. A read that makes no progress
/// for that long fails with `TimedOut`, which ends the stream.
pub fn with_read_timeout(body: ObjectBody, idle: Duration) -> ObjectBody {
    Box::pin(TimedBody {
        inner: body,
        idle,
        deadline: Box::pin(sleep(idle)),
    })
}

struct TimedBody {
    inner: ObjectBody,
    idle: Duration,
    deadline: Pin<Box<Sleep>>,
}

impl AsyncRead for TimedBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        match this.inner.as_mut().poll_read(cx, buf) {
            Poll::Ready(result) => {
                let next = Instant::now() + this.idle;
                this.deadline.as_mut().reset(next);
                Poll::Ready(result)
            }
            Poll::Pending => match this.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("remote read stalled for {:?}", this.idle),
                ))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// One resolved bucket. Handles are cheap to share across a batch.
#[async_trait]
pub trait RemoteBucket: Send + Sync {
    fn name(&self) -> &str;

    /// Upload the file at `path` to `key`, replacing any existing object.
    async fn put_file(&self, key: &str, path: &Path) -> StoreResult<()>;

    /// Re-fetch metadata for `key`. `Ok(None)` means the object does not exist.
    async fn reload(&self, key: &str) -> StoreResult<Option<ObjectMeta>>;

    /// Open `key` for reading. `Ok(None)` means the object does not exist.
    async fn open(&self, key: &str) -> StoreResult<Option<RemoteObject>>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Resolve `name` into a usable bucket handle.
    async fn bucket(&self, name: &str) -> StoreResult<Arc<dyn RemoteBucket>>;
}

/// Build the remote key for a path relative to the upload root.
///
/// Components are joined with `/` regardless of the host separator. Returns
/// `None` for paths that are empty, escape the root, or are not valid UTF-8.
pub fn resume_key(relative: &Path) -> Option<String> {
    let mut key = String::from(RESUME_PREFIX);
    let mut parts = 0;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                key.push('/');
                key.push_str(part.to_str()?);
                parts += 1;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    (parts > 0).then_some(key)
}
