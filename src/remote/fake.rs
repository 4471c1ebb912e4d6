//! In-memory store with failure injection, used by the service tests.

use super::{ObjectMeta, ObjectStore, RemoteBucket, RemoteObject, StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::{HashMap, HashSet},
    io::Cursor,
    path::Path,
    sync::{Arc, Mutex},
};

#[derive(Default)]
struct FakeState {
    objects: HashMap<String, Bytes>,
    failing_uploads: HashSet<String>,
    unverifiable: HashSet<String>,
    undeletable_sources: HashSet<String>,
    bucket_unavailable: bool,
    bucket_failures_left: usize,
    bucket_calls: usize,
    put_calls: usize,
    reload_calls: usize,
}

#[derive(Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<FakeState>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_upload(&self, key: &str) {
        self.state.lock().unwrap().failing_uploads.insert(key.to_string());
    }

    /// Accept uploads for `key` but never report the object as present.
    pub fn lose_upload(&self, key: &str) {
        self.state.lock().unwrap().unverifiable.insert(key.to_string());
    }

    /// Accept the upload for `key`, then swap its local source for a
    /// directory so the later local delete fails.
    pub fn block_source_delete(&self, key: &str) {
        self.state
            .lock()
            .unwrap()
            .undeletable_sources
            .insert(key.to_string());
    }

    pub fn make_unavailable(&self) {
        self.state.lock().unwrap().bucket_unavailable = true;
    }

    /// Fail only the next `count` bucket lookups.
    pub fn fail_bucket_calls(&self, count: usize) {
        self.state.lock().unwrap().bucket_failures_left = count;
    }

    pub fn insert(&self, key: &str, data: &'static [u8]) {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(key.to_string(), Bytes::from_static(data));
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub fn bucket_calls(&self) -> usize {
        self.state.lock().unwrap().bucket_calls
    }

    pub fn put_calls(&self) -> usize {
        self.state.lock().unwrap().put_calls
    }

    pub fn reload_calls(&self) -> usize {
        self.state.lock().unwrap().reload_calls
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn bucket(&self, name: &str) -> StoreResult<Arc<dyn RemoteBucket>> {
        let mut state = self.state.lock().unwrap();
        state.bucket_calls += 1;
        if state.bucket_failures_left > 0 {
            state.bucket_failures_left -= 1;
            return Err(StoreError::BucketUnavailable {
                bucket: name.to_string(),
                reason: "injected".into(),
            });
        }
        if state.bucket_unavailable {
            return Err(StoreError::BucketUnavailable {
                bucket: name.to_string(),
                reason: "injected".into(),
            });
        }
        Ok(Arc::new(FakeBucket {
            name: name.to_string(),
            store: self.clone(),
        }))
    }
}

struct FakeBucket {
    name: String,
    store: FakeStore,
}

#[async_trait]
impl RemoteBucket for FakeBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_file(&self, key: &str, path: &Path) -> StoreResult<()> {
        let data = tokio::fs::read(path).await?;
        let mut state = self.store.state.lock().unwrap();
        state.put_calls += 1;
        if state.failing_uploads.contains(key) {
            return Err(StoreError::Upload {
                key: key.to_string(),
                reason: "injected".into(),
            });
        }
        if !state.unverifiable.contains(key) {
            state.objects.insert(key.to_string(), Bytes::from(data));
        }
        if state.undeletable_sources.contains(key) {
            std::fs::remove_file(path)?;
            std::fs::create_dir(path)?;
        }
        Ok(())
    }

    async fn reload(&self, key: &str) -> StoreResult<Option<ObjectMeta>> {
        let mut state = self.store.state.lock().unwrap();
        state.reload_calls += 1;
        Ok(state.objects.get(key).map(|data| ObjectMeta {
            key: key.to_string(),
            size_bytes: Some(data.len() as i64),
            etag: Some(format!("{:x}", md5::compute(data))),
            last_modified: None,
        }))
    }

    async fn open(&self, key: &str) -> StoreResult<Option<RemoteObject>> {
        let Some(meta) = self.reload(key).await? else {
            return Ok(None);
        };
        let data = self.store.object(key).unwrap_or_default();
        Ok(Some(RemoteObject {
            meta,
            content_type: Some("application/pdf".into()),
            body: Box::pin(Cursor::new(data)),
        }))
    }
}
