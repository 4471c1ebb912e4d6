//! Directory-backed object store for development setups without cloud
//! credentials. Objects live at `{root}/{bucket}/{key}`.

use super::{ObjectMeta, ObjectStore, RemoteBucket, RemoteObject, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn bucket(&self, name: &str) -> StoreResult<Arc<dyn RemoteBucket>> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(StoreError::BucketUnavailable {
                bucket: name.to_string(),
                reason: "not a valid directory name".into(),
            });
        }
        let path = self.root.join(name);
        fs::create_dir_all(&path).await?;
        Ok(Arc::new(LocalBucket {
            name: name.to_string(),
            path,
        }))
    }
}

struct LocalBucket {
    name: String,
    path: PathBuf,
}

impl LocalBucket {
    /// Rejects keys that begin with `/` or contain `..` or control bytes.
    fn object_path(&self, key: &str) -> StoreResult<PathBuf> {
        if key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.contains("..")
            || key.bytes().any(|b| b.is_ascii_control() || b == b'\\')
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.path.join(key))
    }
}

#[async_trait]
impl RemoteBucket for LocalBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_file(&self, key: &str, path: &Path) -> StoreResult<()> {
        let target = self.object_path(key)?;
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(&parent).await?;

        let data = fs::read(path).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        let written = async {
            file.write_all(&data).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &target).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        Ok(())
    }

    async fn reload(&self, key: &str) -> StoreResult<Option<ObjectMeta>> {
        let target = self.object_path(key)?;
        let metadata = match fs::metadata(&target).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Io(err)),
        };
        let digest = md5::compute(fs::read(&target).await?);

        Ok(Some(ObjectMeta {
            key: key.to_string(),
            size_bytes: i64::try_from(metadata.len()).ok(),
            etag: Some(format!("{:x}", digest)),
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        }))
    }

    async fn open(&self, key: &str) -> StoreResult<Option<RemoteObject>> {
        let Some(meta) = self.reload(key).await? else {
            return Ok(None);
        };
        let file = match File::open(self.object_path(key)?).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Io(err)),
        };
        Ok(Some(RemoteObject {
            meta,
            content_type: None,
            body: Box::pin(file),
        }))
    }
}
