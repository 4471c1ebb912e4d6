//! Resume storage on the request path: saving submitted files under the
//! upload root, and resolving a logical resume path to something readable
//! whether or not the offload cycle has already moved it to the bucket.

use crate::remote::{ObjectStore, RemoteObject, StoreResult, resume_key, with_read_timeout};
use bytes::Bytes;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    time::timeout,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const ALLOWED_RESUME_EXTENSIONS: [&str; 3] = ["pdf", "doc", "docx"];
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const MAX_LOGICAL_PATH_LEN: usize = 512;

#[derive(Debug, Error)]
pub enum ResumeError {
    #[error("invalid resume path `{0}`")]
    InvalidPath(String),
    #[error("resume must be one of: pdf, doc, docx (got `{0}`)")]
    UnsupportedExtension(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Where a resume was found.
pub enum Resolution {
    Local { path: PathBuf, file: File },
    Remote { key: String, object: RemoteObject },
    NotFound,
}

#[derive(Clone)]
pub struct ResumeService {
    upload_root: PathBuf,
    store: Arc<dyn ObjectStore>,
    fetch_timeout: Duration,
}

impl ResumeService {
    pub fn new(
        upload_root: impl Into<PathBuf>,
        store: Arc<dyn ObjectStore>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            upload_root: upload_root.into(),
            store,
            fetch_timeout,
        }
    }

    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    /// Resolve `logical_path` (`{applicant_id}/{filename}`) for reading.
    ///
    /// Local disk wins. The bucket is only consulted when offload is enabled
    /// and `bucket` is usable; remote errors and timeouts are logged and
    /// reported as `NotFound`. Reads from a remote body that stall longer
    /// than the fetch timeout fail with `TimedOut`.
    pub async fn resolve(
        &self,
        logical_path: &str,
        offload_enabled: bool,
        bucket: Option<&str>,
    ) -> Result<Resolution, ResumeError> {
        let relative = ensure_logical_path_safe(logical_path)?;
        let local_path = self.upload_root.join(relative);

        match open_local(&local_path).await {
            Ok(Some(file)) => {
                debug!(path = %local_path.display(), "serving resume from local disk");
                return Ok(Resolution::Local {
                    path: local_path,
                    file,
                });
            }
            Ok(None) => {}
            Err(err) => warn!(path = %local_path.display(), error = %err, "cannot open local resume"),
        }

        let Some(bucket) = bucket.filter(|_| offload_enabled) else {
            return Ok(Resolution::NotFound);
        };
        let key = resume_key(relative)
            .ok_or_else(|| ResumeError::InvalidPath(logical_path.to_string()))?;

        match timeout(self.fetch_timeout, self.open_remote(bucket, &key)).await {
            Ok(Ok(Some(mut object))) => {
                debug!(bucket, key, "serving resume from bucket");
                object.body = with_read_timeout(object.body, self.fetch_timeout);
                Ok(Resolution::Remote { key, object })
            }
            Ok(Ok(None)) => Ok(Resolution::NotFound),
            Ok(Err(err)) => {
                warn!(bucket, key, error = %err, "remote resume fetch failed");
                Ok(Resolution::NotFound)
            }
            Err(_) => {
                warn!(
                    bucket,
                    key,
                    timeout_ms = self.fetch_timeout.as_millis() as u64,
                    "remote resume fetch timed out"
                );
                Ok(Resolution::NotFound)
            }
        }
    }

    async fn open_remote(&self, bucket: &str, key: &str) -> StoreResult<Option<RemoteObject>> {
        let bucket = self.store.bucket(bucket).await?;
        bucket.open(key).await
    }

    /// Pick the logical path `{applicant_id}/{unique}_{filename}` a new
    /// upload will be stored under. Nothing is written yet.
    pub fn allocate_path(
        &self,
        applicant_id: i64,
        original_name: &str,
    ) -> Result<String, ResumeError> {
        let filename = sanitize_filename(original_name)?;
        let unique = Uuid::new_v4().simple().to_string();
        Ok(format!("{applicant_id}/{}_{filename}", &unique[..8]))
    }

    /// Write `data` to `logical_path` under the upload root.
    ///
    /// The bytes land in a dot-prefixed temp file first, which the offload
    /// scan ignores, and are renamed into place once synced.
    pub async fn write_upload(&self, logical_path: &str, data: Bytes) -> Result<(), ResumeError> {
        let relative = ensure_logical_path_safe(logical_path)?;
        let target = self.upload_root.join(relative);
        let dir = target
            .parent()
            .ok_or_else(|| ResumeError::InvalidPath(logical_path.to_string()))?;
        fs::create_dir_all(dir).await?;
        let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&data).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ResumeError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &target).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ResumeError::Io(err));
        }

        info!(path = %target.display(), bytes = data.len(), "saved resume");
        Ok(())
    }
}

async fn open_local(path: &Path) -> io::Result<Option<File>> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Ok(None),
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    }
    match File::open(path).await {
        Ok(file) => Ok(Some(file)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Reject logical paths that are empty, absolute, contain `..`,
/// backslashes or control bytes.
pub fn ensure_logical_path_safe(logical_path: &str) -> Result<&Path, ResumeError> {
    let invalid = || ResumeError::InvalidPath(logical_path.to_string());
    if logical_path.is_empty() || logical_path.len() > MAX_LOGICAL_PATH_LEN {
        return Err(invalid());
    }
    if logical_path.starts_with('/') || logical_path.split('/').any(|part| part == "..") {
        return Err(invalid());
    }
    if logical_path
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\')
    {
        return Err(invalid());
    }
    Ok(Path::new(logical_path))
}

/// Keep only the final path component and replace anything outside
/// `[A-Za-z0-9._-]`. The extension must be an allowed resume type.
pub fn sanitize_filename(original_name: &str) -> Result<String, ResumeError> {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();

    let extension = Path::new(&cleaned)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !ALLOWED_RESUME_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ResumeError::UnsupportedExtension(base.to_string()));
    }
    Ok(cleaned)
}

/// Content type served for a resume path, by extension.
pub fn content_type_for(path: &str) -> &'static str {
    let extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{ObjectMeta, RemoteBucket, StoreError, fake::FakeStore};
    use async_trait::async_trait;
    use std::{
        pin::Pin,
        task::{Context, Poll},
    };
    use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

    fn service(root: &Path, store: &FakeStore) -> ResumeService {
        ResumeService::new(root, Arc::new(store.clone()), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn local_copy_is_preferred() {
        let scratch = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(scratch.path().join("4")).unwrap();
        std::fs::write(scratch.path().join("4/cv.pdf"), b"local").unwrap();
        let store = FakeStore::new();
        store.insert("resumes/4/cv.pdf", b"remote");

        let resolution = service(scratch.path(), &store)
            .resolve("4/cv.pdf", true, Some("bucket"))
            .await
            .unwrap();

        let Resolution::Local { mut file, .. } = resolution else {
            panic!("expected a local resolution");
        };
        let mut body = Vec::new();
        file.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"local");
        assert_eq!(store.bucket_calls(), 0);
    }

    #[tokio::test]
    async fn offloaded_resume_streams_from_bucket() {
        let scratch = tempfile::tempdir().unwrap();
        let store = FakeStore::new();
        store.insert("resumes/4/cv.pdf", b"remote");

        let resolution = service(scratch.path(), &store)
            .resolve("4/cv.pdf", true, Some("bucket"))
            .await
            .unwrap();

        let Resolution::Remote { key, mut object } = resolution else {
            panic!("expected a remote resolution");
        };
        assert_eq!(key, "resumes/4/cv.pdf");
        let mut body = Vec::new();
        object.body.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"remote");
    }

    #[tokio::test]
    async fn missing_everywhere_is_not_found() {
        let scratch = tempfile::tempdir().unwrap();
        let store = FakeStore::new();

        let resolution = service(scratch.path(), &store)
            .resolve("4/cv.pdf", true, Some("bucket"))
            .await
            .unwrap();

        assert!(matches!(resolution, Resolution::NotFound));
    }

    #[tokio::test]
    async fn bucket_is_ignored_when_offload_is_disabled() {
        let scratch = tempfile::tempdir().unwrap();
        let store = FakeStore::new();
        store.insert("resumes/4/cv.pdf", b"remote");

        let resolution = service(scratch.path(), &store)
            .resolve("4/cv.pdf", false, Some("bucket"))
            .await
            .unwrap();

        assert!(matches!(resolution, Resolution::NotFound));
        assert_eq!(store.bucket_calls(), 0);
    }

    #[tokio::test]
    async fn unavailable_bucket_reads_as_not_found() {
        let scratch = tempfile::tempdir().unwrap();
        let store = FakeStore::new();
        store.make_unavailable();

        let resolution = service(scratch.path(), &store)
            .resolve("4/cv.pdf", true, Some("bucket"))
            .await
            .unwrap();

        assert!(matches!(resolution, Resolution::NotFound));
    }

    struct StalledStore;

    #[async_trait]
    impl ObjectStore for StalledStore {
        async fn bucket(&self, _name: &str) -> StoreResult<Arc<dyn RemoteBucket>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(StoreError::BucketNotFound("stalled".into()))
        }
    }

    #[tokio::test]
    async fn stalled_remote_fetch_times_out() {
        let scratch = tempfile::tempdir().unwrap();
        let service = ResumeService::new(
            scratch.path(),
            Arc::new(StalledStore),
            Duration::from_millis(50),
        );

        let resolution = service
            .resolve("4/cv.pdf", true, Some("bucket"))
            .await
            .unwrap();

        assert!(matches!(resolution, Resolution::NotFound));
    }

    /// Opens fine, then never yields a byte.
    struct StalledBodyStore;

    struct StalledBody;

    impl AsyncRead for StalledBody {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    #[async_trait]
    impl ObjectStore for StalledBodyStore {
        async fn bucket(&self, _name: &str) -> StoreResult<Arc<dyn RemoteBucket>> {
            Ok(Arc::new(StalledBodyStore))
        }
    }

    #[async_trait]
    impl RemoteBucket for StalledBodyStore {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn put_file(&self, _key: &str, _path: &Path) -> StoreResult<()> {
            Ok(())
        }

        async fn reload(&self, key: &str) -> StoreResult<Option<ObjectMeta>> {
            Ok(Some(ObjectMeta {
                key: key.to_string(),
                size_bytes: Some(1024),
                etag: None,
                last_modified: None,
            }))
        }

        async fn open(&self, key: &str) -> StoreResult<Option<RemoteObject>> {
            let meta = self.reload(key).await?.unwrap();
            Ok(Some(RemoteObject {
                meta,
                content_type: None,
                body: Box::pin(StalledBody),
            }))
        }
    }

    #[tokio::test]
    async fn stalled_remote_body_times_out() {
        let scratch = tempfile::tempdir().unwrap();
        let service = ResumeService::new(
            scratch.path(),
            Arc::new(StalledBodyStore),
            Duration::from_millis(50),
        );

        let resolution = service
            .resolve("4/cv.pdf", true, Some("bucket"))
            .await
            .unwrap();
        let Resolution::Remote { mut object, .. } = resolution else {
            panic!("expected a remote resolution");
        };

        let mut body = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), object.body.read_to_end(&mut body))
            .await
            .expect("remote body read must be bounded");
        assert_eq!(read.unwrap_err().kind(), ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let scratch = tempfile::tempdir().unwrap();
        let store = FakeStore::new();

        for bad in ["../secret.pdf", "/etc/passwd", "4/../../x.pdf", "", "4\\cv.pdf"] {
            let result = service(scratch.path(), &store)
                .resolve(bad, true, Some("bucket"))
                .await;
            assert!(matches!(result, Err(ResumeError::InvalidPath(_))), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn upload_lands_under_applicant_directory() {
        let scratch = tempfile::tempdir().unwrap();
        let store = FakeStore::new();
        let service = service(scratch.path(), &store);

        let logical = service
            .allocate_path(12, "C:\\Users\\me\\My CV.PDF")
            .unwrap();
        assert!(logical.starts_with("12/"));
        assert!(logical.ends_with("_My_CV.PDF"));
        assert!(!scratch.path().join(&logical).exists());

        service
            .write_upload(&logical, Bytes::from_static(b"%PDF"))
            .await
            .unwrap();

        assert_eq!(std::fs::read(scratch.path().join(&logical)).unwrap(), b"%PDF");
        let leftovers = std::fs::read_dir(scratch.path().join("12")).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn blocked_applicant_directory_fails_the_write() {
        let scratch = tempfile::tempdir().unwrap();
        std::fs::write(scratch.path().join("12"), b"not a directory").unwrap();
        let store = FakeStore::new();
        let service = service(scratch.path(), &store);

        let logical = service.allocate_path(12, "cv.pdf").unwrap();
        let result = service.write_upload(&logical, Bytes::from_static(b"%PDF")).await;

        assert!(matches!(result, Err(ResumeError::Io(_))));
    }

    #[test]
    fn only_resume_extensions_are_accepted() {
        assert!(sanitize_filename("resume.docx").is_ok());
        assert!(matches!(
            sanitize_filename("payload.exe"),
            Err(ResumeError::UnsupportedExtension(_))
        ));
        assert!(sanitize_filename("noextension").is_err());
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for("1/a.PDF"), "application/pdf");
        assert_eq!(content_type_for("1/a.doc"), "application/msword");
        assert_eq!(content_type_for("1/a"), "application/octet-stream");
    }
}
