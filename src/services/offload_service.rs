//! src/services/offload_service.rs
//!
//! OffloadService: one scan/upload/verify/delete/prune pass over the local
//! resume upload root. Local files are removed only after the remote copy
//! has been re-fetched and confirmed, so every resume stays reachable from at
//! least one side.

use crate::{
    models::offload::{CycleOutcome, OffloadSummary},
    remote::{ObjectStore, RemoteBucket, StoreError, resume_key},
};
use chrono::Utc;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{fs, sync::Mutex};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum OffloadError {
    #[error("cannot open bucket `{bucket}`: {source}")]
    Connect {
        bucket: String,
        #[source]
        source: StoreError,
    },
    #[error("scan of {} failed: {reason}", root.display())]
    Scan { root: PathBuf, reason: String },
}

/// Failure confined to a single file of a batch.
#[derive(Debug, Error)]
enum FileError {
    #[error("path {} cannot be mapped to an object key", .0.display())]
    Unmappable(PathBuf),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

enum FileOutcome {
    Offloaded { pruned_dirs: usize },
    Unverified,
    DeleteFailed,
}

pub struct OffloadService {
    store: Arc<dyn ObjectStore>,
    cycle_guard: Mutex<()>,
}

impl OffloadService {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            cycle_guard: Mutex::new(()),
        }
    }

    /// Run one offload cycle for `local_root` against `bucket`.
    ///
    /// Per-file failures are counted and logged, never returned. Only a
    /// failure to open the bucket aborts the cycle, before any local file
    /// is touched.
    pub async fn run_cycle(
        &self,
        local_root: &Path,
        bucket: &str,
    ) -> Result<CycleOutcome, OffloadError> {
        let Ok(_running) = self.cycle_guard.try_lock() else {
            warn!("offload cycle already in progress, skipping");
            return Ok(CycleOutcome::Busy);
        };

        info!(root = %local_root.display(), "checking resumes folder");
        match fs::metadata(local_root).await {
            Ok(meta) if meta.is_dir() => {}
            _ => {
                warn!(
                    root = %local_root.display(),
                    "local resume folder does not exist, skipping"
                );
                return Ok(CycleOutcome::Skipped);
            }
        }

        let files = collect_files(local_root).await?;
        if files.is_empty() {
            info!("no files found in resumes folder");
            return Ok(CycleOutcome::Empty);
        }

        info!(count = files.len(), bucket, "found files, uploading");
        let remote = self.store.bucket(bucket).await.map_err(|source| {
            error!(bucket, error = %source, "error during bucket initialization");
            OffloadError::Connect {
                bucket: bucket.to_string(),
                source,
            }
        })?;

        let mut summary = OffloadSummary {
            files_found: files.len(),
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        for path in &files {
            match offload_file(remote.as_ref(), local_root, path).await {
                Ok(FileOutcome::Offloaded { pruned_dirs }) => {
                    summary.uploaded += 1;
                    summary.deleted += 1;
                    summary.pruned_dirs += pruned_dirs;
                }
                Ok(FileOutcome::Unverified | FileOutcome::DeleteFailed) => {
                    summary.uploaded += 1;
                    summary.failed += 1;
                }
                Err(err) => {
                    error!(path = %path.display(), error = %err, "error processing file");
                    summary.failed += 1;
                }
            }
        }

        summary.finished_at = Some(Utc::now());
        info!(
            uploaded = summary.uploaded,
            deleted = summary.deleted,
            failed = summary.failed,
            pruned_dirs = summary.pruned_dirs,
            "upload complete"
        );
        Ok(CycleOutcome::Completed(summary))
    }
}

/// Upload one file, verify it, then delete it and prune its empty parents.
async fn offload_file(
    bucket: &dyn RemoteBucket,
    root: &Path,
    path: &Path,
) -> Result<FileOutcome, FileError> {
    let key = path
        .strip_prefix(root)
        .ok()
        .and_then(resume_key)
        .ok_or_else(|| FileError::Unmappable(path.to_path_buf()))?;
    let local_size = fs::metadata(path).await?.len();

    debug!(path = %path.display(), bucket = bucket.name(), key, "uploading");
    bucket.put_file(&key, path).await?;
    info!(path = %path.display(), key, "uploaded");

    let verified = match bucket.reload(&key).await? {
        Some(meta) => meta
            .size_bytes
            .is_none_or(|size| u64::try_from(size).is_ok_and(|size| size == local_size)),
        None => false,
    };
    if !verified {
        warn!(
            path = %path.display(),
            bucket = bucket.name(),
            key,
            "upload verification failed, keeping local copy"
        );
        return Ok(FileOutcome::Unverified);
    }

    match fs::remove_file(path).await {
        Ok(()) => info!(path = %path.display(), "deleted local file"),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "local file already gone");
        }
        Err(err) => {
            error!(path = %path.display(), error = %err, "could not delete local file");
            return Ok(FileOutcome::DeleteFailed);
        }
    }

    let pruned_dirs = match path.parent() {
        Some(parent) => prune_empty_dirs(parent, root).await,
        None => 0,
    };
    Ok(FileOutcome::Offloaded { pruned_dirs })
}

/// Enumerate regular files under `root`. Symlinks are not followed and
/// unreadable entries are skipped.
async fn collect_files(root: &Path) -> Result<Vec<PathBuf>, OffloadError> {
    let walk_root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in WalkDir::new(&walk_root)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
        {
            match entry {
                // Dot files are in-flight uploads and readiness probes.
                Ok(entry) if entry.file_type().is_file() && !is_hidden(entry.file_name()) => {
                    files.push(entry.into_path())
                }
                Ok(_) => {}
                Err(err) => debug!(error = %err, "skipping unreadable entry"),
            }
        }
        files
    })
    .await
    .map_err(|err| OffloadError::Scan {
        root: root.to_path_buf(),
        reason: err.to_string(),
    })
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|name| name.starts_with('.'))
}

/// Remove empty directories from `start` upward, stopping below `stop`.
///
/// Stops when:
/// - directory not empty
/// - directory not found
/// - reached root
/// - encountered unexpected I/O errors
async fn prune_empty_dirs(start: &Path, stop: &Path) -> usize {
    let mut removed = 0;
    let mut current = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        match fs::remove_dir(&current).await {
            Ok(()) => {
                info!(dir = %current.display(), "removed empty directory");
                removed += 1;
                match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
            Err(err) => {
                warn!(dir = %current.display(), error = %err, "could not remove directory");
                break;
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fake::FakeStore;

    const BUCKET: &str = "test-bucket";

    fn write(root: &Path, relative: &str, data: &[u8]) -> PathBuf {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, data).unwrap();
        path
    }

    fn summary(outcome: CycleOutcome) -> OffloadSummary {
        match outcome {
            CycleOutcome::Completed(summary) => summary,
            other => panic!("expected a completed cycle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_root_is_skipped_without_cloud_calls() {
        let scratch = tempfile::tempdir().unwrap();
        let store = FakeStore::new();
        let service = OffloadService::new(Arc::new(store.clone()));

        let outcome = service
            .run_cycle(&scratch.path().join("never-created"), BUCKET)
            .await
            .unwrap();

        assert_eq!(outcome, CycleOutcome::Skipped);
        assert_eq!(store.bucket_calls(), 0);
    }

    #[tokio::test]
    async fn empty_root_reports_no_files() {
        let scratch = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(scratch.path().join("7")).unwrap();
        let store = FakeStore::new();
        let service = OffloadService::new(Arc::new(store.clone()));

        let outcome = service.run_cycle(scratch.path(), BUCKET).await.unwrap();

        assert_eq!(outcome, CycleOutcome::Empty);
        assert_eq!(store.bucket_calls(), 0);
    }

    #[tokio::test]
    async fn in_flight_temp_files_are_left_alone() {
        let scratch = tempfile::tempdir().unwrap();
        let partial = write(scratch.path(), "7/.tmp-upload", b"half");
        let store = FakeStore::new();
        let service = OffloadService::new(Arc::new(store.clone()));

        let outcome = service.run_cycle(scratch.path(), BUCKET).await.unwrap();

        assert_eq!(outcome, CycleOutcome::Empty);
        assert!(partial.exists());
    }

    #[tokio::test]
    async fn verified_upload_deletes_file_and_prunes_parent() {
        let scratch = tempfile::tempdir().unwrap();
        let root = scratch.path();
        let file = write(root, "123/resume.pdf", b"data");
        let store = FakeStore::new();
        let service = OffloadService::new(Arc::new(store.clone()));

        let summary = summary(service.run_cycle(root, BUCKET).await.unwrap());

        assert_eq!((summary.uploaded, summary.deleted, summary.failed), (1, 1, 0));
        assert_eq!(summary.pruned_dirs, 1);
        assert!(!file.exists());
        assert!(!root.join("123").exists());
        assert!(root.exists());
        assert_eq!(
            store.object("resumes/123/resume.pdf").as_deref(),
            Some(&b"data"[..])
        );
    }

    #[tokio::test]
    async fn failed_upload_keeps_file_and_skips_verification() {
        let scratch = tempfile::tempdir().unwrap();
        let file = write(scratch.path(), "123/resume.pdf", b"data");
        let store = FakeStore::new();
        store.fail_upload("resumes/123/resume.pdf");
        let service = OffloadService::new(Arc::new(store.clone()));

        let summary = summary(service.run_cycle(scratch.path(), BUCKET).await.unwrap());

        assert_eq!((summary.uploaded, summary.deleted, summary.failed), (0, 0, 1));
        assert!(file.exists());
        assert_eq!(store.reload_calls(), 0);
    }

    #[tokio::test]
    async fn unverified_upload_keeps_file() {
        let scratch = tempfile::tempdir().unwrap();
        let file = write(scratch.path(), "123/resume.pdf", b"data");
        let store = FakeStore::new();
        store.lose_upload("resumes/123/resume.pdf");
        let service = OffloadService::new(Arc::new(store.clone()));

        let summary = summary(service.run_cycle(scratch.path(), BUCKET).await.unwrap());

        assert_eq!((summary.uploaded, summary.deleted, summary.failed), (1, 0, 1));
        assert!(file.exists());
        assert_eq!(store.reload_calls(), 1);
    }

    #[tokio::test]
    async fn failed_local_delete_counts_as_failed_and_keeps_path() {
        let scratch = tempfile::tempdir().unwrap();
        let root = scratch.path();
        let file = write(root, "123/resume.pdf", b"data");
        let store = FakeStore::new();
        store.block_source_delete("resumes/123/resume.pdf");
        let service = OffloadService::new(Arc::new(store.clone()));

        let summary = summary(service.run_cycle(root, BUCKET).await.unwrap());

        assert_eq!((summary.uploaded, summary.deleted, summary.failed), (1, 0, 1));
        assert_eq!(summary.pruned_dirs, 0);
        assert!(file.exists());
        assert!(root.join("123").exists());
        assert!(store.object("resumes/123/resume.pdf").is_some());
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_batch() {
        let scratch = tempfile::tempdir().unwrap();
        let root = scratch.path();
        let a = write(root, "1/a.pdf", b"a");
        let b = write(root, "2/b.pdf", b"bb");
        let c = write(root, "3/c.docx", b"ccc");
        let store = FakeStore::new();
        store.fail_upload("resumes/2/b.pdf");
        let service = OffloadService::new(Arc::new(store.clone()));

        let summary = summary(service.run_cycle(root, BUCKET).await.unwrap());

        assert_eq!(summary.files_found, 3);
        assert_eq!((summary.uploaded, summary.deleted, summary.failed), (2, 2, 1));
        assert!(!a.exists());
        assert!(b.exists());
        assert!(!c.exists());
        for (path, key) in [
            (&a, "resumes/1/a.pdf"),
            (&b, "resumes/2/b.pdf"),
            (&c, "resumes/3/c.docx"),
        ] {
            assert!(path.exists() || store.object(key).is_some(), "{key} lost");
        }
    }

    #[tokio::test]
    async fn second_cycle_without_new_files_does_nothing() {
        let scratch = tempfile::tempdir().unwrap();
        write(scratch.path(), "9/resume.pdf", b"data");
        let store = FakeStore::new();
        let service = OffloadService::new(Arc::new(store.clone()));

        summary(service.run_cycle(scratch.path(), BUCKET).await.unwrap());
        let puts = store.put_calls();
        let second = service.run_cycle(scratch.path(), BUCKET).await.unwrap();

        assert_eq!(second, CycleOutcome::Empty);
        assert_eq!(store.put_calls(), puts);
    }

    #[tokio::test]
    async fn pruning_stops_at_non_empty_parent() {
        let scratch = tempfile::tempdir().unwrap();
        let root = scratch.path();
        write(root, "5/cv/deep.pdf", b"x");
        let kept = write(root, "5/keep.pdf", b"y");
        let store = FakeStore::new();
        store.fail_upload("resumes/5/keep.pdf");
        let service = OffloadService::new(Arc::new(store.clone()));

        let summary = summary(service.run_cycle(root, BUCKET).await.unwrap());

        assert_eq!(summary.pruned_dirs, 1);
        assert!(!root.join("5/cv").exists());
        assert!(kept.exists());
    }

    #[tokio::test]
    async fn bucket_failure_aborts_without_touching_files() {
        let scratch = tempfile::tempdir().unwrap();
        let file = write(scratch.path(), "1/resume.pdf", b"data");
        let store = FakeStore::new();
        store.make_unavailable();
        let service = OffloadService::new(Arc::new(store.clone()));

        let err = service.run_cycle(scratch.path(), BUCKET).await.unwrap_err();

        assert!(matches!(err, OffloadError::Connect { .. }));
        assert!(file.exists());
        assert_eq!(store.put_calls(), 0);
    }

    #[tokio::test]
    async fn overlapping_cycle_is_reported_busy() {
        let scratch = tempfile::tempdir().unwrap();
        write(scratch.path(), "1/resume.pdf", b"data");
        let store = FakeStore::new();
        let service = OffloadService::new(Arc::new(store.clone()));

        let _running = service.cycle_guard.lock().await;
        let outcome = service.run_cycle(scratch.path(), BUCKET).await.unwrap();

        assert_eq!(outcome, CycleOutcome::Busy);
        assert_eq!(store.bucket_calls(), 0);
    }
}
