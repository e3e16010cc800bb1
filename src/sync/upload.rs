/*!
upload.rs - upload fan-out engine.

Walks the working directory, filters ineligible entries, checks each file
against the transfer cache, and uploads changed/new files through a bounded
concurrency pool (semaphore, 10 permits). Produces a fresh cache snapshot
from the outcomes and persists it unconditionally once the pass completes.

Isolation rules:
  - one file's failure never aborts sibling uploads
  - failed files contribute no cache entry (retried next pass)
  - `run` errors only for catastrophic conditions (working directory
    unreadable); the orchestrator decides whether that is fatal

The network side is the `Uploader` seam so the engine is testable without a
live service; `ApiClient` is the production implementation.
*/

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::sync::Semaphore;
use walkdir::WalkDir;

use crate::api::{ApiClient, VOLUME_PREFIX};
use crate::sync::cache::{CACHE_FILE_NAME, CacheEntry, UploadCache};
use crate::{log_debug, log_warn};

/// Maximum simultaneous in-flight uploads.
pub const MAX_IN_FLIGHT: usize = 10;

/// Classified per-file transfer failure.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// 400/422 with a structured validation body.
    #[error("validation rejected (HTTP {status}): {detail}")]
    Validation { status: u16, detail: String },
    /// Any other non-2xx status.
    #[error("HTTP {status}")]
    Http { status: u16 },
    /// Connect/timeout/body transport failure.
    #[error("transport: {0}")]
    Transport(String),
    /// Local filesystem error reading the file.
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Seam between the engine and the transport.
pub trait Uploader {
    /// Upload one already-encoded file body to a destination identifier.
    async fn upload(&self, destination: &str, source_b64: String) -> Result<(), UploadError>;
}

impl Uploader for ApiClient {
    async fn upload(&self, destination: &str, source_b64: String) -> Result<(), UploadError> {
        let payload = json!({
            "destination": destination,
            "agint_apikey": self.api_key(),
            "source": source_b64,
            "api_key": self.api_key(),
        });
        let resp = self
            .upload_file_raw(&payload)
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        let status = resp.status().as_u16();
        match status {
            400 | 422 => {
                let body = resp.text().await.unwrap_or_default();
                let detail = serde_json::from_str::<serde_json::Value>(&body)
                    .ok()
                    .map(|v| v.to_string())
                    .unwrap_or(body);
                Err(UploadError::Validation { status, detail })
            }
            s if !(200..300).contains(&s) => Err(UploadError::Http { status }),
            _ => Ok(()),
        }
    }
}

/// Result of one upload pass.
#[derive(Debug)]
pub struct UploadSummary {
    pub new_cache: UploadCache,
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Per-file outcome, aggregated after all tasks settle.
enum TaskOutcome {
    Skipped { rel: String, entry: CacheEntry },
    Uploaded { rel: String, entry: CacheEntry },
    Failed { rel: String, error: UploadError },
}

/// Run one upload pass over `working_dir` against `cache`.
///
/// The fresh cache snapshot is persisted (replacing the store) before this
/// returns, even when some uploads failed, so progress is never lost.
pub async fn run(
    working_dir: &Path,
    cache: &UploadCache,
    uploader: &impl Uploader,
) -> Result<UploadSummary> {
    let files = eligible_files(working_dir)?;
    log_debug!("Gathered {} upload/check tasks. Running...", files.len());

    let semaphore = Semaphore::new(MAX_IN_FLIGHT);
    let tasks = files
        .into_iter()
        .map(|(abs, rel)| process_file(abs, rel, cache, uploader, &semaphore));
    let outcomes = futures_util::future::join_all(tasks).await;

    let mut summary = UploadSummary {
        new_cache: UploadCache::default(),
        uploaded: 0,
        skipped: 0,
        failed: 0,
    };
    for outcome in outcomes {
        match outcome {
            TaskOutcome::Skipped { rel, entry } => {
                summary.new_cache.insert(rel, entry);
                summary.skipped += 1;
            }
            TaskOutcome::Uploaded { rel, entry } => {
                summary.new_cache.insert(rel, entry);
                summary.uploaded += 1;
            }
            TaskOutcome::Failed { rel, error } => {
                log_warn!("Upload failed for {rel}: {error}");
                summary.failed += 1;
            }
        }
    }

    summary.new_cache.save(working_dir);
    log_debug!(
        "Upload tasks finished. Uploaded: {}, Skipped (cached): {}, Failed: {}",
        summary.uploaded,
        summary.skipped,
        summary.failed
    );
    Ok(summary)
}

/// Enumerate regular files under `working_dir`, excluding the cache store
/// and anything with a hidden (dot-prefixed) path segment.
///
/// Returns `(absolute, relative-posix)` pairs. Errors only when the root
/// itself cannot be enumerated; nested walk errors are logged and skipped.
fn eligible_files(working_dir: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(working_dir) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if e.depth() == 0 => {
                return Err(e).with_context(|| {
                    format!("Cannot enumerate working directory: {}", working_dir.display())
                });
            }
            Err(e) => {
                log_warn!("Skipping unreadable entry during scan: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = match entry.path().strip_prefix(working_dir) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let rel_str = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if rel_str == CACHE_FILE_NAME {
            log_debug!("Skipping cache store file");
            continue;
        }
        if rel_str.split('/').any(|seg| seg.starts_with('.')) {
            continue;
        }
        files.push((entry.path().to_path_buf(), rel_str));
    }
    Ok(files)
}

/// Check one file against the cache and upload it if changed.
async fn process_file(
    abs: PathBuf,
    rel: String,
    cache: &UploadCache,
    uploader: &impl Uploader,
    semaphore: &Semaphore,
) -> TaskOutcome {
    let (mtime, size) = match stat_file(&abs) {
        Ok(ms) => ms,
        Err(e) => {
            return TaskOutcome::Failed {
                rel: rel.clone(),
                error: UploadError::Io { path: rel, source: e },
            };
        }
    };

    let cached = cache.get(&rel);
    if let Some(entry) = cached
        && entry.matches(mtime, size)
    {
        log_debug!("Skipping cached file: {rel}");
        return TaskOutcome::Skipped { rel, entry: *entry };
    }

    let action = if cached.is_some() { "changed" } else { "new" };
    let destination = format!("{VOLUME_PREFIX}{rel}");
    log_debug!("Uploading {action} file: {rel} -> {destination}");

    // Closed-semaphore panics cannot happen here; the semaphore lives for
    // the whole pass.
    let _permit = semaphore.acquire().await.expect("upload semaphore closed");

    let bytes = match tokio::fs::read(&abs).await {
        Ok(b) => b,
        Err(e) => {
            return TaskOutcome::Failed {
                rel: rel.clone(),
                error: UploadError::Io { path: rel, source: e },
            };
        }
    };
    // Re-stat after the read so the cache records what was actually sent,
    // closing the read/stat race window.
    let (mtime, size) = match stat_file(&abs) {
        Ok(ms) => ms,
        Err(e) => {
            return TaskOutcome::Failed {
                rel: rel.clone(),
                error: UploadError::Io { path: rel, source: e },
            };
        }
    };

    match uploader.upload(&destination, BASE64.encode(&bytes)).await {
        Ok(()) => TaskOutcome::Uploaded {
            rel,
            entry: CacheEntry { mtime, size },
        },
        Err(error) => TaskOutcome::Failed { rel, error },
    }
}

/// Current (mtime seconds, size) for a file.
fn stat_file(path: &Path) -> std::io::Result<(f64, u64)> {
    let meta = std::fs::metadata(path)?;
    let mtime = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok((mtime, meta.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Recording test double; optionally fails specific destinations and
    /// tracks the maximum number of concurrently in-flight uploads.
    #[derive(Default)]
    struct MockUploader {
        calls: Mutex<Vec<String>>,
        fail: Vec<String>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockUploader {
        fn failing(dests: &[&str]) -> Self {
            Self {
                fail: dests.iter().map(|s| s.to_string()).collect(),
                ..Self::default()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Uploader for MockUploader {
        async fn upload(&self, destination: &str, _source_b64: String) -> Result<(), UploadError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.calls.lock().unwrap().push(destination.to_string());
            if self.fail.iter().any(|f| destination.ends_with(f.as_str())) {
                return Err(UploadError::Validation {
                    status: 422,
                    detail: r#"{"detail": "bad encoding"}"#.into(),
                });
            }
            Ok(())
        }
    }

    fn write(dir: &Path, rel: &str, content: &[u8]) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn uploads_visible_files_and_skips_hidden() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", &[0u8; 100]);
        write(dir.path(), ".hidden/b.txt", b"nope");
        write(dir.path(), "sub/.secret.txt", b"nope");
        write(dir.path(), CACHE_FILE_NAME, b"{}");

        let mock = MockUploader::default();
        let summary = run(dir.path(), &UploadCache::default(), &mock).await.unwrap();

        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(
            mock.calls.lock().unwrap().as_slice(),
            &["agitransfer://a.txt".to_string()]
        );

        let entry = summary.new_cache.get("a.txt").unwrap();
        assert_eq!(entry.size, 100);
        let (mtime, _) = stat_file(&dir.path().join("a.txt")).unwrap();
        assert_eq!(entry.mtime, mtime);
    }

    #[tokio::test]
    async fn unchanged_files_skip_without_network_calls() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", b"one");
        write(dir.path(), "b.txt", b"two");

        let first = MockUploader::default();
        let s1 = run(dir.path(), &UploadCache::default(), &first).await.unwrap();
        assert_eq!(s1.uploaded, 2);
        assert_eq!(first.call_count(), 2);

        let second = MockUploader::default();
        let s2 = run(dir.path(), &s1.new_cache, &second).await.unwrap();
        assert_eq!(s2.uploaded, 0);
        assert_eq!(s2.skipped, 2);
        assert_eq!(second.call_count(), 0, "no network calls for unchanged files");
        assert_eq!(s2.new_cache, s1.new_cache, "idempotent cache content");
    }

    #[tokio::test]
    async fn size_change_forces_reupload() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", b"one");

        let first = MockUploader::default();
        let s1 = run(dir.path(), &UploadCache::default(), &first).await.unwrap();

        write(dir.path(), "a.txt", b"longer content");
        let second = MockUploader::default();
        let s2 = run(dir.path(), &s1.new_cache, &second).await.unwrap();
        assert_eq!(s2.uploaded, 1);
        assert_eq!(second.call_count(), 1, "re-uploaded exactly once");
    }

    #[tokio::test]
    async fn failed_upload_excluded_from_cache_but_siblings_proceed() {
        let dir = tempdir().unwrap();
        write(dir.path(), "good1.txt", b"x");
        write(dir.path(), "bad.txt", b"y");
        write(dir.path(), "good2.txt", b"z");

        let mock = MockUploader::failing(&["bad.txt"]);
        let summary = run(dir.path(), &UploadCache::default(), &mock).await.unwrap();

        assert_eq!(summary.uploaded, 2);
        assert_eq!(summary.failed, 1);
        assert!(summary.new_cache.get("bad.txt").is_none(), "failures are retried next pass");
        assert!(summary.new_cache.get("good1.txt").is_some());
        assert!(summary.new_cache.get("good2.txt").is_some());

        // Persisted unconditionally despite the failure.
        let persisted = UploadCache::load(dir.path());
        assert_eq!(persisted, summary.new_cache);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_limit() {
        let dir = tempdir().unwrap();
        for i in 0..12 {
            write(dir.path(), &format!("f{i}.txt"), b"data");
        }

        let mock = MockUploader::default();
        let summary = run(dir.path(), &UploadCache::default(), &mock).await.unwrap();

        assert_eq!(summary.uploaded, 12);
        assert!(
            mock.max_in_flight.load(Ordering::SeqCst) <= MAX_IN_FLIGHT,
            "at most {MAX_IN_FLIGHT} uploads in flight"
        );
    }

    #[tokio::test]
    async fn missing_working_dir_is_catastrophic() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("nope");
        let mock = MockUploader::default();
        assert!(run(&gone, &UploadCache::default(), &mock).await.is_err());
    }
}
