/*!
Sync orchestration module.

Sequences "upload before command" and "pull snapshot after command
succeeds" around one proxied command invocation:

  START     -> skip everything unless the command's group is on the
               sync-required allow-list
  PRE_SYNC  -> upload fan-out pass; a catastrophic engine failure is fatal
               (the command body may depend on freshly uploaded state);
               per-file classified failures are not
  EXECUTE   -> the command body (HTTP proxy call)
  POST_SYNC -> snapshot pull, only after a successful EXECUTE; every
               failure is downgraded to a warning and never flips the
               command's exit code
  END

The post-command pull runs as a spawned task whose failures are captured
internally; by default the orchestrator awaits it before returning.
`AGINT_BACKGROUND_SYNC=1` detaches it instead.

Submodules:
  cache  - persistent transfer cache
  upload - bounded-concurrency upload fan-out engine
  pull   - snapshot download + validated extraction
*/

pub mod cache;
pub mod pull;
pub mod upload;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::api::ApiClient;
use crate::utils::output::{Color, color};
use crate::{log_debug, log_warn};

/// Command groups whose invocations are bracketed by synchronization.
pub const SYNC_REQUIRED_GROUPS: &[&str] = &["dagify", "dagent", "schemagin", "datagin"];

pub fn sync_required(group: &str) -> bool {
    SYNC_REQUIRED_GROUPS.contains(&group)
}

/// Drives pre/post synchronization around one command invocation.
pub struct SyncOrchestrator {
    api: Arc<ApiClient>,
    working_dir: PathBuf,
    /// Detach the post-command pull instead of awaiting it.
    background_pull: bool,
}

impl SyncOrchestrator {
    pub fn new(api: Arc<ApiClient>, working_dir: PathBuf, background_pull: bool) -> Self {
        Self {
            api,
            working_dir,
            background_pull,
        }
    }

    /// Run `body` with synchronization before and after as required by
    /// `group`. Returns `body`'s result; pre-sync catastrophic failures
    /// surface as errors, post-sync failures never do.
    pub async fn around<F, Fut>(&self, group: &str, body: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let required = sync_required(group);
        if required {
            self.pre_sync().await?;
            log_debug!("Pre-command upstream sync successful.");
        }

        body().await?;

        if required {
            self.post_sync().await;
        }
        Ok(())
    }

    /// Upload pass over the working directory. An `Err` here is fatal to
    /// the invocation; classified per-file failures are only warned about.
    async fn pre_sync(&self) -> Result<()> {
        log_debug!("Starting upstream sync (with caching)...");
        let cache = cache::UploadCache::load(&self.working_dir);
        log_debug!("Transfer cache holds {} entries.", cache.len());
        let summary = upload::run(&self.working_dir, &cache, self.api.as_ref())
            .await
            .context("Pre-command sync failed")?;
        if summary.failed > 0 {
            eprintln!(
                "{}",
                color(
                    Color::Yellow,
                    format!(
                        "Warning: {} file(s) failed to upload; they will be retried on the next run.",
                        summary.failed
                    )
                )
            );
        }
        log_debug!("Upstream sync finished.");
        Ok(())
    }

    /// Snapshot pull; internally infallible, optionally detached.
    async fn post_sync(&self) {
        let api = Arc::clone(&self.api);
        let target = self.working_dir.clone();
        let handle = tokio::spawn(async move {
            pull::pull(&api, &target).await;
        });
        if self.background_pull {
            // Detached: allowed to run to completion independently, but a
            // process exit may cut it short. Best effort by design.
            log_debug!("Post-command snapshot pull detached.");
            return;
        }
        if let Err(e) = handle.await {
            log_warn!("Post-command sync task panicked: {e}");
        }
    }
}
