use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::dependencies::ToolPaths;
use crate::core::engine::{self, ProgressThrottle, TransferOptions};
use crate::core::filename;
use crate::core::login::{LoginCredentials, LoginStrategy};
use crate::core::queue::DownloadQueue;
use crate::core::session::{PortalSession, SessionOptions};
use crate::models::download::WorkItem;
use crate::models::settings::GlobalSettings;
use crate::storage::state;

/// What to do with the in-flight item after a failed transfer. The item is
/// always reinserted; only the surfacing differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Stop was requested: no user-visible failure, loop ends.
    Cancelled,
    /// Retry-on-fail is enabled: retry the same item immediately.
    Retry,
    /// Surface the failure and leave the queue stopped.
    Halt,
}

/// A stop request beats every other outcome, so a race between natural
/// completion and a stop resolves deterministically as cancelled. Retry
/// treats resolution and transfer failures identically.
pub fn conclude(stopping: bool, retry_on_fail: bool) -> Disposition {
    if stopping {
        Disposition::Cancelled
    } else if retry_on_fail {
        Disposition::Retry
    } else {
        Disposition::Halt
    }
}

/// Shared handle for requesting cancellation of whatever transfer is
/// active. Cloneable into signal handlers.
#[derive(Clone, Default)]
pub struct StopHandle {
    stopping: Arc<AtomicBool>,
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl StopHandle {
    pub fn stop(&self) {
        // The flag must be visible before the cancel fires.
        self.stopping.store(true, Ordering::SeqCst);
        if let Ok(guard) = self.active.lock() {
            if let Some(token) = guard.as_ref() {
                token.cancel();
            }
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn set_active(&self, token: Option<CancellationToken>) {
        if let Ok(mut guard) = self.active.lock() {
            *guard = token;
        }
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub completed: usize,
    pub remaining: usize,
}

/// Owns the drive loop: dequeues one item at a time, resolves it through
/// the portal session, hands it to the engine, and transitions queue state
/// on the outcome. At most one item is downloading at any time, and that
/// item is held here, outside the queue's ordered sequence.
pub struct Controller {
    pub queue: DownloadQueue,
    settings: GlobalSettings,
    session: PortalSession,
    tools: ToolPaths,
    stop: StopHandle,
    downloading: Option<WorkItem>,
}

impl Controller {
    pub fn new(queue: DownloadQueue, settings: GlobalSettings, tools: ToolPaths) -> Self {
        Self {
            queue,
            settings,
            session: PortalSession::new(),
            tools,
            stop: StopHandle::default(),
            downloading: None,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn session_mut(&mut self) -> &mut PortalSession {
        &mut self.session
    }

    pub async fn run(
        &mut self,
        strategy: LoginStrategy,
        creds: &LoginCredentials,
    ) -> anyhow::Result<RunSummary> {
        let mut completed = 0usize;

        while !self.stop.is_stopping() {
            let Some(item) = self.queue.dequeue_next() else {
                break;
            };
            self.downloading = Some(item.clone());
            self.persist_state();

            let result = self.download_one(&item, strategy, creds).await;
            self.downloading = None;

            match result {
                Ok(path) => {
                    completed += 1;
                    tracing::info!("completed: {}", path.display());
                    self.persist_state();
                }
                Err(err) => {
                    self.queue.reinsert(item);
                    match conclude(self.stop.is_stopping(), self.settings.retry_on_fail) {
                        Disposition::Cancelled => {
                            tracing::info!("transfer stopped, item returned to the queue");
                            self.persist_state();
                            break;
                        }
                        Disposition::Retry => {
                            tracing::warn!("download failed ({}), retrying", err);
                            self.persist_state();
                        }
                        Disposition::Halt => {
                            self.persist_state();
                            return Err(err);
                        }
                    }
                }
            }
        }

        Ok(RunSummary {
            completed,
            remaining: self.queue.len(),
        })
    }

    async fn download_one(
        &mut self,
        item: &WorkItem,
        strategy: LoginStrategy,
        creds: &LoginCredentials,
    ) -> anyhow::Result<PathBuf> {
        let session_opts = SessionOptions::from_settings(&self.settings);
        let media = self
            .session
            .resolve(&item.url, strategy, creds, &session_opts)
            .await?;

        // Unnamed video? Give it a name and download anyway.
        let title = if media.title.is_empty() {
            format!("video-{}", Uuid::new_v4())
        } else {
            media.title.clone()
        };

        let folder = filename::output_folder(&self.settings.output_path, &item.settings.output_path);
        tokio::fs::create_dir_all(&folder)
            .await
            .with_context(|| format!("cannot create output directory {}", folder.display()))?;
        let dest = filename::unique_output_path(
            &folder,
            &filename::output_file_name(&title, &item.settings.saveas),
        );

        let downloader = engine::make_downloader(self.settings.downloader, &self.tools);
        let transfer_opts = TransferOptions::from_settings(&self.settings);
        let cancel = CancellationToken::new();
        self.stop.set_active(Some(cancel.clone()));
        if self.stop.is_stopping() {
            // A stop raced the setup; never start the transfer.
            cancel.cancel();
        }

        let (tx, mut rx) = mpsc::channel::<f64>(32);
        let label = title.clone();
        let printer = tokio::spawn(async move {
            let mut throttle = ProgressThrottle::new(1000);
            let mut last = -1.0f64;
            while let Some(pct) = rx.recv().await {
                if pct > last && (throttle.should_emit() || pct >= 100.0) {
                    last = pct;
                    tracing::info!("[{}] {:.1}%", label, pct);
                }
            }
        });

        tracing::info!("downloading '{}' -> {}", title, dest.display());
        let result = downloader
            .download(&media, &dest, &transfer_opts, tx, cancel)
            .await;
        self.stop.set_active(None);
        let _ = printer.await;

        result.map(|r| r.file_path)
    }

    fn persist_state(&self) {
        if !self.settings.auto_save_state {
            return;
        }
        if let Err(err) = self.persist_now() {
            tracing::warn!("unable to save queue state: {}", err);
        }
    }

    /// Unconditional snapshot, for the explicit save action.
    pub fn persist_now(&self) -> anyhow::Result<()> {
        let doc = self.queue.export_state(self.downloading.as_ref())?;
        state::save(&doc)
    }

    pub async fn shutdown(&mut self) {
        self.session.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_beats_retry() {
        assert_eq!(conclude(true, true), Disposition::Cancelled);
        assert_eq!(conclude(true, false), Disposition::Cancelled);
    }

    #[test]
    fn retry_only_when_enabled() {
        assert_eq!(conclude(false, true), Disposition::Retry);
        assert_eq!(conclude(false, false), Disposition::Halt);
    }

    #[test]
    fn stop_handle_cancels_the_active_token() {
        let handle = StopHandle::default();
        let token = CancellationToken::new();
        handle.set_active(Some(token.clone()));

        handle.stop();
        assert!(handle.is_stopping());
        assert!(token.is_cancelled());
    }

    #[test]
    fn stop_without_active_transfer_sets_flag_only() {
        let handle = StopHandle::default();
        handle.stop();
        assert!(handle.is_stopping());
    }

    #[test]
    fn stopped_failure_is_not_surfaced() {
        // The drive loop maps a failed transfer with the stopping flag set
        // to Cancelled: the item is reinserted and no error reaches the
        // user. This pins that mapping.
        let handle = StopHandle::default();
        handle.stop();
        assert_eq!(
            conclude(handle.is_stopping(), false),
            Disposition::Cancelled
        );
    }
}
