use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::dependencies::ToolPaths;
use crate::core::ffmpeg::RemuxDownloader;
use crate::core::ytdlp::SegmentedDownloader;
use crate::models::media::{DownloadResult, ResolvedMedia};
use crate::models::settings::{Backend, GlobalSettings};

/// Invocation parameters shared by both backends.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub connections: u32,
    /// Bandwidth cap passed through to the segmented backend, None = uncapped.
    pub speed_limit: Option<String>,
    /// Preserve the scratch directory (renamed aside) after a failure.
    pub keep_scratch_dir: bool,
}

impl TransferOptions {
    pub fn from_settings(settings: &GlobalSettings) -> Self {
        Self {
            connections: settings.connections(),
            speed_limit: if settings.speed_limit.is_empty() {
                None
            } else {
                Some(settings.speed_limit.clone())
            },
            keep_scratch_dir: settings.keep_scratch_dir,
        }
    }
}

/// One interchangeable transfer backend. Completion is the returned future:
/// `Ok` is the success event, `Err` the fail-with-reason event. Progress is
/// a normalized 0-100 percentage stream; values never regress. Both
/// backends guarantee the destination is either absent or a complete file.
#[async_trait]
pub trait Downloader: Send + Sync {
    fn name(&self) -> &'static str;

    async fn download(
        &self,
        media: &ResolvedMedia,
        dest: &Path,
        opts: &TransferOptions,
        progress: mpsc::Sender<f64>,
        cancel: CancellationToken,
    ) -> anyhow::Result<DownloadResult>;
}

/// Resolves the configured backend selection to a concrete downloader.
/// The yt-dlp binary serves both segmented modes; which one runs is decided
/// by the resolved media (cookies present = direct).
pub fn make_downloader(backend: Backend, tools: &ToolPaths) -> Box<dyn Downloader> {
    match backend {
        Backend::Ffmpeg => Box::new(RemuxDownloader::new(tools.ffmpeg.clone())),
        Backend::Ytdlp | Backend::Direct => {
            Box::new(SegmentedDownloader::new(tools.ytdlp.clone()))
        }
    }
}

/// Rate-limits progress emission towards the UI boundary.
pub struct ProgressThrottle {
    last_emit: Instant,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            last_emit: Instant::now() - Duration::from_secs(10),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    pub fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_emit) >= self.min_interval {
            self.last_emit = now;
            true
        } else {
            false
        }
    }
}
