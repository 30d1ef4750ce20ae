use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::engine::{Downloader, TransferOptions};
use crate::core::manifest;
use crate::models::media::{DownloadResult, ResolvedMedia};

const STOP_GRACE: Duration = Duration::from_secs(5);

/// Streaming remux backend: feeds the DASH manifest straight into a
/// stream-copy repackaging run writing the destination file. No
/// re-encoding, container repackaging only.
pub struct RemuxDownloader {
    ffmpeg: PathBuf,
    client: reqwest::Client,
}

impl RemuxDownloader {
    pub fn new(ffmpeg: PathBuf) -> Self {
        Self {
            ffmpeg,
            client: reqwest::Client::new(),
        }
    }

    /// The manifest itself is the only place the total media time lives;
    /// fetch and parse it up front so progress can be normalized.
    async fn fetch_total_duration(&self, manifest_url: &str) -> anyhow::Result<u64> {
        let resp = self.client.get(manifest_url).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("HTTP {} fetching the manifest", resp.status()));
        }
        let body = resp.text().await?;
        manifest::parse_mpd_duration(&body)
    }
}

#[async_trait]
impl Downloader for RemuxDownloader {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn download(
        &self,
        media: &ResolvedMedia,
        dest: &Path,
        _opts: &TransferOptions,
        progress: mpsc::Sender<f64>,
        cancel: CancellationToken,
    ) -> anyhow::Result<DownloadResult> {
        let total_secs = self.fetch_total_duration(&media.url).await?;

        let mut child = crate::core::process::command(&self.ffmpeg)
            .args([
                "-y",
                "-i",
                media.url.as_str(),
                "-c:v",
                "copy",
                "-c:a",
                "copy",
                "-crf",
                "25",
                "-progress",
                "pipe:1",
                "-nostats",
                "-loglevel",
                "error",
            ])
            .arg(dest)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("failed to start ffmpeg: {}", e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("ffmpeg has no stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("ffmpeg has no stderr"))?;

        let progress_tx = progress.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(ProgressLine::OutTimeMicros(us)) = parse_progress_line(&line) {
                    let pct = percent_of(us, total_secs);
                    let _ = progress_tx.send(pct).await;
                }
            }
        });
        let err_reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!("[ffmpeg] {}", line);
                tail = line;
            }
            tail
        });

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                // Cooperative shutdown first: ffmpeg quits cleanly on 'q'
                // and finalizes the container. Force-kill as fallback.
                if let Some(mut stdin) = child.stdin.take() {
                    let _ = stdin.write_all(b"q").await;
                    let _ = stdin.flush().await;
                }
                if tokio::time::timeout(STOP_GRACE, child.wait()).await.is_err() {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
                let _ = reader.await;
                let _ = err_reader.await;
                let _ = tokio::fs::remove_file(dest).await;
                return Err(anyhow!("transfer stopped"));
            }
        };

        let _ = reader.await;
        let stderr_tail = err_reader.await.unwrap_or_default();

        if !status.success() {
            // A partial remux output is never playable.
            let _ = tokio::fs::remove_file(dest).await;
            let code = status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".into());
            return Err(anyhow!("ffmpeg exited with code {}: {}", code, stderr_tail));
        }

        let _ = progress.send(100.0).await;
        let meta = tokio::fs::metadata(dest).await?;
        Ok(DownloadResult {
            file_path: dest.to_path_buf(),
            file_size_bytes: meta.len(),
        })
    }
}

#[derive(Debug, PartialEq)]
pub enum ProgressLine {
    /// Elapsed media time in microseconds (ffmpeg's `out_time_ms` key is
    /// microseconds despite the name).
    OutTimeMicros(u64),
    End,
}

pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let line = line.trim();
    if let Some(value) = line.strip_prefix("out_time_us=").or_else(|| line.strip_prefix("out_time_ms=")) {
        return value.trim().parse::<u64>().ok().map(ProgressLine::OutTimeMicros);
    }
    if line == "progress=end" {
        return Some(ProgressLine::End);
    }
    None
}

/// Elapsed-media-time over total-duration, clamped to [0, 100].
pub fn percent_of(elapsed_micros: u64, total_secs: u64) -> f64 {
    if total_secs == 0 {
        return 0.0;
    }
    let elapsed = elapsed_micros as f64 / 1_000_000.0;
    (elapsed / total_secs as f64 * 100.0).clamp(0.0, 100.0)
}
