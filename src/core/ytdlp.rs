use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use anyhow::anyhow;
use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::engine::{Downloader, TransferOptions};
use crate::models::media::{AuthCookies, DownloadResult, ResolvedMedia};

/// Singleton scratch directory used in manifest mode so partial files never
/// collide with other queue items' destinations. One transfer owns it at a
/// time (the queue allows a single active download).
pub const SCRATCH_DIR_NAME: &str = "sharegrab-tmp";

static PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s(\d+\.\d+)%").unwrap());

/// Segmented-fetch backend: shells out to the multi-connection fetcher.
/// Manifest mode downloads into the scratch directory and promotes the
/// output on success; direct mode fetches straight to the destination with
/// the harvested session cookies.
pub struct SegmentedDownloader {
    ytdlp: PathBuf,
}

impl SegmentedDownloader {
    pub fn new(ytdlp: PathBuf) -> Self {
        Self { ytdlp }
    }
}

#[async_trait]
impl Downloader for SegmentedDownloader {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn download(
        &self,
        media: &ResolvedMedia,
        dest: &Path,
        opts: &TransferOptions,
        progress: mpsc::Sender<f64>,
        cancel: CancellationToken,
    ) -> anyhow::Result<DownloadResult> {
        match &media.cookies {
            Some(cookies) => {
                self.download_direct(media, cookies, dest, opts, progress, cancel)
                    .await
            }
            None => self.download_manifest(media, dest, opts, progress, cancel).await,
        }
    }
}

enum RunEnd {
    Exited(std::process::ExitStatus),
    Stopped,
}

impl SegmentedDownloader {
    async fn download_manifest(
        &self,
        media: &ResolvedMedia,
        dest: &Path,
        opts: &TransferOptions,
        progress: mpsc::Sender<f64>,
        cancel: CancellationToken,
    ) -> anyhow::Result<DownloadResult> {
        let dest_dir = dest
            .parent()
            .ok_or_else(|| anyhow!("destination has no parent directory"))?;
        let file_name = dest
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("destination has no file name"))?
            .to_string();

        let scratch = dest_dir.join(SCRATCH_DIR_NAME);
        if scratch.exists() {
            tokio::fs::remove_dir_all(&scratch).await?;
        }
        tokio::fs::create_dir_all(&scratch).await?;
        let scratch_out = scratch.join(&file_name);

        let mut args: Vec<String> = vec![
            "-N".into(),
            opts.connections.to_string(),
            "-o".into(),
            scratch_out.to_string_lossy().into_owned(),
            "-v".into(),
            media.url.clone(),
            "--no-part".into(),
        ];
        if let Some(cap) = &opts.speed_limit {
            args.push("-r".into());
            args.push(cap.clone());
        }

        let end = self
            .run(&args, Phase::Merged(ProgressMerger::new()), &progress, &cancel)
            .await?;

        match end {
            RunEnd::Stopped => {
                let _ = tokio::fs::remove_dir_all(&scratch).await;
                Err(anyhow!("transfer stopped"))
            }
            RunEnd::Exited(status) if !status.success() => {
                discard_scratch(&scratch, opts.keep_scratch_dir).await;
                Err(anyhow!("yt-dlp exited with code {}", status))
            }
            RunEnd::Exited(_) => {
                let promoted = promote_scratch_file(&scratch, &file_name, dest).await;
                let _ = tokio::fs::remove_dir_all(&scratch).await;
                promoted?;
                let _ = progress.send(100.0).await;
                let meta = tokio::fs::metadata(dest).await?;
                Ok(DownloadResult {
                    file_path: dest.to_path_buf(),
                    file_size_bytes: meta.len(),
                })
            }
        }
    }

    async fn download_direct(
        &self,
        media: &ResolvedMedia,
        cookies: &AuthCookies,
        dest: &Path,
        opts: &TransferOptions,
        progress: mpsc::Sender<f64>,
        cancel: CancellationToken,
    ) -> anyhow::Result<DownloadResult> {
        let mut args: Vec<String> = vec![
            "-N".into(),
            opts.connections.to_string(),
            "-o".into(),
            dest.to_string_lossy().into_owned(),
            "-v".into(),
            media.url.clone(),
            "--no-part".into(),
            "--add-header".into(),
            format!("Cookie: {}", cookies.header_value()),
        ];
        if let Some(cap) = &opts.speed_limit {
            args.push("-r".into());
            args.push(cap.clone());
        }

        let end = self.run(&args, Phase::Direct, &progress, &cancel).await?;

        match end {
            RunEnd::Stopped => {
                let _ = tokio::fs::remove_file(dest).await;
                Err(anyhow!("transfer stopped"))
            }
            RunEnd::Exited(status) if !status.success() => {
                let _ = tokio::fs::remove_file(dest).await;
                Err(anyhow!("yt-dlp exited with code {}", status))
            }
            RunEnd::Exited(_) => {
                let _ = progress.send(100.0).await;
                let meta = tokio::fs::metadata(dest).await?;
                Ok(DownloadResult {
                    file_path: dest.to_path_buf(),
                    file_size_bytes: meta.len(),
                })
            }
        }
    }

    async fn run(
        &self,
        args: &[String],
        mut phase: Phase,
        progress: &mpsc::Sender<f64>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<RunEnd> {
        let mut child = crate::core::process::command(&self.ytdlp)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("failed to start yt-dlp: {}", e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("yt-dlp has no stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("yt-dlp has no stderr"))?;

        let progress_tx = progress.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(raw) = parse_percent_line(&line) {
                    let _ = progress_tx.send(phase.map(raw)).await;
                }
            }
        });
        let err_reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!("[yt-dlp] {}", line);
            }
        });

        let end = tokio::select! {
            status = child.wait() => RunEnd::Exited(status?),
            _ = cancel.cancelled() => {
                // No reliable cross-platform signal delivery to yt-dlp's
                // worker processes; forceful termination is the contract.
                let _ = child.start_kill();
                let _ = child.wait().await;
                RunEnd::Stopped
            }
        };

        let _ = reader.await;
        let _ = err_reader.await;
        Ok(end)
    }
}

/// On failure the scratch directory must never stay in place to collide
/// with a future run: remove it, or rename it aside for diagnostics.
async fn discard_scratch(scratch: &Path, keep: bool) {
    if keep {
        let aside = scratch.with_file_name(format!("{}-failed", SCRATCH_DIR_NAME));
        let _ = tokio::fs::remove_dir_all(&aside).await;
        if tokio::fs::rename(scratch, &aside).await.is_err() {
            let _ = tokio::fs::remove_dir_all(scratch).await;
        }
    } else {
        let _ = tokio::fs::remove_dir_all(scratch).await;
    }
}

/// Copies the matching output file out of the scratch directory into the
/// real destination.
async fn promote_scratch_file(
    scratch: &Path,
    file_name: &str,
    dest: &Path,
) -> anyhow::Result<()> {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);

    let mut entries = tokio::fs::read_dir(scratch).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.contains(stem) {
            tokio::fs::copy(&path, dest).await?;
            return Ok(());
        }
    }
    Err(anyhow!(
        "no output file matching '{}' in the scratch directory",
        file_name
    ))
}

enum Phase {
    /// Manifest mode: two roughly-equal phases (video then audio) merged
    /// into one scale.
    Merged(ProgressMerger),
    /// Direct mode: single file, the reported percentage maps straight
    /// through.
    Direct,
}

impl Phase {
    fn map(&mut self, raw: f64) -> f64 {
        match self {
            Phase::Merged(merger) => merger.push(raw) as f64,
            Phase::Direct => raw.clamp(0.0, 100.0),
        }
    }
}

/// Merges the two download phases into a single monotonically
/// non-decreasing 0-100 scale. Each phase's raw percentage counts for half;
/// the watermark keeps the reported value from regressing when the second
/// phase restarts from zero.
#[derive(Debug, Default)]
pub struct ProgressMerger {
    current: u32,
    phase_mark: u32,
}

impl ProgressMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, raw: f64) -> u32 {
        let half = ((raw / 2.0).floor() as i64).max(0) as u32;
        let mut merged = half;

        if self.current >= 50 {
            merged = self.current;
            if half < 50 && half > self.phase_mark {
                merged = self.current + (half - self.phase_mark);
                self.phase_mark = half;
            }
        }

        if merged > self.current {
            self.current = merged.min(100);
        }
        self.current
    }
}

/// Extracts the percentage from a fetcher progress line, e.g.
/// `[download]  45.3% of 10.00MiB at 1.00MiB/s ETA 00:05`.
pub fn parse_percent_line(line: &str) -> Option<f64> {
    if !line.contains("[download]") {
        return None;
    }
    PERCENT_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}
