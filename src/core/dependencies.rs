use std::path::PathBuf;
use std::process::Stdio;

use anyhow::anyhow;

pub const FFMPEG_INSTALL_URL: &str = "https://ffmpeg.org/download.html";
pub const YTDLP_INSTALL_URL: &str = "https://github.com/yt-dlp/yt-dlp/wiki/Installation";

#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ytdlp: PathBuf,
}

fn bin_name(tool: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{}.exe", tool)
    } else {
        tool.to_string()
    }
}

fn version_flag_for(tool: &str) -> &'static str {
    match tool {
        "ffmpeg" | "ffprobe" => "-version",
        _ => "--version",
    }
}

/// Probes PATH (plus the managed bin dir) for a runnable tool.
pub async fn find_tool(tool: &str) -> Option<PathBuf> {
    let name = bin_name(tool);

    if let Ok(status) = crate::core::process::command(&name)
        .arg(version_flag_for(tool))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        if status.success() {
            return Some(PathBuf::from(&name));
        }
    }

    let managed = dirs::data_dir()?.join("sharegrab").join("bin").join(&name);
    if managed.exists() {
        return Some(managed);
    }

    None
}

pub async fn check_version(tool: &str) -> Option<String> {
    let path = find_tool(tool).await?;
    let output = crate::core::process::command(&path)
        .arg(version_flag_for(tool))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let first_line = stdout.lines().next().unwrap_or("");
    if tool == "ffmpeg" {
        first_line.split_whitespace().nth(2).map(|s| s.to_string())
    } else {
        Some(first_line.trim().to_string())
    }
}

/// Startup preflight. A missing external tool is fatal; the returned error
/// carries the remediation link for the caller to print before exiting.
pub async fn preflight() -> anyhow::Result<ToolPaths> {
    let ffmpeg = find_tool("ffmpeg").await.ok_or_else(|| {
        anyhow!(
            "ffmpeg was not found on your system; it is required to remux streams. See {}",
            FFMPEG_INSTALL_URL
        )
    })?;
    let ytdlp = find_tool("yt-dlp").await.ok_or_else(|| {
        anyhow!(
            "yt-dlp was not found on your system; it is required for segmented downloads. See {}",
            YTDLP_INSTALL_URL
        )
    })?;
    Ok(ToolPaths { ffmpeg, ytdlp })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_flags_match_tool_conventions() {
        assert_eq!(version_flag_for("ffmpeg"), "-version");
        assert_eq!(version_flag_for("yt-dlp"), "--version");
    }

    #[test]
    fn bin_name_platform_suffix() {
        let name = bin_name("yt-dlp");
        if cfg!(target_os = "windows") {
            assert_eq!(name, "yt-dlp.exe");
        } else {
            assert_eq!(name, "yt-dlp");
        }
    }
}
