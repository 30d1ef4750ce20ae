use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Maps filesystem-hostile characters to fullwidth lookalikes and collapses
/// whitespace, so a portal title is always usable as a file name.
pub fn sanitize_file_name(name: &str) -> String {
    let name: String = name.nfc().collect();
    let name = name.trim().replace(['\t', '\n', '\r'], "");
    let name = WS_RE.replace_all(&name, " ");
    let name = name.trim_end_matches([' ', '-', '.', ';']);

    let forbidden: &[(char, char)] = &[
        ('<', '＜'),
        ('>', '＞'),
        (':', '꞉'),
        ('"', '＂'),
        ('/', '⧸'),
        ('\\', '＼'),
        ('|', '｜'),
        ('?', '？'),
        ('*', ' '),
    ];

    let mut result = name.to_string();
    for (from, to) in forbidden {
        result = result.replace(*from, &to.to_string());
    }

    result.trim().to_string()
}

/// Per-item output folder wins over the global one; an empty global folder
/// falls back to `<downloads>/sharegrabVideos`.
pub fn output_folder(global: &str, item: &str) -> PathBuf {
    if !item.is_empty() {
        return PathBuf::from(item);
    }
    if !global.is_empty() {
        return PathBuf::from(global);
    }
    default_output_folder()
}

pub fn default_output_folder() -> PathBuf {
    dirs::download_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sharegrabVideos")
}

/// Save-as override wins over the resolved title.
pub fn output_file_name(title: &str, saveas: &str) -> String {
    if saveas.is_empty() {
        title.to_string()
    } else {
        format!("{}.mp4", saveas)
    }
}

/// Joins folder and name, forces the `.mp4` extension and appends an
/// incrementing numeric suffix until the path does not exist on disk.
/// Calling it twice without creating the file returns the same path.
pub fn unique_output_path(folder: &Path, file_name: &str) -> PathBuf {
    let name = sanitize_file_name(file_name);
    let mut base = folder.join(&name);
    let has_mp4_ext = base
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("mp4"))
        .unwrap_or(false);
    if !has_mp4_ext {
        base.set_extension("mp4");
    }

    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("video")
        .to_string();
    let mut candidate = base.clone();
    let mut i = 1u32;
    while candidate.exists() {
        candidate = folder.join(format!("{} {}.mp4", stem, i));
        i += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_maps_forbidden_chars() {
        assert_eq!(sanitize_file_name("a:b?c"), "a꞉b？c");
    }

    #[test]
    fn sanitize_collapses_whitespace() {
        assert_eq!(sanitize_file_name("intro   part  1"), "intro part 1");
    }

    #[test]
    fn sanitize_trims_trailing_punctuation() {
        assert_eq!(sanitize_file_name("lecture 3 - "), "lecture 3");
    }

    #[test]
    fn sanitize_normalizes_to_nfc() {
        assert_eq!(sanitize_file_name("e\u{0301}"), "\u{00e9}");
    }

    #[test]
    fn output_file_name_prefers_saveas() {
        assert_eq!(output_file_name("Title.mp4", "renamed"), "renamed.mp4");
        assert_eq!(output_file_name("Title.mp4", ""), "Title.mp4");
    }

    #[test]
    fn output_folder_precedence() {
        assert_eq!(output_folder("/g", "/v"), PathBuf::from("/v"));
        assert_eq!(output_folder("/g", ""), PathBuf::from("/g"));
        assert!(output_folder("", "")
            .to_string_lossy()
            .ends_with("sharegrabVideos"));
    }

    #[test]
    fn unique_path_forces_mp4_extension() {
        let dir = tempfile::tempdir().unwrap();
        let p = unique_output_path(dir.path(), "lecture.webm");
        assert_eq!(p.extension().unwrap(), "mp4");
        let p = unique_output_path(dir.path(), "lecture");
        assert_eq!(p.extension().unwrap(), "mp4");
    }

    #[test]
    fn unique_path_is_stable_until_created() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_output_path(dir.path(), "video.mp4");
        let second = unique_output_path(dir.path(), "video.mp4");
        assert_eq!(first, second);
        assert!(!first.exists());
    }

    #[test]
    fn unique_path_increments_suffix_after_creation() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_output_path(dir.path(), "video.mp4");
        std::fs::write(&first, b"x").unwrap();
        let second = unique_output_path(dir.path(), "video.mp4");
        assert_eq!(second, dir.path().join("video 1.mp4"));
        std::fs::write(&second, b"x").unwrap();
        let third = unique_output_path(dir.path(), "video.mp4");
        assert_eq!(third, dir.path().join("video 2.mp4"));
    }
}
