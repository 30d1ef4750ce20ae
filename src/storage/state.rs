use std::path::{Path, PathBuf};

use serde_json::Value;

const STATE_FILE: &str = "state.json";

pub fn state_path() -> anyhow::Result<PathBuf> {
    Ok(super::app_data_dir()?.join(STATE_FILE))
}

/// Returns the raw state document, or None when nothing usable is on disk.
/// A corrupt snapshot is treated as "no saved state", never a crash: the
/// file is rewritten after every queue mutation anyway.
pub fn load() -> Option<String> {
    load_from(&state_path().ok()?)
}

pub fn load_from(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    if text.trim().is_empty() {
        return None;
    }
    Some(text)
}

pub fn save(doc: &Value) -> anyhow::Result<()> {
    save_to(&state_path()?, doc)
}

/// Whole-file overwrite, no partial/append persistence.
pub fn save_to(path: &Path, doc: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, doc.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::queue::DownloadQueue;
    use crate::models::download::WorkItem;

    #[test]
    fn round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut q = DownloadQueue::new();
        q.enqueue(WorkItem::new("https://contoso.sharepoint.com/a"));
        let doc = q.export_state(None).unwrap();

        save_to(&path, &doc).unwrap();
        let text = load_from(&path).unwrap();
        let restored = DownloadQueue::import_state(&text).unwrap();
        assert_eq!(restored.len(), 1);
    }

    #[test]
    fn missing_or_empty_file_is_no_state() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_from(&dir.path().join("nope.json")).is_none());

        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, "  \n").unwrap();
        assert!(load_from(&empty).is_none());
    }
}
