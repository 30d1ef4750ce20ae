use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::models::settings::{Backend, GlobalSettings, SETTINGS_SCHEMA_VERSION};

const SETTINGS_FILE: &str = "settings.json";

pub fn settings_path() -> anyhow::Result<PathBuf> {
    Ok(super::app_data_dir()?.join(SETTINGS_FILE))
}

/// Loads settings defensively: a missing or corrupt blob yields the
/// defaults, never an error.
pub fn load() -> GlobalSettings {
    let Ok(path) = settings_path() else {
        return GlobalSettings::default();
    };
    load_from(&path)
}

pub fn load_from(path: &Path) -> GlobalSettings {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_settings(&text),
        Err(_) => GlobalSettings::default(),
    }
}

pub fn save(settings: &GlobalSettings) -> anyhow::Result<()> {
    save_to(&settings_path()?, settings)
}

/// Whole-file overwrite; the blob is small and rewritten on every explicit
/// save.
pub fn save_to(path: &Path, settings: &GlobalSettings) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}

pub fn parse_settings(text: &str) -> GlobalSettings {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return GlobalSettings::default();
    };
    let value = migrate(value);
    serde_json::from_value::<GlobalSettings>(value)
        .map(GlobalSettings::normalized)
        .unwrap_or_default()
}

/// One-time schema upgrade for blobs written by older versions. Missing
/// fields are covered by serde defaults; this only repairs values whose
/// wire shape changed.
fn migrate(mut value: Value) -> Value {
    let stored = value
        .get("_version")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    if stored >= SETTINGS_SCHEMA_VERSION {
        return value;
    }

    if let Some(name) = value.get("downloader").and_then(Value::as_str) {
        let canonical = Backend::parse(name)
            .and_then(|b| serde_json::to_value(b).ok())
            .unwrap_or_else(|| json!("yt-dlp"));
        value["downloader"] = canonical;
    }
    value["_version"] = json!(SETTINGS_SCHEMA_VERSION);
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_blob_falls_back_to_defaults() {
        assert_eq!(parse_settings("{ not json"), GlobalSettings::default());
        assert_eq!(parse_settings(""), GlobalSettings::default());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let s = parse_settings(r#"{"_version": 12, "retryOnFail": true, "someFutureKnob": 1}"#);
        assert!(s.retry_on_fail);
    }

    #[test]
    fn old_blob_is_migrated_to_current_schema() {
        let s = parse_settings(r#"{"_version": 7, "downloader": "ytdlp", "ytdlpN": 9}"#);
        assert_eq!(s.version, SETTINGS_SCHEMA_VERSION);
        assert_eq!(s.downloader, Backend::Ytdlp);
        assert_eq!(s.ytdlp_n, 5);
    }

    #[test]
    fn unknown_downloader_in_old_blob_resets_to_segmented() {
        let s = parse_settings(r#"{"_version": 3, "downloader": "curl"}"#);
        assert_eq!(s.downloader, Backend::Ytdlp);
    }

    #[test]
    fn conflicting_auth_flags_are_normalized_on_load() {
        let s = parse_settings(r#"{"_version": 12, "useKeytar": true, "userdataFold": true}"#);
        assert!(s.use_credential_store);
        assert!(!s.use_profile_dir);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = GlobalSettings::default();
        settings.retry_on_fail = true;
        settings.output_path = "/videos".into();

        save_to(&path, &settings).unwrap();
        assert_eq!(load_from(&path), settings);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            load_from(&dir.path().join("nope.json")),
            GlobalSettings::default()
        );
    }
}
