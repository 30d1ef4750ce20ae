use serde::{Deserialize, Serialize};

use crate::models::media::ResolveMode;

pub const SETTINGS_SCHEMA_VERSION: u32 = 12;

const MIN_CONNECTIONS: u32 = 1;
const MAX_CONNECTIONS: u32 = 5;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    #[serde(rename = "yt-dlp")]
    Ytdlp,
    #[serde(rename = "ffmpeg")]
    Ffmpeg,
    #[serde(rename = "direct")]
    Direct,
}

impl Backend {
    pub fn resolve_mode(&self) -> ResolveMode {
        match self {
            Backend::Direct => ResolveMode::Direct,
            _ => ResolveMode::Manifest,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "yt-dlp" | "ytdlp" => Some(Backend::Ytdlp),
            "ffmpeg" => Some(Backend::Ffmpeg),
            "direct" => Some(Backend::Direct),
            _ => None,
        }
    }
}

/// How authentication reaches the portal. Exactly one mode is active at a
/// time; `GlobalSettings::normalized` enforces the exclusivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Credentials typed per run (or interactively in the headed browser).
    Manual,
    /// Credentials pulled from the OS credential store.
    CredentialStore,
    /// Reused on-disk browser profile; no login strategy runs at all.
    PersistentProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalSettings {
    #[serde(rename = "_version")]
    pub version: u32,
    pub output_path: String,
    pub downloader: Backend,
    pub ytdlp_n: u32,
    pub direct_n: u32,
    /// Bandwidth cap passed through to the segmented backend, e.g. "5M".
    /// Empty disables the cap.
    pub speed_limit: String,
    pub timeout: u64,
    pub login_module: usize,
    pub retry_on_fail: bool,
    #[serde(rename = "useKeytar")]
    pub use_credential_store: bool,
    #[serde(rename = "userdataFold")]
    pub use_profile_dir: bool,
    pub keep_browser_open: bool,
    pub keep_scratch_dir: bool,
    pub auto_save_state: bool,
    pub logging: bool,
    pub custom_chrome_path: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_SCHEMA_VERSION,
            output_path: String::new(),
            downloader: Backend::Ytdlp,
            ytdlp_n: 5,
            direct_n: 5,
            speed_limit: String::new(),
            timeout: DEFAULT_TIMEOUT_SECS,
            login_module: 0,
            retry_on_fail: false,
            use_credential_store: false,
            use_profile_dir: false,
            keep_browser_open: false,
            keep_scratch_dir: false,
            auto_save_state: true,
            logging: false,
            custom_chrome_path: String::new(),
        }
    }
}

pub fn clamp_connections(n: u32) -> u32 {
    n.clamp(MIN_CONNECTIONS, MAX_CONNECTIONS)
}

impl GlobalSettings {
    pub fn auth_mode(&self) -> AuthMode {
        if self.use_profile_dir {
            AuthMode::PersistentProfile
        } else if self.use_credential_store {
            AuthMode::CredentialStore
        } else {
            AuthMode::Manual
        }
    }

    /// Returns a copy with all invariants restored: one active auth mode
    /// (credential store wins over profile dir, profile dir zeroes the
    /// login module), connection counts clamped, timeout floored.
    pub fn normalized(mut self) -> Self {
        self.use_profile_dir = !self.use_credential_store && self.use_profile_dir;
        if self.use_profile_dir {
            self.login_module = 0;
        }
        self.ytdlp_n = clamp_connections(self.ytdlp_n);
        self.direct_n = clamp_connections(self.direct_n);
        if self.timeout == 0 {
            self.timeout = DEFAULT_TIMEOUT_SECS;
        }
        self
    }

    pub fn connections(&self) -> u32 {
        match self.downloader {
            Backend::Direct => self.direct_n,
            _ => self.ytdlp_n,
        }
    }
}

/// Partial settings update, the shape a settings form (or the CLI flags)
/// produces. Applying it is a pure transform on an existing value.
#[derive(Debug, Clone, Default)]
pub struct SettingsForm {
    pub output_path: Option<String>,
    pub downloader: Option<Backend>,
    pub ytdlp_n: Option<u32>,
    pub direct_n: Option<u32>,
    pub speed_limit: Option<String>,
    pub timeout: Option<u64>,
    pub login_module: Option<usize>,
    pub retry_on_fail: Option<bool>,
    pub use_credential_store: Option<bool>,
    pub use_profile_dir: Option<bool>,
    pub keep_browser_open: Option<bool>,
    pub keep_scratch_dir: Option<bool>,
    pub auto_save_state: Option<bool>,
    pub logging: Option<bool>,
    pub custom_chrome_path: Option<String>,
}

impl SettingsForm {
    pub fn apply(self, base: &GlobalSettings) -> GlobalSettings {
        let mut next = base.clone();
        if let Some(v) = self.output_path {
            next.output_path = v;
        }
        if let Some(v) = self.downloader {
            next.downloader = v;
        }
        if let Some(v) = self.ytdlp_n {
            next.ytdlp_n = v;
        }
        if let Some(v) = self.direct_n {
            next.direct_n = v;
        }
        if let Some(v) = self.speed_limit {
            next.speed_limit = v;
        }
        if let Some(v) = self.timeout {
            next.timeout = v;
        }
        if let Some(v) = self.login_module {
            next.login_module = v;
        }
        if let Some(v) = self.retry_on_fail {
            next.retry_on_fail = v;
        }
        if let Some(v) = self.use_credential_store {
            next.use_credential_store = v;
            if v {
                next.use_profile_dir = false;
            }
        }
        if let Some(v) = self.use_profile_dir {
            next.use_profile_dir = v;
            if v {
                next.use_credential_store = false;
            }
        }
        if let Some(v) = self.keep_browser_open {
            next.keep_browser_open = v;
        }
        if let Some(v) = self.keep_scratch_dir {
            next.keep_scratch_dir = v;
        }
        if let Some(v) = self.auto_save_state {
            next.auto_save_state = v;
        }
        if let Some(v) = self.logging {
            next.logging = v;
        }
        if let Some(v) = self.custom_chrome_path {
            next.custom_chrome_path = v;
        }
        next.normalized()
    }
}
