use std::path::PathBuf;

/// Session cookies harvested from the browser, required to authorize a
/// direct HTTP fetch outside of it.
#[derive(Debug, Clone)]
pub struct AuthCookies {
    pub fed_auth: String,
    pub rt_fa: String,
}

impl AuthCookies {
    pub fn header_value(&self) -> String {
        format!("FedAuth={}; rtFa={}", self.fed_auth, self.rt_fa)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Resolve to a DASH manifest URL built from the donor response.
    Manifest,
    /// Resolve to the assembled source file plus session cookies.
    Direct,
}

/// Result of one session resolution. Lives only for the duration of a
/// single download attempt, never persisted.
#[derive(Debug, Clone)]
pub struct ResolvedMedia {
    pub url: String,
    /// Display title. May be empty; callers must synthesize a fallback name.
    pub title: String,
    /// Present only in direct mode.
    pub cookies: Option<AuthCookies>,
}

#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub file_path: PathBuf,
    pub file_size_bytes: u64,
}
