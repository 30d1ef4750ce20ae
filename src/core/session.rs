use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail};
use base64::Engine as _;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EventResponseReceived, GetResponseBodyParams, RequestId,
};
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use url::Url;

use crate::core::login::{LoginCredentials, LoginStrategy};
use crate::core::manifest;
use crate::models::media::{AuthCookies, ResolveMode, ResolvedMedia};
use crate::models::settings::GlobalSettings;

/// REST path substrings identifying the intercepted response that carries
/// the donor listing data, in priority order.
pub const API_SIGNATURES: [&str; 3] = [
    "RenderListDataAsStream?@a1=",
    "RenderListDataAsStream?@listUrl",
    "RenderListDataAsStream",
];

/// The embedded player element; its appearance signals the page has fully
/// hydrated and the protected-content API calls are about to fire.
const PLAYER_SELECTOR: &str = "video";

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const LIVENESS_POLL: Duration = Duration::from_millis(500);
const LIVENESS_ATTEMPTS: u32 = 6;
const CAPTURE_SETTLE: Duration = Duration::from_millis(1500);
const MAX_CAPTURE_ROUNDS: u32 = 2;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Navigation/operation timeout for bounded waits.
    pub timeout: Duration,
    /// Reuse the persistent browser profile; supersedes any login strategy.
    pub use_profile_dir: bool,
    /// Keep the automation browser alive across calls. Login runs only on
    /// a freshly launched browser, since the session persists.
    pub keep_browser_open: bool,
    pub mode: ResolveMode,
    pub custom_chrome_path: String,
}

impl SessionOptions {
    pub fn from_settings(settings: &GlobalSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.timeout),
            use_profile_dir: settings.use_profile_dir,
            keep_browser_open: settings.keep_browser_open,
            mode: settings.downloader.resolve_mode(),
            custom_chrome_path: settings.custom_chrome_path.clone(),
        }
    }
}

pub fn profile_dir() -> anyhow::Result<PathBuf> {
    dirs::data_dir()
        .map(|d| d.join("sharegrab").join("browser-profile"))
        .ok_or_else(|| anyhow!("could not determine data directory"))
}

struct BrowserHandle {
    browser: Browser,
    handler: JoinHandle<()>,
}

/// One end-to-end automation session against the portal: signs in, waits
/// for the player, intercepts the API responses behind it and derives
/// either a DASH manifest URL or a direct file URL plus session cookies.
#[derive(Default)]
pub struct PortalSession {
    browser: Option<BrowserHandle>,
}

impl PortalSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves one target page to fetchable media. The browser is torn
    /// down afterwards (also on error) unless keep-open is requested.
    pub async fn resolve(
        &mut self,
        page_url: &str,
        strategy: LoginStrategy,
        creds: &LoginCredentials,
        opts: &SessionOptions,
    ) -> anyhow::Result<ResolvedMedia> {
        let result = self.resolve_inner(page_url, strategy, creds, opts).await;
        if !opts.keep_browser_open {
            self.close().await;
        }
        result
    }

    async fn resolve_inner(
        &mut self,
        page_url: &str,
        strategy: LoginStrategy,
        creds: &LoginCredentials,
        opts: &SessionOptions,
    ) -> anyhow::Result<ResolvedMedia> {
        let (page, fresh) = self.open_page(page_url, opts).await?;

        // Profile-dir bypass supersedes manual/stored login entirely; a
        // reused keep-open browser is already authenticated.
        if fresh && !opts.use_profile_dir && !strategy.is_bypass() {
            strategy.execute(&page, creds, opts.timeout).await?;
        }

        wait_for_element(&page, PLAYER_SELECTOR, opts.timeout).await?;

        // Intercept from here on; the forced full reload below re-triggers
        // the protected-content API calls while we are listening.
        let mut events = page.event_listener::<EventResponseReceived>().await?;
        let captured: Arc<Mutex<Vec<(String, RequestId)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        let collector = tokio::spawn(async move {
            while let Some(ev) = events.next().await {
                if let Ok(mut list) = sink.lock() {
                    list.push((ev.response.url.clone(), ev.request_id.clone()));
                }
            }
        });

        let mut round = 0;
        let outcome = loop {
            page.reload().await?;
            tokio::time::sleep(CAPTURE_SETTLE).await;

            let snapshot: Vec<(String, RequestId)> = captured
                .lock()
                .map(|list| list.clone())
                .unwrap_or_default();
            match self.scan_candidates(&page, &snapshot, page_url, opts).await {
                Ok(media) => break Ok(media),
                Err(err) if round < MAX_CAPTURE_ROUNDS => {
                    round += 1;
                    tracing::warn!("no usable donor response yet ({}), reloading", err);
                    if let Ok(mut list) = captured.lock() {
                        list.clear();
                    }
                }
                Err(err) => break Err(err),
            }
        };

        collector.abort();
        outcome
    }

    /// Walks the captured responses by signature priority; the first body
    /// that parses as JSON and yields a complete resolution wins.
    /// Placeholder failures advance to the next candidate.
    async fn scan_candidates(
        &self,
        page: &Page,
        captured: &[(String, RequestId)],
        page_url: &str,
        opts: &SessionOptions,
    ) -> anyhow::Result<ResolvedMedia> {
        let mut last_err = None;

        for signature in API_SIGNATURES {
            for (url, request_id) in captured.iter().filter(|(u, _)| u.contains(signature)) {
                let body = match response_body(page, request_id).await {
                    Ok(body) => body,
                    Err(err) => {
                        tracing::debug!("could not read body of {}: {}", url, err);
                        continue;
                    }
                };
                let Ok(donor) = serde_json::from_str::<Value>(&body) else {
                    continue;
                };

                match self.media_from_donor(page, &donor, page_url, opts).await {
                    Ok(media) => return Ok(media),
                    Err(err) => {
                        tracing::debug!("donor {} rejected: {}", url, err);
                        last_err = Some(err);
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("no matching donor response found")))
    }

    async fn media_from_donor(
        &self,
        page: &Page,
        donor: &Value,
        page_url: &str,
        opts: &SessionOptions,
    ) -> anyhow::Result<ResolvedMedia> {
        match opts.mode {
            ResolveMode::Manifest => {
                let manifest_url = manifest::build_manifest_url(donor)?;
                let title = fetch_title(&manifest_url).await;
                Ok(ResolvedMedia {
                    url: manifest_url.to_string(),
                    title,
                    cookies: None,
                })
            }
            ResolveMode::Direct => {
                let parsed = Url::parse(page_url)?;
                let direct = manifest::direct_url_from_donor(donor, &parsed)?;
                let cookies = harvest_cookies(page).await?;
                let title = direct
                    .rsplit('/')
                    .next()
                    .map(|name| {
                        urlencoding::decode(name)
                            .map(|c| c.into_owned())
                            .unwrap_or_else(|_| name.to_string())
                    })
                    .unwrap_or_default();
                Ok(ResolvedMedia {
                    url: direct,
                    title,
                    cookies: Some(cookies),
                })
            }
        }
    }

    /// Opens a page, launching the browser or reusing the kept-open one.
    /// Returns whether the browser was freshly launched.
    pub(crate) async fn open_page(
        &mut self,
        url: &str,
        opts: &SessionOptions,
    ) -> anyhow::Result<(Page, bool)> {
        let fresh = self.ensure_browser(opts).await?;
        let handle = self
            .browser
            .as_ref()
            .ok_or_else(|| anyhow!("browser is not running"))?;
        let page = handle.browser.new_page(url).await?;
        Ok((page, fresh))
    }

    async fn ensure_browser(&mut self, opts: &SessionOptions) -> anyhow::Result<bool> {
        if let Some(handle) = &self.browser {
            if is_alive(&handle.browser).await {
                return Ok(false);
            }
            tracing::warn!("persistent browser is gone, relaunching");
            self.close().await;
        }

        let mut builder = BrowserConfig::builder().with_head();
        if opts.use_profile_dir {
            builder = builder.user_data_dir(profile_dir()?);
        }
        if !opts.custom_chrome_path.is_empty() {
            builder = builder.chrome_executable(PathBuf::from(&opts.custom_chrome_path));
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("failed to configure browser: {}", e))?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });
        self.browser = Some(BrowserHandle { browser, handler });
        Ok(true)
    }

    pub async fn close(&mut self) {
        if let Some(mut handle) = self.browser.take() {
            let _ = handle.browser.close().await;
            let _ = handle.browser.wait().await;
            handle.handler.abort();
        }
    }
}

/// Detects a disconnected browser with a bounded poll instead of hanging on
/// a dead websocket.
async fn is_alive(browser: &Browser) -> bool {
    for _ in 0..LIVENESS_ATTEMPTS {
        match tokio::time::timeout(LIVENESS_POLL, browser.version()).await {
            Ok(Ok(_)) => return true,
            Ok(Err(_)) => return false,
            Err(_) => {}
        }
    }
    false
}

/// Fixed-interval poll for a DOM element with an overall timeout ceiling.
pub(crate) async fn wait_for_element(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if page.find_element(selector).await.is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!(
                "timed out after {}s waiting for '{}'",
                timeout.as_secs(),
                selector
            );
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn response_body(page: &Page, request_id: &RequestId) -> anyhow::Result<String> {
    let resp = page
        .execute(GetResponseBodyParams::new(request_id.clone()))
        .await?;
    if resp.result.base64_encoded {
        let bytes = base64::engine::general_purpose::STANDARD.decode(resp.result.body.as_bytes())?;
        Ok(String::from_utf8(bytes)?)
    } else {
        Ok(resp.result.body.clone())
    }
}

/// The manifest URL carries no human-readable name; a side-fetch by
/// document id and access token returns the real filename. An empty title
/// is legal and handled downstream.
async fn fetch_title(manifest_url: &Url) -> String {
    let Some(fetch_url) = manifest::title_fetch_url(manifest_url) else {
        return String::new();
    };
    let Ok(resp) = reqwest::get(&fetch_url).await else {
        return String::new();
    };
    resp.json::<Value>()
        .await
        .ok()
        .and_then(|v| v.get("name").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default()
}

/// Both cookies are required later to authorize a direct fetch outside the
/// browser.
async fn harvest_cookies(page: &Page) -> anyhow::Result<AuthCookies> {
    let cookies = page.get_cookies().await?;
    let find = |name: &str| {
        cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.clone())
    };
    let fed_auth = find("FedAuth").ok_or_else(|| anyhow!("FedAuth cookie not found"))?;
    let rt_fa = find("rtFa").ok_or_else(|| anyhow!("rtFa cookie not found"))?;
    Ok(AuthCookies { fed_auth, rt_fa })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::settings::Backend;

    #[test]
    fn signatures_are_ordered_most_specific_first() {
        // The generic fallback must come last or it would shadow the
        // specific variants.
        assert_eq!(API_SIGNATURES.len(), 3);
        assert!(API_SIGNATURES[..2]
            .iter()
            .all(|s| s.len() > API_SIGNATURES[2].len()));
        assert!(API_SIGNATURES
            .iter()
            .all(|s| s.contains("RenderListDataAsStream")));
    }

    #[test]
    fn options_follow_settings() {
        let mut settings = GlobalSettings::default();
        settings.timeout = 45;
        settings.downloader = Backend::Direct;
        settings.keep_browser_open = true;
        let opts = SessionOptions::from_settings(&settings);
        assert_eq!(opts.timeout, Duration::from_secs(45));
        assert_eq!(opts.mode, ResolveMode::Direct);
        assert!(opts.keep_browser_open);
    }
}
