use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::LazyLock;

use anyhow::anyhow;
use chrono::{DateTime, FixedOffset};
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::core::login::{LoginCredentials, LoginStrategy};
use crate::core::session::{PortalSession, SessionOptions};
use crate::core::urls;

static ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<entry[^>]*>(.*?)</entry>").unwrap());
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<d:Name[^>]*>([^<]*)</d:Name>").unwrap());
static REL_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<d:ServerRelativeUrl[^>]*>([^<]*)</d:ServerRelativeUrl>").unwrap());
static CREATED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<d:TimeCreated[^>]*>([^<]*)</d:TimeCreated>").unwrap());
static MODIFIED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<d:TimeLastModified[^>]*>([^<]*)</d:TimeLastModified>").unwrap());

static PRE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("pre").unwrap());
static XML_VIEWER_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#webkit-xml-viewer-source-xml").unwrap());

/// The only container format kept by the crawl filter.
const SUPPORTED_EXTENSION: &str = ".mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    /// Listing order as returned by the portal.
    #[default]
    Unsorted,
    /// Creation time, ascending.
    TimeCreated,
    /// Last-modified time, ascending.
    TimeModified,
    /// Normalized URL, lexicographic.
    Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    pub name: String,
    pub server_relative_url: String,
    pub time_created: Option<DateTime<FixedOffset>>,
    pub time_modified: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone)]
pub struct VideoEntry {
    pub url: String,
    pub entry: FolderEntry,
}

enum ItemKind {
    Files,
    Folders,
}

impl ItemKind {
    fn selector(&self) -> &'static str {
        match self {
            ItemKind::Files => "Files",
            ItemKind::Folders => "Folders",
        }
    }
}

/// Walks one or more portal folders through the REST listing API and
/// returns a stably sorted flat list of web-player video URLs. Subfolders
/// are visited through an explicit worklist, never by call recursion.
pub async fn list_videos(
    session: &mut PortalSession,
    folder_urls: &[String],
    recurse: bool,
    sort: SortMode,
    strategy: LoginStrategy,
    creds: &LoginCredentials,
    opts: &SessionOptions,
) -> anyhow::Result<Vec<String>> {
    let result = crawl(session, folder_urls, recurse, strategy, creds, opts).await;
    if !opts.keep_browser_open {
        session.close().await;
    }
    let mut videos = result?;
    sort_entries(&mut videos, sort);
    Ok(videos.into_iter().map(|v| v.url).collect())
}

async fn crawl(
    session: &mut PortalSession,
    folder_urls: &[String],
    recurse: bool,
    strategy: LoginStrategy,
    creds: &LoginCredentials,
    opts: &SessionOptions,
) -> anyhow::Result<Vec<VideoEntry>> {
    let first = folder_urls
        .first()
        .ok_or_else(|| anyhow!("no folder URLs given"))?;

    let (page, fresh) = session.open_page(first, opts).await?;
    if fresh && !opts.use_profile_dir && !strategy.is_bypass() {
        strategy.execute(&page, creds, opts.timeout).await?;
    }

    let mut videos = Vec::new();

    for folder_url in folder_urls {
        // Navigating once resolves shortened share links; the canonical
        // folder path is read back from the landing URL.
        page.goto(folder_url.as_str()).await?;
        let _ = page.wait_for_navigation().await;
        let landed = page
            .url()
            .await?
            .unwrap_or_else(|| folder_url.clone());
        let landed = Url::parse(&landed)
            .map_err(|e| anyhow!("unrecognized folder URL format '{}': {}", landed, e))?;
        let origin = origin_of(&landed)?;
        let root = folder_path_from_url(&landed)?;

        let mut worklist: VecDeque<String> = VecDeque::new();
        worklist.push_back(root);

        while let Some(folder) = worklist.pop_front() {
            let site = site_base(&origin, &folder);

            let files_xml = fetch_listing(&page, &site, &folder, ItemKind::Files).await?;
            for entry in parse_listing_entries(&files_xml) {
                if entry
                    .server_relative_url
                    .to_lowercase()
                    .ends_with(SUPPORTED_EXTENSION)
                {
                    let url = urls::set_as_web_player_url(&video_url(
                        &origin,
                        &entry.server_relative_url,
                    ));
                    videos.push(VideoEntry { url, entry });
                } else {
                    tracing::warn!("skipping unsupported entry: {}", entry.name);
                }
            }

            if recurse {
                let folders_xml = fetch_listing(&page, &site, &folder, ItemKind::Folders).await?;
                for entry in parse_listing_entries(&folders_xml) {
                    // The portal lists its own forms library alongside
                    // real subfolders.
                    if entry.name == "Forms" {
                        continue;
                    }
                    worklist.push_back(entry.server_relative_url);
                }
            }
        }
    }

    Ok(videos)
}

async fn fetch_listing(
    page: &chromiumoxide::Page,
    site: &str,
    folder: &str,
    kind: ItemKind,
) -> anyhow::Result<String> {
    let url = listing_url(site, folder, &kind);
    page.goto(url.as_str()).await?;
    let html = page.content().await?;
    Ok(extract_xml_payload(&html))
}

fn origin_of(url: &Url) -> anyhow::Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("folder URL has no host: {}", url))?;
    Ok(format!("{}://{}", url.scheme(), host))
}

/// Canonical server-relative folder path: the `id` query parameter when the
/// portal's folder view carries one, otherwise the (decoded) path itself
/// with any forms-view suffix stripped.
pub fn folder_path_from_url(url: &Url) -> anyhow::Result<String> {
    if let Some((_, id)) = url.query_pairs().find(|(k, _)| k == "id") {
        if !id.is_empty() {
            return Ok(id.into_owned());
        }
    }

    let decoded = urlencoding::decode(url.path())?.into_owned();
    let path = match decoded.find("/Forms/") {
        Some(pos) => decoded[..pos].to_string(),
        None => decoded.trim_end_matches('/').to_string(),
    };
    if path.is_empty() || path == "/" {
        return Err(anyhow!("unrecognized folder URL format: {}", url));
    }
    Ok(path)
}

/// The REST endpoint lives under the site the folder belongs to.
fn site_base(origin: &str, folder_path: &str) -> String {
    let segments: Vec<&str> = folder_path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.first() {
        Some(&"sites") | Some(&"teams") if segments.len() >= 2 => {
            format!("{}/{}/{}", origin, segments[0], segments[1])
        }
        _ => origin.to_string(),
    }
}

fn listing_url(site: &str, folder_path: &str, kind: &ItemKind) -> String {
    format!(
        "{}/_api/web/GetFolderByServerRelativeUrl('{}')/{}",
        site,
        urlencoding::encode(folder_path),
        kind.selector()
    )
}

fn video_url(origin: &str, server_relative: &str) -> String {
    let encoded: Vec<String> = server_relative
        .split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect();
    format!("{}{}", origin, encoded.join("/"))
}

/// The browser wraps the listing XML in an HTML envelope; peel the HTML
/// first, then hand the embedded XML to the entry parser.
pub fn extract_xml_payload(html: &str) -> String {
    let doc = Html::parse_document(html);
    if let Some(pre) = doc.select(&PRE_SELECTOR).next() {
        return pre.text().collect();
    }
    if let Some(viewer) = doc.select(&XML_VIEWER_SELECTOR).next() {
        return viewer.text().collect();
    }
    html.to_string()
}

pub fn parse_listing_entries(xml: &str) -> Vec<FolderEntry> {
    let capture = |re: &Regex, hay: &str| -> Option<String> {
        re.captures(hay)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    };
    let timestamp = |re: &Regex, hay: &str| -> Option<DateTime<FixedOffset>> {
        capture(re, hay).and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
    };

    let mut entries = Vec::new();
    for block in ENTRY_RE.captures_iter(xml) {
        let body = block.get(1).map(|m| m.as_str()).unwrap_or("");
        let Some(server_relative_url) = capture(&REL_URL_RE, body) else {
            continue;
        };
        let name = capture(&NAME_RE, body).unwrap_or_else(|| {
            server_relative_url
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string()
        });
        entries.push(FolderEntry {
            name,
            server_relative_url,
            time_created: timestamp(&CREATED_RE, body),
            time_modified: timestamp(&MODIFIED_RE, body),
        });
    }
    entries
}

/// Stable insertion sort, so ties keep their discovery order regardless of
/// the key.
fn insertion_sort_by<T>(items: &mut [T], cmp: impl Fn(&T, &T) -> Ordering) {
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 && cmp(&items[j - 1], &items[j]) == Ordering::Greater {
            items.swap(j - 1, j);
            j -= 1;
        }
    }
}

pub fn sort_entries(videos: &mut [VideoEntry], mode: SortMode) {
    match mode {
        SortMode::Unsorted => {}
        SortMode::TimeCreated => {
            insertion_sort_by(videos, |a, b| a.entry.time_created.cmp(&b.entry.time_created))
        }
        SortMode::TimeModified => insertion_sort_by(videos, |a, b| {
            a.entry.time_modified.cmp(&b.entry.time_modified)
        }),
        SortMode::Url => insertion_sort_by(videos, |a, b| {
            urls::normalize_for_sort(&a.url).cmp(&urls::normalize_for_sort(&b.url))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns:d="http://schemas.microsoft.com/ado/2007/08/dataservices">
  <entry>
    <content type="application/xml"><m:properties>
      <d:Name>b lecture.mp4</d:Name>
      <d:ServerRelativeUrl>/sites/team/Shared Documents/videos/b lecture.mp4</d:ServerRelativeUrl>
      <d:TimeCreated m:type="Edm.DateTime">2023-03-01T10:00:00Z</d:TimeCreated>
      <d:TimeLastModified m:type="Edm.DateTime">2023-03-05T10:00:00Z</d:TimeLastModified>
    </m:properties></content>
  </entry>
  <entry>
    <content type="application/xml"><m:properties>
      <d:Name>a lecture.mp4</d:Name>
      <d:ServerRelativeUrl>/sites/team/Shared Documents/videos/a lecture.mp4</d:ServerRelativeUrl>
      <d:TimeCreated m:type="Edm.DateTime">2023-02-01T10:00:00Z</d:TimeCreated>
      <d:TimeLastModified m:type="Edm.DateTime">2023-03-09T10:00:00Z</d:TimeLastModified>
    </m:properties></content>
  </entry>
  <entry>
    <content type="application/xml"><m:properties>
      <d:Name>notes.pdf</d:Name>
      <d:ServerRelativeUrl>/sites/team/Shared Documents/videos/notes.pdf</d:ServerRelativeUrl>
    </m:properties></content>
  </entry>
</feed>"#;

    fn sample_videos() -> Vec<VideoEntry> {
        parse_listing_entries(SAMPLE_FEED)
            .into_iter()
            .filter(|e| e.server_relative_url.ends_with(".mp4"))
            .map(|entry| VideoEntry {
                url: urls::set_as_web_player_url(&video_url(
                    "https://contoso.sharepoint.com",
                    &entry.server_relative_url,
                )),
                entry,
            })
            .collect()
    }

    #[test]
    fn parses_all_entries_with_timestamps() {
        let entries = parse_listing_entries(SAMPLE_FEED);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "b lecture.mp4");
        assert!(entries[0].time_created.is_some());
        assert!(entries[2].time_created.is_none());
    }

    #[test]
    fn xml_payload_unwrapped_from_pre_envelope() {
        let escaped = SAMPLE_FEED.replace('<', "&lt;").replace('>', "&gt;");
        let html = format!("<html><body><pre>{}</pre></body></html>", escaped);
        let xml = extract_xml_payload(&html);
        assert_eq!(parse_listing_entries(&xml).len(), 3);
    }

    #[test]
    fn xml_payload_passthrough_without_envelope() {
        let xml = extract_xml_payload(SAMPLE_FEED);
        assert_eq!(parse_listing_entries(&xml).len(), 3);
    }

    #[test]
    fn unsorted_keeps_discovery_order() {
        let mut videos = sample_videos();
        sort_entries(&mut videos, SortMode::Unsorted);
        assert!(videos[0].url.contains("b%20lecture"));
        assert!(videos[1].url.contains("a%20lecture"));
    }

    #[test]
    fn url_sort_is_lexicographically_non_decreasing() {
        let mut videos = sample_videos();
        sort_entries(&mut videos, SortMode::Url);
        let normalized: Vec<String> = videos
            .iter()
            .map(|v| urls::normalize_for_sort(&v.url))
            .collect();
        for pair in normalized.windows(2) {
            assert!(pair[0] <= pair[1], "{} > {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn created_sort_is_ascending() {
        let mut videos = sample_videos();
        sort_entries(&mut videos, SortMode::TimeCreated);
        assert!(videos[0].url.contains("a%20lecture"));
    }

    #[test]
    fn modified_sort_is_ascending() {
        let mut videos = sample_videos();
        sort_entries(&mut videos, SortMode::TimeModified);
        assert!(videos[0].url.contains("b%20lecture"));
    }

    #[test]
    fn insertion_sort_is_stable() {
        let mut items = vec![(2, 'a'), (1, 'x'), (2, 'b'), (1, 'y')];
        insertion_sort_by(&mut items, |a, b| a.0.cmp(&b.0));
        assert_eq!(items, vec![(1, 'x'), (1, 'y'), (2, 'a'), (2, 'b')]);
    }

    #[test]
    fn folder_path_prefers_id_param() {
        let url = Url::parse("https://contoso.sharepoint.com/sites/team/Shared%20Documents/Forms/AllItems.aspx?id=%2Fsites%2Fteam%2FShared%20Documents%2Fvideos").unwrap();
        assert_eq!(
            folder_path_from_url(&url).unwrap(),
            "/sites/team/Shared Documents/videos"
        );
    }

    #[test]
    fn folder_path_from_plain_path_strips_forms_view() {
        let url = Url::parse(
            "https://contoso.sharepoint.com/sites/team/Shared%20Documents/Forms/AllItems.aspx",
        )
        .unwrap();
        assert_eq!(
            folder_path_from_url(&url).unwrap(),
            "/sites/team/Shared Documents"
        );
    }

    #[test]
    fn folder_path_rejects_bare_root() {
        let url = Url::parse("https://contoso.sharepoint.com/").unwrap();
        assert!(folder_path_from_url(&url).is_err());
    }

    #[test]
    fn listing_url_shape() {
        let url = listing_url(
            "https://contoso.sharepoint.com/sites/team",
            "/sites/team/Docs",
            &ItemKind::Files,
        );
        assert_eq!(
            url,
            "https://contoso.sharepoint.com/sites/team/_api/web/GetFolderByServerRelativeUrl('%2Fsites%2Fteam%2FDocs')/Files"
        );
    }

    #[test]
    fn site_base_extraction() {
        assert_eq!(
            site_base("https://contoso.sharepoint.com", "/sites/team/Docs/v"),
            "https://contoso.sharepoint.com/sites/team"
        );
        assert_eq!(
            site_base("https://contoso.sharepoint.com", "/Shared Documents"),
            "https://contoso.sharepoint.com"
        );
    }
}
