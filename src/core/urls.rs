use url::Url;

/// Accepts only https SharePoint URLs.
pub fn is_valid_url(url: &str) -> bool {
    url.contains("sharepoint") && url.starts_with("https://")
}

/// Forces web-player mode on a video page URL so the player (and the API
/// calls behind it) load instead of a download prompt. Leaves an existing
/// `web` parameter alone; passes unparseable input through unchanged.
pub fn set_as_web_player_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if parsed.query_pairs().any(|(k, _)| k == "web") {
        return parsed.to_string();
    }
    parsed.query_pairs_mut().append_pair("web", "1");
    parsed.to_string()
}

/// Normalization used for lexicographic URL ordering: lowercased scheme and
/// host, path and query untouched apart from a trailing-slash strip.
pub fn normalize_for_sort(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default().to_lowercase();
            let path = parsed.path().trim_end_matches('/');
            match parsed.query() {
                Some(q) => format!("{}://{}{}?{}", parsed.scheme(), host, path, q),
                None => format!("{}://{}{}", parsed.scheme(), host, path),
            }
        }
        Err(_) => url.trim_end_matches('/').to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_plain_http() {
        assert!(!is_valid_url("http://contoso.sharepoint.com/x"));
    }

    #[test]
    fn accepts_https_sharepoint() {
        assert!(is_valid_url("https://contoso.sharepoint.com/x"));
    }

    #[test]
    fn rejects_foreign_hosts() {
        assert!(!is_valid_url("https://example.com/video.mp4"));
    }

    #[test]
    fn web_player_param_added_once() {
        let first = set_as_web_player_url("https://contoso.sharepoint.com/v.mp4");
        assert!(first.ends_with("?web=1"));
        let second = set_as_web_player_url(&first);
        assert_eq!(first, second);
    }

    #[test]
    fn web_player_param_not_overwritten() {
        let url = set_as_web_player_url("https://contoso.sharepoint.com/v.mp4?web=0");
        assert!(url.contains("web=0"));
        assert!(!url.contains("web=1"));
    }

    #[test]
    fn normalize_lowercases_host_only() {
        assert_eq!(
            normalize_for_sort("https://Contoso.SharePoint.com/Sites/A/"),
            "https://contoso.sharepoint.com/Sites/A"
        );
    }

    #[test]
    fn normalize_keeps_query() {
        assert_eq!(
            normalize_for_sort("https://contoso.sharepoint.com/v.mp4?web=1"),
            "https://contoso.sharepoint.com/v.mp4?web=1"
        );
    }
}
