use std::sync::LazyLock;

use anyhow::{anyhow, bail};
use regex::Regex;
use serde_json::Value;
use url::Url;

/// Placeholder tokens in the donor's manifest URL template, paired with the
/// donor field that fills them. `{.fileType}` is not present in the donor
/// data and is always "mp4".
const PLACEHOLDERS: [(&str, &str); 5] = [
    ("{.mediaBaseUrl}", "/ListSchema/.mediaBaseUrl"),
    ("{.fileType}", ""),
    ("{.callerStack}", "/ListSchema/.callerStack"),
    ("{.spItemUrl}", "/ListData/CurrentFolderSpItemUrl"),
    ("{.driveAccessToken}", "/ListSchema/.driveAccessToken"),
];

/// Fixed query parameters requesting the DASH index variant.
const MANIFEST_QUERY_PARAMS: [(&str, &str); 6] = [
    ("action", "Access"),
    ("part", "Index"),
    ("format", "dash"),
    ("useScf", "True"),
    ("pretranscode", "0"),
    ("transcodeahead", "0"),
];

static MPD_DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"mediaPresentationDuration="([^"]+)""#).unwrap());

static ISO8601_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)?$").unwrap()
});

fn donor_str<'a>(donor: &'a Value, pointer: &str) -> Option<&'a str> {
    donor.pointer(pointer).and_then(Value::as_str)
}

/// Substitutes the five named placeholders into the donor's URL template
/// and appends the fixed DASH-index query parameters. A placeholder that
/// appears in the template but has no non-empty donor value is an error, so
/// the session driver can retry with the next API signature candidate.
pub fn build_manifest_url(donor: &Value) -> anyhow::Result<Url> {
    let template = donor_str(donor, "/ListSchema/.videoManifestUrl")
        .ok_or_else(|| anyhow!("donor data carries no manifest URL template"))?;

    let mut built = template.to_string();
    for (token, pointer) in PLACEHOLDERS {
        if !built.contains(token) {
            continue;
        }
        let value = if pointer.is_empty() {
            "mp4"
        } else {
            match donor_str(donor, pointer) {
                Some(v) if !v.is_empty() => v,
                _ => bail!("donor data is missing the value for {}", token),
            }
        };
        built = built.replace(token, value);
    }

    let mut url = Url::parse(&built)?;
    for (key, value) in MANIFEST_QUERY_PARAMS {
        set_query_param(&mut url, key, value);
    }
    Ok(url)
}

/// Sets (not appends) a query parameter, replacing any existing value.
fn set_query_param(url: &mut Url, key: &str, value: &str) {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .append_pair(key, value);
}

/// The manifest URL carries the document id and the drive access token; the
/// real filename comes from a side-fetch keyed by those two values.
pub fn title_fetch_url(manifest_url: &Url) -> Option<String> {
    let docid = manifest_url
        .query_pairs()
        .find(|(k, _)| k == "docid")
        .map(|(_, v)| v.into_owned())?;
    let token = manifest_url
        .query_pairs()
        .find(|(k, _)| k == "access_token")
        .map(|(_, v)| v.into_owned())?;
    Some(format!("{}&access_token={}", docid, token))
}

/// Direct-mode URL: the site root-folder path when present, otherwise the
/// first row's file reference; either way joined onto the page origin.
pub fn direct_url_from_donor(donor: &Value, page_url: &Url) -> anyhow::Result<String> {
    let root_folder = donor_str(donor, "/ListSchema/.rootFolder")
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::decode(s).map(|c| c.into_owned()))
        .transpose()?;

    let path = match root_folder {
        Some(p) => p,
        None => donor_str(donor, "/ListData/Row/0/FileRef")
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("donor data carries no file path for a direct download"))?,
    };

    let host = page_url
        .host_str()
        .ok_or_else(|| anyhow!("page URL has no host"))?;
    Ok(format!("{}://{}{}", page_url.scheme(), host, path))
}

/// Total media time of a DASH manifest, from its ISO-8601
/// `mediaPresentationDuration` attribute, in whole seconds (rounded up).
pub fn parse_mpd_duration(mpd_xml: &str) -> anyhow::Result<u64> {
    let raw = MPD_DURATION_RE
        .captures(mpd_xml)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| anyhow!("manifest has no mediaPresentationDuration attribute"))?;
    parse_iso8601_duration(raw)
}

pub fn parse_iso8601_duration(raw: &str) -> anyhow::Result<u64> {
    let caps = ISO8601_RE
        .captures(raw)
        .ok_or_else(|| anyhow!("unrecognized ISO-8601 duration: {}", raw))?;

    let int = |i: usize| -> f64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    let secs = int(1) * 86_400.0 + int(2) * 3_600.0 + int(3) * 60.0 + int(4);
    if secs <= 0.0 {
        bail!("duration parses to zero: {}", raw);
    }
    Ok(secs.ceil() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn donor() -> Value {
        json!({
            "ListSchema": {
                ".videoManifestUrl": "https://media.contoso.com/transform/videomanifest?provider=spo&base={.mediaBaseUrl}&docid=https%3A%2F%2Fcontoso%2Fdoc1&access_token={.driveAccessToken}&cs={.callerStack}&item={.spItemUrl}&fileType={.fileType}",
                ".mediaBaseUrl": "https://media.contoso.com",
                ".callerStack": "cstack",
                ".driveAccessToken": "tok123",
                ".rootFolder": "%2Fsites%2Fteam%2FShared%20Documents%2Fvideos",
            },
            "ListData": {
                "CurrentFolderSpItemUrl": "https://contoso.sharepoint.com/item",
                "Row": [ { "FileRef": "/sites/team/Shared Documents/videos/a.mp4" } ],
            }
        })
    }

    #[test]
    fn manifest_url_has_no_leftover_placeholders() {
        let url = build_manifest_url(&donor()).unwrap();
        let s = url.to_string();
        assert!(!s.contains("{."), "unsubstituted placeholder in {}", s);
        assert!(s.contains("fileType=mp4"));
    }

    #[test]
    fn manifest_url_sets_fixed_query_params() {
        let url = build_manifest_url(&donor()).unwrap();
        for (key, value) in MANIFEST_QUERY_PARAMS {
            let got = url
                .query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned());
            assert_eq!(got.as_deref(), Some(value), "param {}", key);
        }
    }

    #[test]
    fn missing_placeholder_value_is_an_error() {
        let mut d = donor();
        d["ListSchema"][".driveAccessToken"] = json!("");
        let err = build_manifest_url(&d).unwrap_err().to_string();
        assert!(err.contains("{.driveAccessToken}"));
    }

    #[test]
    fn absent_template_is_an_error() {
        let d = json!({"ListSchema": {}, "ListData": {}});
        assert!(build_manifest_url(&d).is_err());
    }

    #[test]
    fn placeholder_absent_from_template_needs_no_value() {
        let mut d = donor();
        d["ListSchema"][".videoManifestUrl"] =
            json!("https://media.contoso.com/videomanifest?base={.mediaBaseUrl}&docid=x&access_token=y");
        d["ListSchema"][".driveAccessToken"] = json!("");
        assert!(build_manifest_url(&d).is_ok());
    }

    #[test]
    fn title_fetch_url_combines_docid_and_token() {
        let url = build_manifest_url(&donor()).unwrap();
        let fetch = title_fetch_url(&url).unwrap();
        assert!(fetch.starts_with("https://contoso/doc1"));
        assert!(fetch.ends_with("&access_token=tok123"));
    }

    #[test]
    fn direct_url_prefers_root_folder() {
        let page = Url::parse("https://contoso.sharepoint.com/sites/team/v.mp4?web=1").unwrap();
        let url = direct_url_from_donor(&donor(), &page).unwrap();
        assert_eq!(
            url,
            "https://contoso.sharepoint.com/sites/team/Shared Documents/videos"
        );
    }

    #[test]
    fn direct_url_falls_back_to_row_file_ref() {
        let mut d = donor();
        d["ListSchema"][".rootFolder"] = json!("");
        let page = Url::parse("https://contoso.sharepoint.com/sites/team/v.mp4").unwrap();
        let url = direct_url_from_donor(&d, &page).unwrap();
        assert!(url.ends_with("/videos/a.mp4"));
    }

    #[test]
    fn direct_url_without_any_path_is_an_error() {
        let d = json!({"ListSchema": {}, "ListData": {}});
        let page = Url::parse("https://contoso.sharepoint.com/x").unwrap();
        assert!(direct_url_from_donor(&d, &page).is_err());
    }

    #[test]
    fn iso8601_hours_minutes_seconds() {
        assert_eq!(parse_iso8601_duration("PT1H2M3S").unwrap(), 3723);
    }

    #[test]
    fn iso8601_fractional_seconds_round_up() {
        assert_eq!(parse_iso8601_duration("PT30.5S").unwrap(), 31);
    }

    #[test]
    fn iso8601_days_component() {
        assert_eq!(parse_iso8601_duration("P1DT1S").unwrap(), 86_401);
    }

    #[test]
    fn iso8601_garbage_rejected() {
        assert!(parse_iso8601_duration("1h30m").is_err());
    }

    #[test]
    fn mpd_duration_extracted_from_manifest() {
        let mpd = r#"<?xml version="1.0"?><MPD mediaPresentationDuration="PT10M1.2S" minBufferTime="PT2S"></MPD>"#;
        assert_eq!(parse_mpd_duration(mpd).unwrap(), 602);
    }

    #[test]
    fn mpd_without_duration_is_an_error() {
        assert!(parse_mpd_duration("<MPD></MPD>").is_err());
    }
}
