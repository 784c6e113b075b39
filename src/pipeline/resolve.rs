//! Reader-link resolution: turn a "Read Online" reference into a page-image base URL.
//!
//! Metadata pages link to an HTML reader such as
//! `/scripts/FullindexDefault.htm?path1=/data7/upload/0188/986&first=1&last=388`.
//! The page images live under `path1` on the same host, and `last` is the
//! declared page count. Relative links are relative to the host that served
//! the metadata page, not to any canonical mirror.
//!
//! Everything here is pure: no I/O, no logging side effects.

use crate::error::LookupError;
use crate::output::PageCount;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

/// Query parameter carrying the page-image base path.
const PATH_PARAM: &str = "path1";

/// Query parameter carrying the declared page count.
const LAST_PAGE_PARAM: &str = "last";

/// First anchor after the "Read Online" label.
///
/// Non-greedy: the reader link directly follows the label, and
/// later anchors on the page are navigation.
static RE_READ_ONLINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?si)Read Online.*?<a\s+[^>]*?href\s*=\s*["']([^"']*)["']"#).unwrap()
});

/// A reader reference resolved against its origin host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
    /// Absolute base URL without a trailing slash.
    pub base_url: String,
    /// The reference's `last` parameter, if numeric.
    pub declared_pages: PageCount,
}

/// Find the raw "Read Online" link in a metadata page.
pub fn find_reader_link(html: &str) -> Option<String> {
    RE_READ_ONLINE
        .captures(html)
        .map(|caps| caps[1].trim().replace("&amp;", "&"))
        .filter(|link| !link.is_empty())
}

/// Resolve `raw` against `origin_host`.
///
/// * No host in `raw` ⇒ the origin host is used.
/// * `path1` present ⇒ base is `scheme://host{path1}`.
/// * Otherwise the whole (absolutised) reference is the base.
/// * `last` present and numeric ⇒ declared page count, else unknown.
pub fn resolve_reference(raw: &str, origin_host: &str) -> Result<ResolvedReference, LookupError> {
    let malformed = |detail: String| LookupError::MalformedReference {
        host: origin_host.to_string(),
        reference: raw.to_string(),
        detail,
    };

    let origin = Url::parse(&format!("http://{origin_host}/"))
        .map_err(|e| malformed(format!("invalid origin host: {e}")))?;
    // `join` leaves absolute references untouched and anchors relative ones on the origin.
    let url = origin.join(raw.trim()).map_err(|e| malformed(e.to_string()))?;

    let host = url
        .host_str()
        .ok_or_else(|| malformed("reference has no host".to_string()))?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let base_url = match query_param(&url, PATH_PARAM) {
        Some(path) => {
            let path = path.trim();
            let sep = if path.starts_with('/') { "" } else { "/" };
            format!("{}://{}{}{}", url.scheme(), authority, sep, path)
        }
        None => url.to_string(),
    };

    let declared_pages = query_param(&url, LAST_PAGE_PARAM)
        .map(|v| PageCount::parse(&v))
        .unwrap_or_default();

    Ok(ResolvedReference {
        base_url: base_url.trim_end_matches('/').to_string(),
        declared_pages,
    })
}

/// URL of page `page` (1-indexed) under `base_url`.
pub fn page_url(base_url: &str, page: u32) -> String {
    format!("{base_url}/PTIFF/{page:08}.tif")
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
