//! Duplicate detection key for collected articles.
//!
//! Two headlines count as the same article when their URLs agree after
//! dropping tracking parameters, fragments and a trailing slash.

use url::Url;
use uuid::Uuid;

const ARTICLE_URL_NAMESPACE: Uuid = Uuid::from_bytes([
    0x3f, 0x1c, 0x5e, 0x92, 0x4b, 0x07, 0x4d, 0x2a, 0x9e, 0x61, 0x0c, 0xa8, 0x7d, 0x15, 0xb3,
    0x44,
]);

const TRACKING_PREFIXES: &[&str] = &["utm_", "mc_"];
const TRACKING_KEYS: &[&str] = &["ref", "fbclid", "gclid", "yclid", "ocid", "cmpid"];

/// Stable key for an article URL; equal for URLs that differ only in tracking noise.
pub fn url_key(raw_url: &str) -> String {
    Uuid::new_v5(&ARTICLE_URL_NAMESPACE, normalize_url(raw_url).as_bytes()).to_string()
}

fn is_tracking(key: &str) -> bool {
    TRACKING_KEYS.contains(&key) || TRACKING_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Unparseable input is keyed on its trimmed text.
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.trim().to_string();
    };
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    if url.path().len() > 1 && url.path().ends_with('/') {
        let trimmed = url.path().trim_end_matches('/').to_string();
        url.set_path(&trimmed);
    }

    url.to_string()
}
