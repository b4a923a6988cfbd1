use url::Url;

use crate::error::MediaError;

/// Query parameters that carry tracking data and confuse extractors
pub const TRACKING_PARAMS: &[&str] = &[
    "si",
    "pp",
    "feature",
    "embeds_referring_euri",
    "source",
    "app",
];

const MAX_NAME_STEM: usize = 50;

/// Parse `raw` and drop tracking query parameters
pub fn normalize_url(raw: &str) -> Result<String, MediaError> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| MediaError::InvalidSource(format!("{}: {}", raw.trim(), e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(MediaError::InvalidSource(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    Ok(url.to_string())
}

/// File name for a delivered file, derived from the media title
pub fn safe_name(title: Option<&str>, fallback: &str, ext: &str) -> String {
    let title = title.map(str::trim).filter(|t| !t.is_empty()).unwrap_or(fallback);

    let replaced: String = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c.is_whitespace() {
                c
            } else {
                '_'
            }
        })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let stem: String = collapsed.chars().take(MAX_NAME_STEM).collect();

    format!("{}.{}", stem, ext)
}
