use thiserror::Error;
use url::Url;

/// Reasons a channel source URL is refused.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// Only https sources are fetched.
    #[error("Unsupported scheme: {0} (only https allowed)")]
    UnsupportedScheme(String),
    /// The host is not a YouTube domain.
    #[error("Unsupported host: {0}")]
    UnsupportedHost(String),
    /// The path does not name a channel, user or playlist.
    #[error("URL must point to a channel (@handle, /c/, /channel/, /user/) or a playlist")]
    UnsupportedPath,
}

const ALLOWED_HOSTS: [&str; 3] = ["www.youtube.com", "youtube.com", "m.youtube.com"];

/// Validates a channel source URL.
///
/// Accepted shapes:
/// - `https://www.youtube.com/@handle`
/// - `https://www.youtube.com/c/name`
/// - `https://www.youtube.com/channel/UC...`
/// - `https://www.youtube.com/user/name`
/// - `https://www.youtube.com/playlist?list=...`
///
/// Trailing tab paths such as `/videos` are allowed after a channel path.
///
/// # Examples
///
/// ```
/// use tubecast::util::validate_channel_url;
///
/// assert!(validate_channel_url("https://www.youtube.com/@rustlang").is_ok());
/// assert!(validate_channel_url("https://youtube.com/playlist?list=PL123").is_ok());
/// assert!(validate_channel_url("http://www.youtube.com/@rustlang").is_err());
/// assert!(validate_channel_url("https://example.com/@rustlang").is_err());
/// ```
pub fn validate_channel_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    if url.scheme() != "https" {
        return Err(UrlValidationError::UnsupportedScheme(url.scheme().to_owned()));
    }

    let host = url.host_str().unwrap_or_default();
    if !ALLOWED_HOSTS.contains(&host) {
        return Err(UrlValidationError::UnsupportedHost(host.to_owned()));
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let valid = match segments.as_slice() {
        [handle, ..] if handle.len() > 1 && handle.starts_with('@') => true,
        ["c" | "channel" | "user", id, ..] => !id.is_empty(),
        ["playlist"] => url
            .query_pairs()
            .any(|(k, v)| k == "list" && !v.is_empty()),
        _ => false,
    };

    if valid {
        Ok(url)
    } else {
        Err(UrlValidationError::UnsupportedPath)
    }
}
