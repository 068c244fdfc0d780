//! Cache filename derivation.
//!
//! The cache is keyed by the last path segment of the download URL, not by the
//! manifest's logical name.

/// Extracts the last path segment of `url` for use as the cache filename.
///
/// Query and fragment are ignored and percent-encoding is kept as-is. Returns
/// `None` if the URL cannot be parsed, ends with `/`, or the segment is made
/// only of dots and whitespace.
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path().rsplit('/').next()?;
    if segment
        .trim_matches(|c| c == ' ' || c == '\n' || c == '\t' || c == '.')
        .is_empty()
    {
        return None;
    }
    Some(segment.to_string())
}
