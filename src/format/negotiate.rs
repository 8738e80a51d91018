//! Capability negotiation.

use super::ContainerFormat;

/// Format returned when no preference is supported.
pub const FALLBACK_FORMAT: &str = "video/webm";

/// Preference list used when the caller does not supply one, best first.
pub fn default_preferences() -> Vec<ContainerFormat> {
    [
        "video/mp4;codecs=avc1.42E01E,mp4a.40.2",
        "video/mp4;codecs=avc1",
        "video/mp4",
        "video/webm;codecs=vp9,opus",
        "video/webm;codecs=vp8,opus",
        "video/webm",
    ]
    .into_iter()
    .map(ContainerFormat::from)
    .collect()
}

/// Returns the first format in `preferences` that `is_supported` accepts.
///
/// Falls back to [`FALLBACK_FORMAT`] when nothing matches. Never fails; the
/// caller decides whether the fallback itself is usable.
///
/// # Example
///
/// ```
/// use live_ingest::format::{negotiate, ContainerFormat};
///
/// let prefs = vec![
///     ContainerFormat::new("video/mp4;codecs=avc1"),
///     ContainerFormat::new("video/webm;codecs=vp8"),
/// ];
/// let chosen = negotiate(&prefs, |f| f.mime_type() == "video/webm");
/// assert_eq!(chosen.as_str(), "video/webm;codecs=vp8");
///
/// let fallback = negotiate(&prefs, |_| false);
/// assert_eq!(fallback.as_str(), "video/webm");
/// ```
pub fn negotiate<F>(preferences: &[ContainerFormat], is_supported: F) -> ContainerFormat
where
    F: Fn(&ContainerFormat) -> bool,
{
    preferences
        .iter()
        .find(|format| is_supported(format))
        .cloned()
        .unwrap_or_else(|| ContainerFormat::new(FALLBACK_FORMAT))
}
