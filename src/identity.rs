//! Session identification types.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::format::ContainerFormat;

/// Distinguishes sessions generated within the same millisecond.
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for an ingest session.
///
/// `SessionId` uses `Arc<str>` internally, so cloning is a pointer copy.
/// Every unit sent to the endpoint carries it.
///
/// # Example
///
/// ```
/// use live_ingest::SessionId;
///
/// let id = SessionId::new("studio-a");
/// assert_eq!(id.as_str(), "studio-a");
///
/// let generated = SessionId::generate();
/// assert!(generated.as_str().starts_with("live-"));
/// assert_ne!(generated, SessionId::generate());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
    /// Creates a session ID from a string.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh ID from the wall clock and a process-wide counter.
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let n = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self::new(format!("live-{millis:x}-{n:x}"))
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// What a session announces to the endpoint on every (re)connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// The session being streamed.
    pub session_id: SessionId,
    /// The negotiated container/codec format.
    pub format: ContainerFormat,
}

impl SessionIdentity {
    /// Creates an identity from a session ID and negotiated format.
    pub fn new(session_id: impl Into<SessionId>, format: impl Into<ContainerFormat>) -> Self {
        Self {
            session_id: session_id.into(),
            format: format.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_equality() {
        assert_eq!(SessionId::new("a"), SessionId::new("a"));
        assert_ne!(SessionId::new("a"), SessionId::new("b"));
    }

    #[test]
    fn test_session_id_display() {
        let id = SessionId::new("broadcast-42");
        assert_eq!(format!("{id}"), "broadcast-42");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        use std::collections::HashSet;

        let ids: HashSet<_> = (0..100).map(|_| SessionId::generate()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_identity_conversions() {
        let identity = SessionIdentity::new("room-1", "video/mp4");
        assert_eq!(identity.session_id.as_str(), "room-1");
        assert_eq!(identity.format.as_str(), "video/mp4");
    }
}
