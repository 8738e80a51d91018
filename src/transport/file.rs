//! Directory transport implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::identity::{SessionId, SessionIdentity};
use crate::transport::{RemoteStats, Transport, WireMessage};
use crate::TransportError;

/// A transport that writes every unit as a file.
///
/// Each session gets its own directory `<root>/<session_id>/` holding
/// `init.<ext>` and `segment-000001.<ext>`, `segment-000002.<ext>`, ... All file
/// I/O runs in the blocking thread pool.
///
/// The directory behaves like an endpoint that never drops the connection.
/// Data segments arriving before the initialization segment are rejected.
///
/// # Example
///
/// ```no_run
/// use live_ingest::DirectoryTransport;
///
/// let transport = DirectoryTransport::new("recordings");
/// // Use with StreamIngest builder...
/// ```
///
/// Clones share the same directory state, so a clone kept by the caller can
/// locate the files a session wrote through [`session_dir()`](Self::session_dir).
#[derive(Clone)]
pub struct DirectoryTransport {
    name: String,
    root: Arc<PathBuf>,
    state: Arc<Mutex<DirectoryState>>,
}

#[derive(Default)]
struct DirectoryState {
    session: Option<SessionIdentity>,
    session_dir: Option<PathBuf>,
    init_written: bool,
    segments_written: u64,
}

impl DirectoryTransport {
    /// Creates a transport rooted at `root`. The directory is created on connect.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            name: format!("dir:{}", root.as_ref().display()),
            root: Arc::new(root.as_ref().to_path_buf()),
            state: Arc::new(Mutex::new(DirectoryState::default())),
        }
    }

    /// Returns the directory a session's files are written to.
    pub fn session_dir(&self, session_id: &SessionId) -> PathBuf {
        self.root.join(session_id.as_str())
    }

    fn file_name(message: &WireMessage) -> String {
        if message.is_init() {
            format!("init.{}", message.format.init_extension())
        } else {
            format!(
                "segment-{:06}.{}",
                message.sequence,
                message.format.segment_extension()
            )
        }
    }
}

#[async_trait]
impl Transport for DirectoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self, identity: &SessionIdentity) -> Result<(), TransportError> {
        let dir = self.session_dir(&identity.session_id);
        let create = dir.clone();
        tokio::task::spawn_blocking(move || std::fs::create_dir_all(&create))
            .await
            .map_err(|e| TransportError::custom(format!("connect task panicked: {e}")))?
            .map_err(|e| TransportError::io(&dir, e))?;

        let mut state = self.state.lock().await;
        if state.session.as_ref() != Some(identity) {
            *state = DirectoryState {
                session: Some(identity.clone()),
                session_dir: Some(dir),
                ..DirectoryState::default()
            };
        }
        Ok(())
    }

    async fn send(&self, message: &WireMessage) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        let Some(dir) = state.session_dir.clone() else {
            return Err(TransportError::NotConnected);
        };
        if !message.is_init() && message.format.has_init_segment() && !state.init_written {
            return Err(TransportError::rejected(
                "data segment before initialization segment",
            ));
        }

        let path = dir.join(Self::file_name(message));
        tracing::trace!(
            transport = %self.name,
            bytes = message.payload.len(),
            path = %path.display(),
            "writing segment file"
        );

        let payload = message.payload.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || std::fs::write(&target, &payload))
            .await
            .map_err(|e| TransportError::custom(format!("write task panicked: {e}")))?
            .map_err(|e| TransportError::io(&path, e))?;

        if message.is_init() {
            state.init_written = true;
        } else {
            state.segments_written += 1;
        }
        Ok(())
    }

    async fn request_stats(&self, session_id: &SessionId) -> Result<RemoteStats, TransportError> {
        let state = self.state.lock().await;
        match &state.session {
            Some(identity) if &identity.session_id == session_id => Ok(RemoteStats {
                viewer_count: 0,
                remote_segment_count: state.segments_written,
            }),
            _ => Err(TransportError::StatsUnavailable {
                reason: format!("no session {session_id} in {}", self.root.display()),
            }),
        }
    }
}
