//! Server-side session state for media transport.
//!
//! A session is created during SETUP and destroyed by TEARDOWN (or
//! timeout). This layer owns the parts of it that move media bytes:
//!
//! - One [`MediaTransport`](media::MediaTransport) per negotiated media
//!   stream, handling ingress demultiplexing and egress writing.
//! - [`SessionShared`]: traffic counters and the liveness clock, mutated
//!   by every media stream's network callbacks and read by the server's
//!   liveness watchdog.
//!
//! The RTSP method handling that drives the lifecycle (SETUP/PLAY/RECORD/
//! TEARDOWN) lives outside this crate; it decides the session's
//! [`StreamRole`] and transport parameters, then delegates byte movement
//! here.

pub mod format;
pub mod media;
pub mod transport;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::error::MediaError;
use media::MediaTransport;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Default liveness timeout in seconds (RFC 2326 §12.37): a session whose
/// peer has been silent this long is considered dead by the watchdog.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// Direction of media flow for a whole session, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    /// The remote peer publishes; the server receives data (RECORD).
    Ingest,
    /// The remote peer plays back; the server sends data (PLAY).
    Deliver,
}

/// Callback receiving every decode/routing error from ingress paths.
pub type OnDecodeErrorFn = Box<dyn Fn(&MediaError) + Send + Sync>;

/// State shared between all of a session's media streams and the liveness
/// watchdog.
///
/// Counters are plain atomics, not fields behind a coarse lock: the hot
/// ingress/egress paths update them with single read-modify-write
/// operations and the watchdog reads a consistent (if slightly stale)
/// view without contending.
pub struct SessionShared {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    /// Unix seconds of the last inbound UDP packet. Initialized to the
    /// creation time so a fresh session gets a full timeout of grace.
    last_packet_at: AtomicI64,
    on_decode_error: OnDecodeErrorFn,
}

impl SessionShared {
    /// Shared state with the default decode-error hook (logs a warning).
    pub fn new() -> Self {
        Self::with_decode_error_hook(Box::new(|err| {
            tracing::warn!(error = %err, "packet decode error");
        }))
    }

    /// Shared state with a custom decode-error hook. The hook is invoked
    /// exactly once per failed read, from the dispatch thread.
    pub fn with_decode_error_hook(on_decode_error: OnDecodeErrorFn) -> Self {
        Self {
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            last_packet_at: AtomicI64::new(unix_now()),
            on_decode_error,
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Unix seconds of the last inbound UDP packet.
    pub fn last_packet_at(&self) -> i64 {
        self.last_packet_at.load(Ordering::Relaxed)
    }

    pub(crate) fn add_bytes_sent(&self, n: usize) {
        self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes_received(&self, n: usize) {
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Record inbound traffic at `now` for the liveness watchdog.
    pub(crate) fn touch(&self, now: SystemTime) {
        self.last_packet_at.store(to_unix(now), Ordering::Relaxed);
    }

    /// Report a decode/routing error through the configured hook.
    pub(crate) fn report_decode_error(&self, err: MediaError) {
        (self.on_decode_error)(&err);
    }
}

impl Default for SessionShared {
    fn default() -> Self {
        Self::new()
    }
}

/// One server-side session: a unique ID, a fixed role, and the media
/// streams negotiated for it.
pub struct Session {
    /// Unique session identifier (16-char hex string).
    pub id: String,
    role: StreamRole,
    shared: Arc<SessionShared>,
    media: RwLock<Vec<Arc<MediaTransport>>>,
}

impl Session {
    /// Create a session with a unique auto-incrementing ID and the default
    /// decode-error hook.
    pub fn new(role: StreamRole) -> Self {
        Self::with_shared(role, Arc::new(SessionShared::new()))
    }

    /// Create a session around pre-built shared state (custom decode-error
    /// hook, or state also referenced by an external watchdog).
    pub fn with_shared(role: StreamRole, shared: Arc<SessionShared>) -> Self {
        let id = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
        Session {
            id: format!("{id:016X}"),
            role,
            shared,
            media: RwLock::new(Vec::new()),
        }
    }

    pub fn role(&self) -> StreamRole {
        self.role
    }

    /// Shared counters/liveness state, referenced (not owned) by every
    /// media stream of this session.
    pub fn shared(&self) -> Arc<SessionShared> {
        self.shared.clone()
    }

    /// Attach a negotiated media stream.
    pub fn add_media(&self, media: Arc<MediaTransport>) {
        self.media.write().push(media);
        tracing::debug!(session_id = %self.id, "media stream attached");
    }

    /// Activate every media stream (PLAY/RECORD entered).
    pub fn start(&self) {
        for media in self.media.read().iter() {
            media.start();
        }
        tracing::debug!(session_id = %self.id, role = ?self.role, "session media started");
    }

    /// Deactivate every media stream (TEARDOWN or disconnect).
    pub fn stop(&self) {
        for media in self.media.read().iter() {
            media.stop();
        }
        tracing::debug!(session_id = %self.id, "session media stopped");
    }

    pub fn bytes_sent(&self) -> u64 {
        self.shared.bytes_sent()
    }

    pub fn bytes_received(&self) -> u64 {
        self.shared.bytes_received()
    }

    /// Whether inbound traffic has been seen within `timeout`. The
    /// server's watchdog polls this to reap dead sessions.
    pub fn is_receiving(&self, timeout: Duration) -> bool {
        let elapsed = unix_now().saturating_sub(self.shared.last_packet_at());
        elapsed <= timeout.as_secs() as i64
    }
}

fn to_unix(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn unix_now() -> i64 {
    to_unix(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let a = Session::new(StreamRole::Ingest);
        let b = Session::new(StreamRole::Deliver);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 16);
    }

    #[test]
    fn counters_accumulate() {
        let shared = SessionShared::new();
        shared.add_bytes_sent(10);
        shared.add_bytes_sent(5);
        shared.add_bytes_received(7);
        assert_eq!(shared.bytes_sent(), 15);
        assert_eq!(shared.bytes_received(), 7);
    }

    #[test]
    fn fresh_session_is_receiving() {
        let session = Session::new(StreamRole::Ingest);
        assert!(session.is_receiving(Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS)));
    }

    #[test]
    fn touch_advances_liveness_clock() {
        let shared = SessionShared::new();
        let before = shared.last_packet_at();
        shared.touch(SystemTime::now() + Duration::from_secs(120));
        assert!(shared.last_packet_at() >= before + 119);
    }
}
