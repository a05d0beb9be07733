//! Network transports shared by all sessions.
//!
//! Two primitives carry media traffic:
//!
//! - [`udp::UdpMultiplexer`] — one socket per protocol role (RTP or RTCP)
//!   shared across every session, routing inbound datagrams to the callback
//!   registered for the datagram's source address.
//! - [`interleaved::InterleavedConn`] — the session's single TCP connection
//!   carrying `$`-framed channels (RFC 2326 §10.12).

pub mod interleaved;
pub mod udp;

use std::io;
use std::sync::Arc;

use crate::error::MediaError;

/// Largest UDP payload accepted on the media sockets: an Ethernet MTU of
/// 1500 bytes minus 20 bytes of IP header and 8 bytes of UDP header.
///
/// Receive buffers are sized to `UDP_MAX_PAYLOAD_SIZE + 1` so that a
/// datagram which fills the buffer exactly is distinguishable — it may have
/// been truncated by the kernel and must be dropped.
pub const UDP_MAX_PAYLOAD_SIZE: usize = 1472;

/// Inbound read callback. Receives the raw payload of one datagram or
/// deframed channel unit; returns `false` when the input was dropped.
pub type ReadFn = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Maps an I/O failure from a transport write to the crate error, folding
/// deadline expiry into [`MediaError::WriteTimeout`].
pub(crate) fn map_write_error(err: io::Error) -> MediaError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => MediaError::WriteTimeout,
        _ => MediaError::Io(err),
    }
}
