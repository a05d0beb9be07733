//! Interleaved channel framing over the session's TCP connection
//! (RFC 2326 §10.12).
//!
//! Each frame is a 4-byte header followed by the payload:
//!
//! ```text
//! +--------+---------+-------------------+-----------+
//! | 0x24   | channel | length (u16, BE)  | payload   |
//! +--------+---------+-------------------+-----------+
//! ```
//!
//! By convention a media stream occupies two adjacent channels: data on
//! channel `N`, control on channel `N + 1`.

use std::collections::HashMap;
use std::io::{self, Read};
use std::net::TcpStream;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::{ReadFn, map_write_error};
use crate::error::{MediaError, Result};

/// Frame delimiter, ASCII `$`.
pub const INTERLEAVED_MAGIC: u8 = 0x24;

/// Size of the frame header preceding each payload.
pub const INTERLEAVED_HEADER_SIZE: usize = 4;

/// Largest payload representable by the frame's 16-bit length field.
pub const INTERLEAVED_MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Byte-stream endpoint an [`InterleavedConn`] writes frames through.
///
/// The seam exists so egress can be exercised without a real socket; the
/// production implementation is [`TcpStream`].
pub trait FramedIo: Send + Sync {
    /// Arm a deadline for the next write.
    fn set_write_deadline(&self, timeout: Duration) -> io::Result<()>;

    /// Write the whole buffer or fail.
    fn write_all(&self, buf: &[u8]) -> io::Result<()>;
}

impl FramedIo for TcpStream {
    fn set_write_deadline(&self, timeout: Duration) -> io::Result<()> {
        self.set_write_timeout(Some(timeout))
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut stream = self;
        io::Write::write_all(&mut stream, buf)
    }
}

/// One session's interleaved connection: frame writer plus the
/// channel-indexed dispatch table for inbound frames.
///
/// Frame writes from all media streams sharing the connection are
/// serialized by the internal frame buffer's lock, so concurrent writers
/// cannot interleave frame bytes destructively.
///
/// The dispatch table lock is held both when channels are bound during
/// activation and when inbound frames are dispatched, so binding never
/// races the connection's read loop. The table lives and dies with the
/// connection; media streams do not unbind individual channels.
pub struct InterleavedConn {
    io: Box<dyn FramedIo>,
    write_timeout: Duration,
    write_buf: Mutex<Vec<u8>>,
    channels: RwLock<HashMap<u8, ReadFn>>,
}

impl InterleavedConn {
    pub fn new(io: Box<dyn FramedIo>, write_timeout: Duration) -> Self {
        Self {
            io,
            write_timeout,
            write_buf: Mutex::new(Vec::new()),
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Frame `payload` on `channel` and write it out, arming a fresh write
    /// deadline first. Deadline expiry surfaces as
    /// [`MediaError::WriteTimeout`].
    pub fn write_frame(&self, channel: u8, payload: &[u8]) -> Result<()> {
        if payload.len() > INTERLEAVED_MAX_PAYLOAD_SIZE {
            return Err(MediaError::FrameTooBig {
                size: payload.len(),
                max: INTERLEAVED_MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = self.write_buf.lock();
        self.io
            .set_write_deadline(self.write_timeout)
            .map_err(map_write_error)?;

        buf.clear();
        buf.push(INTERLEAVED_MAGIC);
        buf.push(channel);
        buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(payload);
        self.io.write_all(&buf).map_err(map_write_error)
    }

    /// Bind the read callback for one channel. Replaces any previous
    /// binding.
    pub fn bind_channel(&self, channel: u8, callback: ReadFn) {
        self.channels.write().insert(channel, callback);
        tracing::debug!(channel, "interleaved channel bound");
    }

    /// Deliver one deframed payload to the callback bound to `channel`.
    /// Returns `false` when the channel is unbound or the callback rejected
    /// the payload.
    pub fn dispatch(&self, channel: u8, payload: &[u8]) -> bool {
        let callback = self.channels.read().get(&channel).cloned();
        match callback {
            Some(callback) => callback(payload),
            None => false,
        }
    }

    /// Drop all channel bindings (connection teardown).
    pub fn clear_channels(&self) {
        self.channels.write().clear();
    }
}

/// Read one interleaved frame from `reader`, returning its channel and
/// payload.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<(u8, Vec<u8>)> {
    let mut header = [0u8; INTERLEAVED_HEADER_SIZE];
    reader.read_exact(&mut header)?;

    if header[0] != INTERLEAVED_MAGIC {
        return Err(MediaError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid interleaved frame magic: {:#04x}", header[0]),
        )));
    }

    let channel = header[1];
    let len = u16::from_be_bytes([header[2], header[3]]) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok((channel, payload))
}
