//! Error types for the media-transport layer.

/// Errors surfaced by the media-transport layer.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Ingress size guards**: [`RtpPacketTooBigUdp`](Self::RtpPacketTooBigUdp),
///   [`RtcpPacketTooBigUdp`](Self::RtcpPacketTooBigUdp),
///   [`RtcpPacketTooBig`](Self::RtcpPacketTooBig).
/// - **Codec rejection**: [`InvalidRtpPacket`](Self::InvalidRtpPacket),
///   [`InvalidRtcpPacket`](Self::InvalidRtcpPacket).
/// - **Routing**: [`UnknownPayloadType`](Self::UnknownPayloadType),
///   [`UnexpectedRtpPacket`](Self::UnexpectedRtpPacket).
/// - **Egress**: [`FrameTooBig`](Self::FrameTooBig),
///   [`WriteTimeout`](Self::WriteTimeout), [`Io`](Self::Io).
///
/// Decode and routing errors are reported once through the session's
/// decode-error hook and fail only the read that produced them; they never
/// terminate the dispatch loop.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// A UDP RTP datagram filled the receive buffer exactly, so its tail may
    /// have been truncated by the kernel and the contents are untrustworthy.
    #[error("RTP packet is too big to be read with UDP")]
    RtpPacketTooBigUdp,

    /// A UDP RTCP datagram filled the receive buffer exactly (see
    /// [`RtpPacketTooBigUdp`](Self::RtpPacketTooBigUdp)).
    #[error("RTCP packet is too big to be read with UDP")]
    RtcpPacketTooBigUdp,

    /// An interleaved RTCP payload exceeds the maximum accepted size.
    #[error("RTCP packet size ({size}) is greater than maximum allowed ({max})")]
    RtcpPacketTooBig { size: usize, max: usize },

    /// The RTP codec rejected the bytes.
    #[error("invalid RTP packet: {0}")]
    InvalidRtpPacket(#[source] webrtc_util::Error),

    /// The RTCP codec rejected the bytes.
    #[error("invalid RTCP packet: {0}")]
    InvalidRtcpPacket(#[source] rtcp::Error),

    /// An inbound RTP packet carried a payload type with no registered
    /// pipeline. Only reported by ingest-role units.
    #[error("received RTP packet with unknown payload type: {0}")]
    UnknownPayloadType(u8),

    /// An RTP packet arrived on the data channel of a deliver-role unit,
    /// which never accepts inbound data while sending.
    #[error("received RTP packet on a delivery data channel")]
    UnexpectedRtpPacket,

    /// An outbound payload does not fit in a single interleaved frame.
    #[error("frame payload size ({size}) is greater than maximum allowed ({max})")]
    FrameTooBig { size: usize, max: usize },

    /// A transport write exceeded its deadline.
    #[error("write timed out")]
    WriteTimeout,

    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for `Result<T, MediaError>`.
pub type Result<T> = std::result::Result<T, MediaError>;
