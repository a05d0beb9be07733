use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::transport::interleaved::InterleavedConn;
use crate::transport::udp::UdpMultiplexer;

/// How media bytes move between the network and the packet layer.
///
/// Negotiated once during SETUP; a media stream keeps the same mode for
/// its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Point-to-point UDP, one RTP/RTCP port pair per peer.
    UdpUnicast,
    /// UDP towards a multicast group; peers do not register read paths.
    UdpMulticast,
    /// Both packet families multiplexed over the session's TCP connection
    /// as `$`-framed channels (RFC 2326 §10.12).
    Interleaved,
}

/// UDP addressing for one media stream.
///
/// The multiplexer handles are the server-wide shared sockets (one per
/// protocol role); read ports identify the peer's source ports, write
/// addresses are the destinations for outbound packets. For multicast the
/// write addresses point at the group and the read ports are unused.
pub struct UdpSetup {
    pub rtp_multiplexer: Arc<UdpMultiplexer>,
    pub rtcp_multiplexer: Arc<UdpMultiplexer>,
    /// Peer IP inbound datagrams are expected from.
    pub peer_ip: IpAddr,
    /// Peer source port for RTP.
    pub rtp_read_port: u16,
    /// Peer source port for RTCP (conventionally `rtp_read_port + 1`).
    pub rtcp_read_port: u16,
    /// Destination for outbound RTP.
    pub rtp_write_addr: SocketAddr,
    /// Destination for outbound RTCP.
    pub rtcp_write_addr: SocketAddr,
    pub multicast: bool,
}

/// Interleaved addressing: the session connection plus the data channel
/// number. Control traffic uses `channel + 1`.
pub struct InterleavedSetup {
    pub conn: Arc<InterleavedConn>,
    pub channel: u8,
}

/// Transport selection for one media stream, fixed at creation.
///
/// Egress and ingress behavior dispatch on this variant; there is no
/// rebinding after activation.
pub enum TransportSetup {
    Udp(UdpSetup),
    Interleaved(InterleavedSetup),
}

impl TransportSetup {
    pub fn mode(&self) -> TransportMode {
        match self {
            TransportSetup::Udp(udp) if udp.multicast => TransportMode::UdpMulticast,
            TransportSetup::Udp(_) => TransportMode::UdpUnicast,
            TransportSetup::Interleaved(_) => TransportMode::Interleaved,
        }
    }
}

/// Parsed client-side transport info from the RTSP `Transport` header
/// (RFC 2326 §12.39).
///
/// Extracts the addressing the client proposed: a `client_port=RTP-RTCP`
/// pair for UDP, an `interleaved=N-N+1` channel pair for TCP, and the
/// `multicast` delivery flag.
#[derive(Debug, Clone, Default)]
pub struct TransportHeader {
    /// Client's RTP receive port (UDP modes).
    pub client_rtp_port: Option<u16>,
    /// Client's RTCP receive port (UDP modes).
    pub client_rtcp_port: Option<u16>,
    /// Data channel number (interleaved mode).
    pub interleaved_channel: Option<u8>,
    /// Whether the client asked for multicast delivery.
    pub multicast: bool,
}

impl TransportHeader {
    /// Parse the `Transport` header value.
    ///
    /// Returns `None` when the header proposes neither a UDP port pair nor
    /// an interleaved channel pair.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp_media::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(th.client_rtp_port, Some(8000));
    /// assert_eq!(th.client_rtcp_port, Some(8001));
    ///
    /// let th = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=0-1").unwrap();
    /// assert_eq!(th.interleaved_channel, Some(0));
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        let mut parsed = TransportHeader::default();

        for part in header.split(';') {
            let part = part.trim();
            if let Some(ports) = part.strip_prefix("client_port=") {
                let (rtp, rtcp) = parse_pair(ports)?;
                parsed.client_rtp_port = Some(rtp);
                parsed.client_rtcp_port = Some(rtcp);
            } else if let Some(channels) = part.strip_prefix("interleaved=") {
                let (data, control) = parse_pair::<u8>(channels)?;
                if control != data.checked_add(1)? {
                    return None;
                }
                parsed.interleaved_channel = Some(data);
            } else if part == "multicast" {
                parsed.multicast = true;
            }
        }

        if parsed.client_rtp_port.is_none() && parsed.interleaved_channel.is_none() {
            return None;
        }
        Some(parsed)
    }
}

/// Parse a `low-high` value pair such as `8000-8001` or `0-1`.
fn parse_pair<T: std::str::FromStr + Copy>(value: &str) -> Option<(T, T)> {
    let (low, high) = value.split_once('-')?;
    Some((low.trim().parse().ok()?, high.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_client_ports() {
        let th = TransportHeader::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(th.client_rtp_port, Some(5000));
        assert_eq!(th.client_rtcp_port, Some(5001));
        assert!(!th.multicast);
    }

    #[test]
    fn parse_interleaved_channels() {
        let th = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=2-3").unwrap();
        assert_eq!(th.interleaved_channel, Some(2));
        assert_eq!(th.client_rtp_port, None);
    }

    #[test]
    fn parse_multicast() {
        let th = TransportHeader::parse("RTP/AVP;multicast;client_port=5000-5001").unwrap();
        assert!(th.multicast);
    }

    #[test]
    fn parse_rejects_non_adjacent_channels() {
        assert!(TransportHeader::parse("RTP/AVP/TCP;interleaved=2-5").is_none());
    }

    #[test]
    fn parse_no_addressing() {
        assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    }
}
