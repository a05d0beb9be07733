use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use webrtc_util::marshal::{Marshal, Unmarshal};

use super::format::FormatPipeline;
use super::transport::{TransportSetup, UdpSetup};
use super::{SessionShared, StreamRole};
use crate::error::{MediaError, Result};
use crate::transport::{ReadFn, UDP_MAX_PAYLOAD_SIZE};

/// Callback receiving every decoded RTCP sub-packet from control ingress.
pub type OnControlFn = Box<dyn Fn(&(dyn rtcp::packet::Packet + Send + Sync)) + Send + Sync>;

/// One negotiated media stream's transport: ingress demultiplexing, egress
/// writing, NAT priming and RTCP correlation.
///
/// The unit is created when its media stream is negotiated and lives until
/// the session is torn down. Its transport mode and role are fixed for
/// that whole lifetime:
///
/// - [`initialize`](Self::initialize) builds the payload-type routing
///   table (ingest role only; a delivering server never routes inbound
///   data).
/// - [`start`](Self::start) activates transport wiring: pipelines first,
///   then NAT priming for unicast delivery, then the role-appropriate
///   inbound registrations.
/// - [`stop`](Self::stop) removes the registrations and stops pipelines.
///
/// Ingress callbacks run on the delivering transport's dispatch thread and
/// return `false` when the datagram/frame was dropped; every drop is
/// reported once through the session's decode-error hook. Egress goes
/// through [`write_rtp`](Self::write_rtp)/[`write_rtcp`](Self::write_rtcp),
/// which dispatch on the immutable transport setup.
pub struct MediaTransport {
    shared: Arc<SessionShared>,
    role: StreamRole,
    setup: TransportSetup,
    /// Payload type → pipeline. Populated once by `initialize` before any
    /// callback registration; immutable afterwards, so lookups need no
    /// lock.
    formats: HashMap<u8, Arc<dyn FormatPipeline>>,
    on_control: OnControlFn,
}

impl MediaTransport {
    pub fn new(
        shared: Arc<SessionShared>,
        role: StreamRole,
        setup: TransportSetup,
        on_control: OnControlFn,
    ) -> Self {
        Self {
            shared,
            role,
            setup,
            formats: HashMap::new(),
            on_control,
        }
    }

    pub fn role(&self) -> StreamRole {
        self.role
    }

    /// Build the payload-type routing table from the negotiated formats.
    ///
    /// Only ingest units route inbound data; for deliver units the table
    /// stays empty and the argument is ignored.
    pub fn initialize(&mut self, pipelines: impl IntoIterator<Item = (u8, Arc<dyn FormatPipeline>)>) {
        if self.role == StreamRole::Ingest {
            self.formats = pipelines.into_iter().collect();
        }
    }

    /// Activate transport wiring.
    ///
    /// Pipelines start before any listener registration: a registered
    /// callback may immediately need [`find_format_by_ssrc`]
    /// (Self::find_format_by_ssrc) to answer.
    pub fn start(self: &Arc<Self>) {
        for pipeline in self.formats.values() {
            pipeline.start();
        }

        match &self.setup {
            TransportSetup::Udp(udp) => self.start_udp(udp),
            TransportSetup::Interleaved(il) => {
                let unit = Arc::clone(self);
                let rtp_read: ReadFn = match self.role {
                    StreamRole::Ingest => Arc::new(move |payload| unit.read_rtp_interleaved(payload)),
                    StreamRole::Deliver => {
                        Arc::new(move |payload| unit.read_rtp_interleaved_deliver(payload))
                    }
                };
                let unit = Arc::clone(self);
                let rtcp_read: ReadFn = match self.role {
                    StreamRole::Ingest => {
                        Arc::new(move |payload| unit.read_rtcp_interleaved_ingest(payload))
                    }
                    StreamRole::Deliver => {
                        Arc::new(move |payload| unit.read_rtcp_interleaved_deliver(payload))
                    }
                };
                il.conn.bind_channel(il.channel, rtp_read);
                il.conn.bind_channel(il.channel + 1, rtcp_read);
            }
        }

        tracing::debug!(mode = ?self.setup.mode(), role = ?self.role, "media transport started");
    }

    fn start_udp(self: &Arc<Self>, udp: &UdpSetup) {
        if udp.multicast {
            // group delivery: no per-source inbound registration exists
            return;
        }

        match self.role {
            StreamRole::Deliver => {
                // Open the NAT/firewall mapping by sending empty packets to
                // the counterpart before listening for anything, so the
                // return path for our outbound stream is already open.
                self.prime_nat(udp);

                // playing peers send RTCP receiver reports only, never data
                let unit = Arc::clone(self);
                udp.rtcp_multiplexer.add_client(
                    udp.peer_ip,
                    udp.rtcp_read_port,
                    Arc::new(move |payload| unit.read_rtcp_udp_deliver(payload)),
                );
            }
            StreamRole::Ingest => {
                let unit = Arc::clone(self);
                udp.rtp_multiplexer.add_client(
                    udp.peer_ip,
                    udp.rtp_read_port,
                    Arc::new(move |payload| unit.read_rtp_udp(payload)),
                );
                let unit = Arc::clone(self);
                udp.rtcp_multiplexer.add_client(
                    udp.peer_ip,
                    udp.rtcp_read_port,
                    Arc::new(move |payload| unit.read_rtcp_udp_ingest(payload)),
                );
            }
        }
    }

    /// Send one empty RTP packet and one empty RTCP receiver report to the
    /// write destinations. Failures are ignored: priming is best-effort
    /// and real traffic follows immediately.
    fn prime_nat(&self, udp: &UdpSetup) {
        let empty_rtp = rtp::packet::Packet {
            header: rtp::header::Header {
                version: 2,
                ..Default::default()
            },
            payload: Bytes::new(),
        };
        if let Ok(buf) = empty_rtp.marshal() {
            let _ = udp.rtp_multiplexer.write(&buf, udp.rtp_write_addr);
        }

        if let Ok(buf) = rtcp::receiver_report::ReceiverReport::default().marshal() {
            let _ = udp.rtcp_multiplexer.write(&buf, udp.rtcp_write_addr);
        }
    }

    /// Deactivate transport wiring and stop pipelines.
    ///
    /// UDP registrations are removed explicitly; interleaved channel
    /// bindings die with the connection's dispatch table. Idempotent.
    pub fn stop(&self) {
        if let TransportSetup::Udp(udp) = &self.setup {
            if !udp.multicast {
                udp.rtp_multiplexer.remove_client(udp.peer_ip, udp.rtp_read_port);
                udp.rtcp_multiplexer.remove_client(udp.peer_ip, udp.rtcp_read_port);
            }
        }

        for pipeline in self.formats.values() {
            pipeline.stop();
        }
    }

    /// Find the pipeline that has observed `ssrc` from its sender.
    ///
    /// Linear scan: a media stream carries at most a handful of formats,
    /// and each pipeline owns its correlation state because the observed
    /// SSRC can change over a session.
    pub fn find_format_by_ssrc(&self, ssrc: u32) -> Option<&Arc<dyn FormatPipeline>> {
        self.formats
            .values()
            .find(|pipeline| pipeline.observed_ssrc() == Some(ssrc))
    }

    // ---- egress ----

    /// Write an encoded RTP payload through this stream's transport.
    pub fn write_rtp(&self, payload: &[u8]) -> Result<()> {
        self.shared.add_bytes_sent(payload.len());
        match &self.setup {
            TransportSetup::Udp(udp) => udp.rtp_multiplexer.write(payload, udp.rtp_write_addr),
            TransportSetup::Interleaved(il) => il.conn.write_frame(il.channel, payload),
        }
    }

    /// Write an encoded RTCP payload through this stream's transport.
    pub fn write_rtcp(&self, payload: &[u8]) -> Result<()> {
        self.shared.add_bytes_sent(payload.len());
        match &self.setup {
            TransportSetup::Udp(udp) => udp.rtcp_multiplexer.write(payload, udp.rtcp_write_addr),
            TransportSetup::Interleaved(il) => il.conn.write_frame(il.channel + 1, payload),
        }
    }

    // ---- ingress ----

    /// Inbound RTP datagram, ingest role.
    pub(crate) fn read_rtp_udp(&self, payload: &[u8]) -> bool {
        self.shared.add_bytes_received(payload.len());

        if payload.len() == UDP_MAX_PAYLOAD_SIZE + 1 {
            self.shared.report_decode_error(MediaError::RtpPacketTooBigUdp);
            return false;
        }

        let mut buf = payload;
        let pkt = match rtp::packet::Packet::unmarshal(&mut buf) {
            Ok(pkt) => pkt,
            Err(e) => {
                self.shared.report_decode_error(MediaError::InvalidRtpPacket(e));
                return false;
            }
        };

        let now = SystemTime::now();
        self.shared.touch(now);

        let payload_type = pkt.header.payload_type;
        match self.formats.get(&payload_type) {
            Some(pipeline) => pipeline.handle_data(pkt, Some(now)),
            None => {
                self.shared
                    .report_decode_error(MediaError::UnknownPayloadType(payload_type));
                return false;
            }
        }

        true
    }

    /// Inbound RTCP datagram, ingest role.
    pub(crate) fn read_rtcp_udp_ingest(&self, payload: &[u8]) -> bool {
        self.shared.add_bytes_received(payload.len());

        if payload.len() == UDP_MAX_PAYLOAD_SIZE + 1 {
            self.shared.report_decode_error(MediaError::RtcpPacketTooBigUdp);
            return false;
        }

        let mut buf = payload;
        let packets = match rtcp::packet::unmarshal(&mut buf) {
            Ok(packets) => packets,
            Err(e) => {
                self.shared.report_decode_error(MediaError::InvalidRtcpPacket(e));
                return false;
            }
        };

        let now = SystemTime::now();
        self.shared.touch(now);
        self.route_control(&packets, now);
        true
    }

    /// Inbound RTCP datagram, deliver role (peers send receiver reports
    /// back while playing).
    pub(crate) fn read_rtcp_udp_deliver(&self, payload: &[u8]) -> bool {
        self.shared.add_bytes_received(payload.len());

        if payload.len() == UDP_MAX_PAYLOAD_SIZE + 1 {
            self.shared.report_decode_error(MediaError::RtcpPacketTooBigUdp);
            return false;
        }

        let mut buf = payload;
        let packets = match rtcp::packet::unmarshal(&mut buf) {
            Ok(packets) => packets,
            Err(e) => {
                self.shared.report_decode_error(MediaError::InvalidRtcpPacket(e));
                return false;
            }
        };

        self.shared.touch(SystemTime::now());
        for pkt in &packets {
            (self.on_control)(pkt.as_ref());
        }
        true
    }

    /// Inbound deframed RTP payload, ingest role. The connection's read
    /// loop already bounds frame sizes and stamps arrival.
    pub(crate) fn read_rtp_interleaved(&self, payload: &[u8]) -> bool {
        self.shared.add_bytes_received(payload.len());

        let mut buf = payload;
        let pkt = match rtp::packet::Packet::unmarshal(&mut buf) {
            Ok(pkt) => pkt,
            Err(e) => {
                self.shared.report_decode_error(MediaError::InvalidRtpPacket(e));
                return false;
            }
        };

        let payload_type = pkt.header.payload_type;
        match self.formats.get(&payload_type) {
            Some(pipeline) => pipeline.handle_data(pkt, None),
            None => {
                self.shared
                    .report_decode_error(MediaError::UnknownPayloadType(payload_type));
                return false;
            }
        }

        true
    }

    /// Inbound deframed RTP payload on a deliver-role data channel: a
    /// delivering server never accepts data, so this is a protocol
    /// violation and the frame is dropped.
    pub(crate) fn read_rtp_interleaved_deliver(&self, payload: &[u8]) -> bool {
        self.shared.add_bytes_received(payload.len());
        self.shared.report_decode_error(MediaError::UnexpectedRtpPacket);
        false
    }

    /// Inbound deframed RTCP payload, ingest role.
    pub(crate) fn read_rtcp_interleaved_ingest(&self, payload: &[u8]) -> bool {
        self.shared.add_bytes_received(payload.len());

        if payload.len() > UDP_MAX_PAYLOAD_SIZE {
            self.shared.report_decode_error(MediaError::RtcpPacketTooBig {
                size: payload.len(),
                max: UDP_MAX_PAYLOAD_SIZE,
            });
            return false;
        }

        let mut buf = payload;
        let packets = match rtcp::packet::unmarshal(&mut buf) {
            Ok(packets) => packets,
            Err(e) => {
                self.shared.report_decode_error(MediaError::InvalidRtcpPacket(e));
                return false;
            }
        };

        self.route_control(&packets, SystemTime::now());
        true
    }

    /// Inbound deframed RTCP payload, deliver role.
    pub(crate) fn read_rtcp_interleaved_deliver(&self, payload: &[u8]) -> bool {
        self.shared.add_bytes_received(payload.len());

        if payload.len() > UDP_MAX_PAYLOAD_SIZE {
            self.shared.report_decode_error(MediaError::RtcpPacketTooBig {
                size: payload.len(),
                max: UDP_MAX_PAYLOAD_SIZE,
            });
            return false;
        }

        let mut buf = payload;
        let packets = match rtcp::packet::unmarshal(&mut buf) {
            Ok(packets) => packets,
            Err(e) => {
                self.shared.report_decode_error(MediaError::InvalidRtcpPacket(e));
                return false;
            }
        };

        for pkt in &packets {
            (self.on_control)(pkt.as_ref());
        }
        true
    }

    /// Correlate sender reports to their pipelines and forward every
    /// sub-packet to the control observer.
    ///
    /// A sender report whose SSRC matches no pipeline is not an error:
    /// reports may arrive before the matching data stream has been
    /// observed.
    fn route_control(
        &self,
        packets: &[Box<dyn rtcp::packet::Packet + Send + Sync>],
        now: SystemTime,
    ) {
        for pkt in packets {
            if let Some(sr) = pkt
                .as_any()
                .downcast_ref::<rtcp::sender_report::SenderReport>()
            {
                if let Some(pipeline) = self.find_format_by_ssrc(sr.ssrc) {
                    pipeline.handle_sender_report(sr, now);
                }
            }
            (self.on_control)(pkt.as_ref());
        }
    }
}
