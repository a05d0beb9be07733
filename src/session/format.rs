use std::time::SystemTime;

use parking_lot::Mutex;
use rtcp::sender_report::SenderReport;

/// Per-format processing pipeline for one negotiated payload type.
///
/// An ingest-role media stream owns one pipeline per negotiated format and
/// routes every decoded inbound RTP packet to the pipeline registered for
/// the packet's payload type. The pipeline tracks which SSRC it has
/// observed from the sender so that RTCP sender reports can be correlated
/// back to it.
///
/// Implementations must tolerate concurrent invocation: data packets and
/// sender reports arrive on different dispatch threads.
pub trait FormatPipeline: Send + Sync {
    /// Called once before any listener that could query
    /// [`observed_ssrc`](Self::observed_ssrc) is registered.
    fn start(&self);

    /// Called during media teardown, after ingress deregistration.
    fn stop(&self);

    /// One decoded inbound RTP packet. `arrival` carries the receive time
    /// for UDP ingress; interleaved ingress passes `None` because the
    /// connection's read loop already stamps arrival.
    fn handle_data(&self, packet: rtp::packet::Packet, arrival: Option<SystemTime>);

    /// An RTCP sender report whose SSRC matched
    /// [`observed_ssrc`](Self::observed_ssrc).
    fn handle_sender_report(&self, report: &SenderReport, arrival: SystemTime);

    /// The SSRC observed from the sender's data stream, if any yet.
    ///
    /// May change over the pipeline's lifetime (the sender re-picks its
    /// SSRC on collision), which is why correlation state lives here and
    /// not in a central index.
    fn observed_ssrc(&self) -> Option<u32>;
}

/// Callback receiving every inbound RTP packet routed to a format.
pub type OnPacketFn = Box<dyn Fn(rtp::packet::Packet) + Send + Sync>;

/// Synchronization info extracted from the last matched sender report.
#[derive(Debug, Clone)]
pub struct SenderInfo {
    pub ntp_time: u64,
    pub rtp_time: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    pub received_at: SystemTime,
}

/// Default [`FormatPipeline`]: remembers the sender's SSRC, forwards data
/// packets to a callback, and keeps the most recent sender report.
pub struct SessionFormat {
    payload_type: u8,
    on_packet: OnPacketFn,
    observed_ssrc: Mutex<Option<u32>>,
    last_sender_report: Mutex<Option<SenderInfo>>,
}

impl SessionFormat {
    pub fn new(payload_type: u8, on_packet: OnPacketFn) -> Self {
        Self {
            payload_type,
            on_packet,
            observed_ssrc: Mutex::new(None),
            last_sender_report: Mutex::new(None),
        }
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    /// Sync info from the last sender report matched to this format.
    pub fn last_sender_report(&self) -> Option<SenderInfo> {
        self.last_sender_report.lock().clone()
    }
}

impl FormatPipeline for SessionFormat {
    fn start(&self) {
        tracing::debug!(payload_type = self.payload_type, "format pipeline started");
    }

    fn stop(&self) {
        tracing::debug!(payload_type = self.payload_type, "format pipeline stopped");
    }

    fn handle_data(&self, packet: rtp::packet::Packet, _arrival: Option<SystemTime>) {
        // latest wins: the sender may re-pick its SSRC on collision
        *self.observed_ssrc.lock() = Some(packet.header.ssrc);
        (self.on_packet)(packet);
    }

    fn handle_sender_report(&self, report: &SenderReport, arrival: SystemTime) {
        *self.last_sender_report.lock() = Some(SenderInfo {
            ntp_time: report.ntp_time,
            rtp_time: report.rtp_time,
            packet_count: report.packet_count,
            octet_count: report.octet_count,
            received_at: arrival,
        });
    }

    fn observed_ssrc(&self) -> Option<u32> {
        *self.observed_ssrc.lock()
    }
}
