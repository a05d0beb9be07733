//! Integration test: media transport over real localhost UDP sockets.
//!
//! Binds the shared RTP/RTCP multiplexers with live dispatch loops, wires
//! an ingest session to a peer socket, and verifies ingress routing,
//! traffic accounting, NAT priming and teardown end to end.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use webrtc_util::marshal::{Marshal, Unmarshal};

use rtsp_media::session::transport::UdpSetup;
use rtsp_media::{
    FormatPipeline, MediaTransport, Session, SessionFormat, SessionShared, StreamRole,
    TransportSetup, UdpMultiplexer,
};

fn localhost(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn rtp_bytes(payload_type: u8, ssrc: u32, payload: &'static [u8]) -> Vec<u8> {
    let pkt = rtp::packet::Packet {
        header: rtp::header::Header {
            version: 2,
            payload_type,
            ssrc,
            ..Default::default()
        },
        payload: Bytes::from_static(payload),
    };
    pkt.marshal().unwrap().to_vec()
}

/// Polls `condition` until it holds or the timeout elapses.
fn wait_for(condition: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn ingest_session_receives_rtp_and_rtcp_over_udp() {
    let rtp_mux = Arc::new(UdpMultiplexer::bind(localhost(0)).unwrap());
    let rtcp_mux = Arc::new(UdpMultiplexer::bind(localhost(0)).unwrap());
    rtp_mux.start();
    rtcp_mux.start();

    // the publishing peer's sockets; their local ports are what the
    // multiplexers route on
    let peer_rtp = UdpSocket::bind(localhost(0)).unwrap();
    let peer_rtcp = UdpSocket::bind(localhost(0)).unwrap();

    let session = Session::new(StreamRole::Ingest);
    let received = Arc::new(AtomicUsize::new(0));
    let control_hits = Arc::new(AtomicUsize::new(0));

    let setup = TransportSetup::Udp(UdpSetup {
        rtp_multiplexer: rtp_mux.clone(),
        rtcp_multiplexer: rtcp_mux.clone(),
        peer_ip: localhost(0).ip(),
        rtp_read_port: peer_rtp.local_addr().unwrap().port(),
        rtcp_read_port: peer_rtcp.local_addr().unwrap().port(),
        rtp_write_addr: peer_rtp.local_addr().unwrap(),
        rtcp_write_addr: peer_rtcp.local_addr().unwrap(),
        multicast: false,
    });

    let hits = control_hits.clone();
    let mut media = MediaTransport::new(
        session.shared(),
        session.role(),
        setup,
        Box::new(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        }),
    );
    let r = received.clone();
    let format = Arc::new(SessionFormat::new(
        96,
        Box::new(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        }),
    ));
    let pipeline: Arc<dyn FormatPipeline> = format.clone();
    media.initialize([(96, pipeline)]);
    let media = Arc::new(media);
    session.add_media(media.clone());
    session.start();

    // publish three data packets
    let rtp_dest = localhost(rtp_mux.local_port().unwrap());
    for _ in 0..3 {
        peer_rtp
            .send_to(&rtp_bytes(96, 0x4242, b"sample"), rtp_dest)
            .unwrap();
    }
    assert!(
        wait_for(|| received.load(Ordering::SeqCst) == 3, Duration::from_secs(2)),
        "pipeline never saw the published packets"
    );
    assert_eq!(format.observed_ssrc(), Some(0x4242));
    assert!(session.bytes_received() > 0);
    assert!(session.is_receiving(Duration::from_secs(60)));

    // a sender report from the same SSRC correlates back to the format
    let sr = rtcp::sender_report::SenderReport {
        ssrc: 0x4242,
        rtp_time: 1234,
        ..Default::default()
    };
    let rtcp_dest = localhost(rtcp_mux.local_port().unwrap());
    peer_rtcp
        .send_to(&sr.marshal().unwrap(), rtcp_dest)
        .unwrap();
    assert!(
        wait_for(|| control_hits.load(Ordering::SeqCst) == 1, Duration::from_secs(2)),
        "control observer never fired"
    );
    assert!(
        wait_for(
            || format.last_sender_report().is_some(),
            Duration::from_secs(2)
        ),
        "sender report was not correlated"
    );
    assert_eq!(format.last_sender_report().unwrap().rtp_time, 1234);

    // teardown: further publishes are dropped without reaching the pipeline
    session.stop();
    peer_rtp
        .send_to(&rtp_bytes(96, 0x4242, b"late"), rtp_dest)
        .unwrap();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(received.load(Ordering::SeqCst), 3);

    rtp_mux.stop();
    rtcp_mux.stop();
}

#[test]
fn deliver_session_primes_nat_and_accounts_sent_bytes() {
    let rtp_mux = Arc::new(UdpMultiplexer::bind(localhost(0)).unwrap());
    let rtcp_mux = Arc::new(UdpMultiplexer::bind(localhost(0)).unwrap());

    // the playing peer's receive sockets
    let peer_rtp = UdpSocket::bind(localhost(0)).unwrap();
    let peer_rtcp = UdpSocket::bind(localhost(0)).unwrap();
    peer_rtp
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    peer_rtcp
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let shared = Arc::new(SessionShared::new());
    let session = Session::with_shared(StreamRole::Deliver, shared.clone());

    let setup = TransportSetup::Udp(UdpSetup {
        rtp_multiplexer: rtp_mux.clone(),
        rtcp_multiplexer: rtcp_mux.clone(),
        peer_ip: localhost(0).ip(),
        rtp_read_port: peer_rtp.local_addr().unwrap().port(),
        rtcp_read_port: peer_rtcp.local_addr().unwrap().port(),
        rtp_write_addr: peer_rtp.local_addr().unwrap(),
        rtcp_write_addr: peer_rtcp.local_addr().unwrap(),
        multicast: false,
    });

    let media = Arc::new(MediaTransport::new(
        session.shared(),
        session.role(),
        setup,
        Box::new(|_| {}),
    ));
    session.add_media(media.clone());
    session.start();

    // NAT priming: one empty packet per destination before any payload
    let mut buf = [0u8; 64];
    let (n, _) = peer_rtp.recv_from(&mut buf).unwrap();
    let mut data = &buf[..n];
    let primer = rtp::packet::Packet::unmarshal(&mut data).unwrap();
    assert_eq!(primer.header.version, 2);
    assert!(primer.payload.is_empty());
    let (n, _) = peer_rtcp.recv_from(&mut buf).unwrap();
    let mut data = &buf[..n];
    assert!(rtcp::packet::unmarshal(&mut data).is_ok());

    // actual delivery counts towards the sent-byte counter
    let frame = rtp_bytes(96, 0xABCD, b"media payload");
    media.write_rtp(&frame).unwrap();
    let (n, _) = peer_rtp.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], frame.as_slice());
    assert_eq!(session.bytes_sent(), frame.len() as u64);

    session.stop();
}
