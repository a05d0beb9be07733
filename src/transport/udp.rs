use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;

use super::{ReadFn, UDP_MAX_PAYLOAD_SIZE, map_write_error};
use crate::error::Result;

/// Poll interval for the dispatch loop's read timeout, so that
/// [`UdpMultiplexer::stop`] can terminate it promptly.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A shared UDP socket routing inbound datagrams by source address.
///
/// The server binds one multiplexer per protocol role — one for RTP, one
/// for RTCP — and every session registers its peer's `(ip, port)` with a
/// read callback. The dispatch loop delivers each datagram to the callback
/// registered for its source; datagrams from unknown sources are dropped.
///
/// This layer is deliberately address-only: it knows nothing about
/// sessions or payload formats. Callbacks decide what the bytes mean.
///
/// At most one registration exists per `(ip, port)` at a time; registering
/// again replaces the previous callback.
pub struct UdpMultiplexer {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<HashMap<(IpAddr, u16), ReadFn>>>,
    running: Arc<AtomicBool>,
}

impl UdpMultiplexer {
    /// Bind a multiplexer socket. Pass port 0 to let the OS pick.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(READ_POLL_INTERVAL))?;
        tracing::debug!(local_addr = %socket.local_addr()?, "UDP multiplexer bound");
        Ok(Self {
            socket: Arc::new(socket),
            clients: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Bind a multiplexer and join an IPv4 multicast group on the given
    /// interface, for serving multicast sessions.
    pub fn bind_multicast(addr: SocketAddr, group: Ipv4Addr, interface: Ipv4Addr) -> Result<Self> {
        let mux = Self::bind(addr)?;
        mux.socket.join_multicast_v4(&group, &interface)?;
        tracing::debug!(%group, %interface, "joined multicast group");
        Ok(mux)
    }

    /// Local port the socket is bound to.
    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Start the dispatch loop on its own thread.
    ///
    /// The loop owns a receive buffer of `UDP_MAX_PAYLOAD_SIZE + 1` bytes;
    /// a datagram filling it exactly reaches the callback with that length
    /// so the callback can reject it as possibly truncated.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let socket = self.socket.clone();
        let clients = self.clients.clone();
        let running = self.running.clone();

        thread::spawn(move || {
            let mut buf = [0u8; UDP_MAX_PAYLOAD_SIZE + 1];
            while running.load(Ordering::SeqCst) {
                match socket.recv_from(&mut buf) {
                    Ok((n, source)) => {
                        dispatch(&clients, source, &buf[..n]);
                    }
                    Err(ref e)
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => {
                        if running.load(Ordering::SeqCst) {
                            tracing::warn!(error = %e, "UDP receive error");
                        }
                    }
                }
            }
            tracing::debug!("UDP dispatch loop exited");
        });
    }

    /// Stop the dispatch loop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Register the read callback for datagrams arriving from `(ip, port)`.
    pub fn add_client(&self, ip: IpAddr, port: u16, callback: ReadFn) {
        self.clients.write().insert((ip, port), callback);
        tracing::debug!(%ip, port, "UDP client registered");
    }

    /// Remove the registration for `(ip, port)`. Idempotent.
    pub fn remove_client(&self, ip: IpAddr, port: u16) {
        if self.clients.write().remove(&(ip, port)).is_some() {
            tracing::debug!(%ip, port, "UDP client removed");
        }
    }

    /// Whether a callback is registered for `(ip, port)`.
    pub fn has_client(&self, ip: IpAddr, port: u16) -> bool {
        self.clients.read().contains_key(&(ip, port))
    }

    /// Send raw bytes to a destination address.
    pub fn write(&self, payload: &[u8], addr: SocketAddr) -> Result<()> {
        self.socket
            .send_to(payload, addr)
            .map(|_| ())
            .map_err(map_write_error)
    }

    /// Deliver one datagram to the callback registered for its source.
    /// Returns `false` when no callback is registered or the callback
    /// rejected the payload.
    #[cfg(test)]
    pub(crate) fn dispatch_datagram(&self, source: SocketAddr, payload: &[u8]) -> bool {
        dispatch(&self.clients, source, payload)
    }
}

fn dispatch(
    clients: &RwLock<HashMap<(IpAddr, u16), ReadFn>>,
    source: SocketAddr,
    payload: &[u8],
) -> bool {
    let callback = clients.read().get(&(source.ip(), source.port())).cloned();
    match callback {
        Some(callback) => callback(payload),
        None => false,
    }
}
