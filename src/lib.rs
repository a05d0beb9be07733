pub mod error;
pub mod session;
pub mod transport;

pub use error::{MediaError, Result};
pub use session::format::{FormatPipeline, SessionFormat};
pub use session::media::MediaTransport;
pub use session::transport::{TransportHeader, TransportMode, TransportSetup};
pub use session::{Session, SessionShared, StreamRole};
pub use transport::interleaved::InterleavedConn;
pub use transport::udp::UdpMultiplexer;
