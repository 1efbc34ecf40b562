//! DMX over E1.31: universe state, packet construction, emission.

pub mod packet;
pub mod transport;
pub mod universe;

pub use packet::{build_packet, multicast_addr};
pub use transport::{DatagramSink, DmxTransport, UdpSink};
pub use universe::{Universe, UniverseRegistry, WriteLayer};
