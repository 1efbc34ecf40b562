//! DMX emission: one E1.31 packet per universe per tick.
//!
//! The transport walks every universe the server has ever referenced
//! and emits its merged state each tick, so receivers see a steady
//! keepalive even when nothing is animating. Sends are non-blocking;
//! a datagram that cannot leave right now is dropped, the next tick is
//! 20 ms away.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use uuid::Uuid;

use crate::error::{ServerError, ServerResult};
use crate::model::UniverseId;
use crate::protocol_constants::{
    DMX_SEND_ERROR_LOG_INTERVAL, E131_DEFAULT_PRIORITY, E131_PORT, E131_SOURCE_NAME_LEN,
};

use super::packet::{build_packet, multicast_addr, source_name_field};
use super::universe::UniverseRegistry;

/// The UDP send seam.
///
/// Production sinks wrap real sockets; tests substitute a recording
/// sink. Sends must never block.
pub trait DatagramSink: Send + Sync {
    /// Attempts to send one datagram. Returns the number of bytes sent.
    fn try_send_to(&self, payload: &[u8], dest: SocketAddr) -> std::io::Result<usize>;
}

/// A non-blocking UDP socket suitable for multicast emission.
pub struct UdpSink {
    socket: tokio::net::UdpSocket,
}

impl UdpSink {
    /// Creates a sink bound to an ephemeral port, with multicast
    /// interface and TTL configured for the LAN.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(interface: Option<Ipv4Addr>) -> ServerResult<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(ServerError::internal)?;
        socket
            .set_nonblocking(true)
            .map_err(ServerError::internal)?;
        socket
            .set_multicast_ttl_v4(4)
            .map_err(ServerError::internal)?;
        if let Some(iface) = interface {
            socket
                .set_multicast_if_v4(&iface)
                .map_err(ServerError::internal)?;
        }
        socket
            .bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())
            .map_err(ServerError::internal)?;

        let socket =
            tokio::net::UdpSocket::from_std(socket.into()).map_err(ServerError::internal)?;
        Ok(Self { socket })
    }
}

impl DatagramSink for UdpSink {
    fn try_send_to(&self, payload: &[u8], dest: SocketAddr) -> std::io::Result<usize> {
        self.socket.try_send_to(payload, dest)
    }
}

/// Emits E1.31 packets for every universe, every tick.
pub struct DmxTransport {
    cid: [u8; 16],
    source_name: [u8; E131_SOURCE_NAME_LEN],
    priority: u8,
    sink: Box<dyn DatagramSink>,
    /// Universes delivered by unicast instead of their multicast group.
    unicast_bindings: HashMap<UniverseId, IpAddr>,
    packets_sent: u64,
    send_failures: u64,
}

impl DmxTransport {
    pub fn new(
        cid: Uuid,
        source_name: &str,
        unicast_bindings: HashMap<UniverseId, IpAddr>,
        sink: Box<dyn DatagramSink>,
    ) -> Self {
        log::info!("DMX transport up, CID {}", cid);
        Self {
            cid: *cid.as_bytes(),
            source_name: source_name_field(source_name),
            priority: E131_DEFAULT_PRIORITY,
            sink,
            unicast_bindings,
            packets_sent: 0,
            send_failures: 0,
        }
    }

    /// Destination for a universe: its explicit unicast binding when
    /// configured, otherwise the derived multicast group.
    fn dest_for(&self, universe: UniverseId) -> SocketAddr {
        match self.unicast_bindings.get(&universe) {
            Some(host) => SocketAddr::new(*host, E131_PORT),
            None => multicast_addr(universe as u16),
        }
    }

    /// Composes and emits this tick's packet for every universe.
    pub fn flush(&mut self, universes: &UniverseRegistry) {
        for universe in universes.all() {
            let (slots, sequence) = universe.compose();
            let packet = build_packet(
                &self.cid,
                &self.source_name,
                universe.id() as u16,
                self.priority,
                sequence,
                &slots,
            );
            let dest = self.dest_for(universe.id());
            match self.sink.try_send_to(&packet, dest) {
                Ok(_) => self.packets_sent += 1,
                Err(e) => {
                    self.send_failures += 1;
                    // Rate-limited: a dead interface would otherwise log
                    // 50 lines per second per universe.
                    if self.send_failures % DMX_SEND_ERROR_LOG_INTERVAL == 1 {
                        log::error!(
                            "DMX send to {} failed ({} failures so far): {}",
                            dest,
                            self.send_failures,
                            e
                        );
                    }
                }
            }
        }
    }

    /// Total packets handed to the sink since startup.
    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    /// Total failed sends since startup.
    pub fn send_failures(&self) -> u64 {
        self.send_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmx::universe::WriteLayer;
    use crate::protocol_constants::E131_PACKET_LEN;
    use crate::test_support::RecordingSink;

    fn test_transport(sink: RecordingSink) -> DmxTransport {
        DmxTransport::new(
            Uuid::from_bytes([0x42; 16]),
            "unit test",
            HashMap::new(),
            Box::new(sink),
        )
    }

    #[test]
    fn flush_emits_one_packet_per_universe() {
        let sink = RecordingSink::new();
        let sent = sink.sent();
        let mut transport = test_transport(sink);

        let universes = UniverseRegistry::new();
        universes.get_or_create(3).unwrap();
        universes.get_or_create(9).unwrap();

        transport.flush(&universes);

        let packets = sent.lock();
        assert_eq!(packets.len(), 2);
        assert!(packets.iter().all(|(_, p)| p.len() == E131_PACKET_LEN));
        assert_eq!(transport.packets_sent(), 2);
    }

    #[test]
    fn untouched_universes_still_emit_keepalive() {
        let sink = RecordingSink::new();
        let sent = sink.sent();
        let mut transport = test_transport(sink);

        let universes = UniverseRegistry::new();
        universes.get_or_create(9).unwrap();

        // Three ticks, no writes. Sequence must advance each time.
        for _ in 0..3 {
            transport.flush(&universes);
        }

        let packets = sent.lock();
        assert_eq!(packets.len(), 3);
        let seqs: Vec<u8> = packets.iter().map(|(_, p)| p[111]).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        // All-zero slots on an untouched universe.
        assert!(packets[0].1[125..].iter().all(|&b| b == 0));
    }

    #[test]
    fn written_values_appear_in_emitted_packet() {
        let sink = RecordingSink::new();
        let sent = sink.sent();
        let mut transport = test_transport(sink);

        let universes = UniverseRegistry::new();
        let u = universes.get_or_create(7).unwrap();
        u.write(WriteLayer::Animation, 1, &[0x10, 0x20]).unwrap();

        transport.flush(&universes);

        let packets = sent.lock();
        let (dest, packet) = &packets[0];
        assert_eq!(*dest, "239.255.0.7:5568".parse().unwrap());
        assert_eq!(packet[126], 0x10);
        assert_eq!(packet[127], 0x20);
    }

    #[test]
    fn unicast_binding_overrides_multicast() {
        let sink = RecordingSink::new();
        let sent = sink.sent();
        let mut bindings = HashMap::new();
        bindings.insert(5u32, "10.3.2.1".parse::<IpAddr>().unwrap());
        let mut transport = DmxTransport::new(
            Uuid::from_bytes([0x42; 16]),
            "unit test",
            bindings,
            Box::new(sink),
        );

        let universes = UniverseRegistry::new();
        universes.get_or_create(5).unwrap();
        transport.flush(&universes);

        let packets = sent.lock();
        assert_eq!(packets[0].0, "10.3.2.1:5568".parse().unwrap());
    }

    #[test]
    fn send_failures_are_counted_not_fatal() {
        let sink = RecordingSink::failing();
        let mut transport = test_transport(sink);

        let universes = UniverseRegistry::new();
        universes.get_or_create(1).unwrap();

        transport.flush(&universes);
        transport.flush(&universes);

        assert_eq!(transport.send_failures(), 2);
        assert_eq!(transport.packets_sent(), 0);
    }
}
