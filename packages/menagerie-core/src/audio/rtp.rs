//! RTP audio emission, phase-locked to the tick clock.
//!
//! Each tick, playback hands the transport one Opus frame per audio
//! channel; the transport queues them and the event loop flushes the
//! whole tick's worth in one go. Every datagram starts with a fixed
//! 16-byte header (all integer fields little-endian, matching the
//! packed struct the creatures' firmware reads):
//!
//! ```text
//! { u32 timestamp; u32 sample_count; u32 sample_rate;
//!   u8 channel_count; u8 reserved[3] }
//! ```
//!
//! Timestamps advance by exactly 960 per tick (20 ms at 48 kHz); the
//! per-endpoint sequence is transport state and increments once per
//! datagram.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};

use bytes::{BufMut, BytesMut};
use dashmap::DashMap;
use socket2::{Domain, Protocol, Socket, Type};

use crate::dmx::DatagramSink;
use crate::protocol_constants::{
    OPUS_FRAME_SAMPLES, OPUS_SAMPLE_RATE, RTP_CHANNEL_COUNT, RTP_HEADER_LEN, RTP_MAX_PAYLOAD,
};
use crate::state::AudioMode;

/// The fixed multi-channel audio header preceding every Opus payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub timestamp: u32,
    pub sample_count: u32,
    pub sample_rate: u32,
    pub channel_count: u8,
}

impl RtpHeader {
    /// Header for one tick's frame at the given RTP timestamp.
    pub fn for_tick(timestamp: u32) -> Self {
        Self {
            timestamp,
            sample_count: OPUS_FRAME_SAMPLES as u32,
            sample_rate: OPUS_SAMPLE_RATE,
            channel_count: RTP_CHANNEL_COUNT,
        }
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.timestamp);
        buf.put_u32_le(self.sample_count);
        buf.put_u32_le(self.sample_rate);
        buf.put_u8(self.channel_count);
        buf.put_bytes(0, 3);
    }

    /// Parses a header from the front of a datagram.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < RTP_HEADER_LEN {
            return None;
        }
        Some(Self {
            timestamp: u32::from_le_bytes(data[0..4].try_into().ok()?),
            sample_count: u32::from_le_bytes(data[4..8].try_into().ok()?),
            sample_rate: u32::from_le_bytes(data[8..12].try_into().ok()?),
            channel_count: data[12],
        })
    }
}

/// One socket per creature audio endpoint, created on first use.
///
/// Implements [`DatagramSink`] so the transport (and tests) stay
/// ignorant of socket management.
pub struct UdpEndpointPool {
    sockets: DashMap<SocketAddr, tokio::net::UdpSocket>,
    interface: Option<Ipv4Addr>,
}

impl UdpEndpointPool {
    pub fn new(interface: Option<Ipv4Addr>) -> Self {
        Self {
            sockets: DashMap::new(),
            interface,
        }
    }

    fn open_socket(&self, dest: &SocketAddr) -> std::io::Result<tokio::net::UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        if dest.ip().is_multicast() {
            socket.set_multicast_ttl_v4(4)?;
            if let Some(iface) = self.interface {
                socket.set_multicast_if_v4(&iface)?;
            }
        }
        socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())?;
        tokio::net::UdpSocket::from_std(socket.into())
    }
}

impl DatagramSink for UdpEndpointPool {
    fn try_send_to(&self, payload: &[u8], dest: SocketAddr) -> std::io::Result<usize> {
        let socket = match self.sockets.entry(dest) {
            dashmap::mapref::entry::Entry::Occupied(entry) => entry.into_ref(),
            dashmap::mapref::entry::Entry::Vacant(entry) => entry.insert(self.open_socket(&dest)?),
        };
        socket.try_send_to(payload, dest)
    }
}

struct QueuedFrame {
    dest: SocketAddr,
    timestamp: u32,
    payload: Vec<u8>,
}

/// Queues one tick's Opus frames and flushes them as RTP datagrams.
pub struct RtpTransport {
    mode: AudioMode,
    fragment_packets: bool,
    multicast_group: SocketAddr,
    sink: Box<dyn DatagramSink>,
    sequences: HashMap<SocketAddr, u16>,
    queue: Vec<QueuedFrame>,
    packets_sent: u64,
    send_failures: u64,
}

impl RtpTransport {
    pub fn new(
        mode: AudioMode,
        fragment_packets: bool,
        multicast_group: SocketAddr,
        sink: Box<dyn DatagramSink>,
    ) -> Self {
        Self {
            mode,
            fragment_packets,
            multicast_group,
            sink,
            sequences: HashMap::new(),
            queue: Vec::new(),
            packets_sent: 0,
            send_failures: 0,
        }
    }

    /// Queues the channel-0 downmix frame for this tick.
    pub fn queue_downmix(&mut self, timestamp: u32, payload: &[u8]) {
        if self.mode == AudioMode::None {
            return;
        }
        self.queue.push(QueuedFrame {
            dest: self.multicast_group,
            timestamp,
            payload: payload.to_vec(),
        });
    }

    /// Queues one creature stem frame for this tick.
    pub fn queue_stem(&mut self, dest: SocketAddr, timestamp: u32, payload: &[u8]) {
        let dest = match self.mode {
            AudioMode::None => return,
            AudioMode::RtpMulticast => self.multicast_group,
            AudioMode::RtpUnicast => dest,
        };
        self.queue.push(QueuedFrame {
            dest,
            timestamp,
            payload: payload.to_vec(),
        });
    }

    /// Sends everything queued for this tick. Returns the number of
    /// datagrams emitted.
    pub fn flush(&mut self) -> usize {
        let frames = std::mem::take(&mut self.queue);
        let mut emitted = 0;
        for frame in frames {
            emitted += self.send_frame(&frame);
        }
        emitted
    }

    fn send_frame(&mut self, frame: &QueuedFrame) -> usize {
        let chunks: Vec<&[u8]> = if self.fragment_packets && frame.payload.len() > RTP_MAX_PAYLOAD
        {
            frame.payload.chunks(RTP_MAX_PAYLOAD).collect()
        } else {
            vec![frame.payload.as_slice()]
        };

        let mut emitted = 0;
        for chunk in chunks {
            let mut datagram = BytesMut::with_capacity(RTP_HEADER_LEN + chunk.len());
            RtpHeader::for_tick(frame.timestamp).write_to(&mut datagram);
            datagram.put_slice(chunk);

            let sequence = self.sequences.entry(frame.dest).or_insert(0);
            *sequence = sequence.wrapping_add(1);

            match self.sink.try_send_to(&datagram, frame.dest) {
                Ok(_) => {
                    self.packets_sent += 1;
                    emitted += 1;
                }
                Err(e) => {
                    self.send_failures += 1;
                    if self.send_failures % 100 == 1 {
                        log::error!(
                            "RTP send to {} failed ({} failures so far): {}",
                            frame.dest,
                            self.send_failures,
                            e
                        );
                    }
                }
            }
        }
        emitted
    }

    /// Per-endpoint datagram sequence (wrapping), for diagnostics and
    /// tests. Zero for an endpoint never sent to.
    pub fn sequence_for(&self, dest: &SocketAddr) -> u16 {
        self.sequences.get(dest).copied().unwrap_or(0)
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSink;

    const GROUP: &str = "239.19.63.17:5004";

    fn transport(mode: AudioMode, fragment: bool) -> (RtpTransport, crate::test_support::Sent) {
        let sink = RecordingSink::new();
        let sent = sink.sent();
        (
            RtpTransport::new(mode, fragment, GROUP.parse().unwrap(), Box::new(sink)),
            sent,
        )
    }

    #[test]
    fn header_layout_is_sixteen_bytes_little_endian() {
        let mut buf = BytesMut::new();
        RtpHeader::for_tick(0x0102_0304).write_to(&mut buf);

        assert_eq!(buf.len(), RTP_HEADER_LEN);
        assert_eq!(&buf[0..4], &[0x04, 0x03, 0x02, 0x01], "timestamp LE");
        assert_eq!(&buf[4..8], &960u32.to_le_bytes(), "sample count");
        assert_eq!(&buf[8..12], &48_000u32.to_le_bytes(), "sample rate");
        assert_eq!(buf[12], 17, "channel count");
        assert_eq!(&buf[13..16], &[0, 0, 0], "reserved");
    }

    #[test]
    fn header_parse_round_trips() {
        let header = RtpHeader::for_tick(12_345);
        let mut buf = BytesMut::new();
        header.write_to(&mut buf);
        assert_eq!(RtpHeader::parse(&buf), Some(header));
        assert_eq!(RtpHeader::parse(&buf[..10]), None);
    }

    #[test]
    fn downmix_goes_to_multicast_group() {
        let (mut rtp, sent) = transport(AudioMode::RtpUnicast, false);
        rtp.queue_downmix(960, &[0xAB; 40]);
        assert_eq!(rtp.flush(), 1);

        let packets = sent.lock();
        assert_eq!(packets[0].0, GROUP.parse().unwrap());
        assert_eq!(packets[0].1.len(), RTP_HEADER_LEN + 40);
    }

    #[test]
    fn stems_go_to_their_endpoints_in_unicast_mode() {
        let (mut rtp, sent) = transport(AudioMode::RtpUnicast, false);
        let dest: SocketAddr = "10.3.2.40:5004".parse().unwrap();
        rtp.queue_stem(dest, 0, &[1, 2, 3]);
        rtp.flush();

        assert_eq!(sent.lock()[0].0, dest);
    }

    #[test]
    fn multicast_mode_redirects_stems_to_group() {
        let (mut rtp, sent) = transport(AudioMode::RtpMulticast, false);
        rtp.queue_stem("10.3.2.40:5004".parse().unwrap(), 0, &[1]);
        rtp.flush();

        assert_eq!(sent.lock()[0].0, GROUP.parse().unwrap());
    }

    #[test]
    fn mode_none_drops_everything() {
        let (mut rtp, sent) = transport(AudioMode::None, false);
        rtp.queue_downmix(0, &[1]);
        rtp.queue_stem("10.3.2.40:5004".parse().unwrap(), 0, &[1]);
        assert_eq!(rtp.flush(), 0);
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn sequence_increments_per_packet_per_endpoint() {
        let (mut rtp, _sent) = transport(AudioMode::RtpUnicast, false);
        let a: SocketAddr = "10.3.2.40:5004".parse().unwrap();
        let b: SocketAddr = "10.3.2.41:5004".parse().unwrap();

        for _ in 0..3 {
            rtp.queue_stem(a, 0, &[1]);
        }
        rtp.queue_stem(b, 0, &[1]);
        rtp.flush();

        assert_eq!(rtp.sequence_for(&a), 3);
        assert_eq!(rtp.sequence_for(&b), 1);
    }

    #[test]
    fn oversized_payload_fragments_when_enabled() {
        let (mut rtp, sent) = transport(AudioMode::RtpUnicast, true);
        let dest: SocketAddr = "10.3.2.40:5004".parse().unwrap();
        rtp.queue_stem(dest, 960, &vec![7u8; RTP_MAX_PAYLOAD * 2 + 10]);
        assert_eq!(rtp.flush(), 3);

        let packets = sent.lock();
        assert_eq!(packets.len(), 3);
        // Every fragment carries the same header timestamp.
        for (_, datagram) in packets.iter() {
            assert_eq!(RtpHeader::parse(datagram).unwrap().timestamp, 960);
        }
        assert_eq!(packets[2].1.len(), RTP_HEADER_LEN + 10);
        assert_eq!(rtp.sequence_for(&dest), 3);
    }

    #[test]
    fn oversized_payload_sent_whole_when_fragmentation_disabled() {
        let (mut rtp, sent) = transport(AudioMode::RtpUnicast, false);
        let dest: SocketAddr = "10.3.2.40:5004".parse().unwrap();
        rtp.queue_stem(dest, 0, &vec![7u8; RTP_MAX_PAYLOAD * 2]);
        assert_eq!(rtp.flush(), 1);
        assert_eq!(sent.lock()[0].1.len(), RTP_HEADER_LEN + RTP_MAX_PAYLOAD * 2);
    }

    #[test]
    fn flush_clears_the_queue() {
        let (mut rtp, sent) = transport(AudioMode::RtpUnicast, false);
        rtp.queue_downmix(0, &[1]);
        rtp.flush();
        assert_eq!(rtp.flush(), 0, "second flush has nothing to send");
        assert_eq!(sent.lock().len(), 1);
    }
}
