//! E1.31 (sACN) data packet construction.
//!
//! Builds the full root/framing/DMP layer stack for one universe. The
//! layout follows ANSI E1.31-2018; every length here is fixed because
//! we always ship a full 512-slot universe.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol_constants::{
    DMX_PROPERTY_COUNT, E131_PACKET_LEN, E131_PORT, E131_SOURCE_NAME_LEN,
};

/// ACN packet identifier, fixed by the E1.31 root layer.
const ACN_PACKET_IDENTIFIER: [u8; 12] = *b"ASC-E1.17\x00\x00\x00";

/// Root layer vector: E1.31 data.
const VECTOR_ROOT_E131_DATA: u32 = 0x0000_0004;

/// Framing layer vector: DMP wrapped data.
const VECTOR_E131_DATA_PACKET: u32 = 0x0000_0002;

/// DMP layer vector: set property.
const VECTOR_DMP_SET_PROPERTY: u8 = 0x02;

/// Flags nibble for the flags-and-length fields (always 0x7).
const FLAGS: u16 = 0x7 << 12;

/// Byte offsets of the three layers within the packet.
const ROOT_PDU_OFFSET: usize = 16;
const FRAMING_PDU_OFFSET: usize = 38;
const DMP_PDU_OFFSET: usize = 115;

/// NUL-pads a source name into the fixed 64-byte framing layer field.
///
/// Names longer than 63 bytes are truncated; the last byte is always
/// NUL.
pub fn source_name_field(name: &str) -> [u8; E131_SOURCE_NAME_LEN] {
    let mut field = [0u8; E131_SOURCE_NAME_LEN];
    let take = name.len().min(E131_SOURCE_NAME_LEN - 1);
    field[..take].copy_from_slice(&name.as_bytes()[..take]);
    field
}

/// Builds one complete E1.31 data packet.
///
/// `slots` is the full 513-byte property value block (START code at
/// index 0, already forced to zero by [`super::universe::Universe::compose`]).
pub fn build_packet(
    cid: &[u8; 16],
    source_name: &[u8; E131_SOURCE_NAME_LEN],
    universe: u16,
    priority: u8,
    sequence: u8,
    slots: &[u8; DMX_PROPERTY_COUNT],
) -> Bytes {
    let mut buf = BytesMut::with_capacity(E131_PACKET_LEN);

    // Root layer
    buf.put_u16(0x0010); // preamble size
    buf.put_u16(0x0000); // post-amble size
    buf.put_slice(&ACN_PACKET_IDENTIFIER);
    buf.put_u16(FLAGS | (E131_PACKET_LEN - ROOT_PDU_OFFSET) as u16);
    buf.put_u32(VECTOR_ROOT_E131_DATA);
    buf.put_slice(cid);

    // Framing layer
    buf.put_u16(FLAGS | (E131_PACKET_LEN - FRAMING_PDU_OFFSET) as u16);
    buf.put_u32(VECTOR_E131_DATA_PACKET);
    buf.put_slice(source_name);
    buf.put_u8(priority);
    buf.put_u16(0x0000); // synchronization address
    buf.put_u8(sequence);
    buf.put_u8(0x00); // options
    buf.put_u16(universe);

    // DMP layer
    buf.put_u16(FLAGS | (E131_PACKET_LEN - DMP_PDU_OFFSET) as u16);
    buf.put_u8(VECTOR_DMP_SET_PROPERTY);
    buf.put_u8(0xa1); // address type & data type
    buf.put_u16(0x0000); // first property address
    buf.put_u16(0x0001); // address increment
    buf.put_u16(DMX_PROPERTY_COUNT as u16);
    buf.put_slice(slots);

    debug_assert_eq!(buf.len(), E131_PACKET_LEN);
    buf.freeze()
}

/// Multicast destination for a universe, per the E1.31 address scheme:
/// `239.255.<hi>.<lo>` where hi/lo are the universe number bytes.
pub fn multicast_addr(universe: u16) -> SocketAddr {
    let [hi, lo] = universe.to_be_bytes();
    SocketAddr::V4(SocketAddrV4::new(
        Ipv4Addr::new(239, 255, hi, lo),
        E131_PORT,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_packet(sequence: u8, universe: u16) -> Bytes {
        let cid = [0x42u8; 16];
        let name = source_name_field("test source");
        let mut slots = [0u8; DMX_PROPERTY_COUNT];
        slots[1] = 0x10;
        slots[2] = 0x20;
        slots[512] = 0xFF;
        build_packet(&cid, &name, universe, 100, sequence, &slots)
    }

    #[test]
    fn packet_has_fixed_length() {
        assert_eq!(test_packet(0, 7).len(), E131_PACKET_LEN);
    }

    #[test]
    fn root_layer_fields() {
        let pkt = test_packet(0, 7);
        assert_eq!(&pkt[0..2], &[0x00, 0x10], "preamble size");
        assert_eq!(&pkt[2..4], &[0x00, 0x00], "post-amble size");
        assert_eq!(&pkt[4..16], b"ASC-E1.17\x00\x00\x00");
        // Flags and length: 0x7000 | 622
        assert_eq!(&pkt[16..18], &0x726Eu16.to_be_bytes());
        assert_eq!(&pkt[18..22], &[0x00, 0x00, 0x00, 0x04], "root vector");
        assert_eq!(&pkt[22..38], &[0x42u8; 16], "cid");
    }

    #[test]
    fn framing_layer_fields() {
        let pkt = test_packet(17, 263);
        assert_eq!(&pkt[38..40], &0x7258u16.to_be_bytes());
        assert_eq!(&pkt[40..44], &[0x00, 0x00, 0x00, 0x02], "framing vector");
        assert_eq!(&pkt[44..55], b"test source");
        assert!(pkt[55..108].iter().all(|&b| b == 0), "name NUL padding");
        assert_eq!(pkt[108], 100, "priority");
        assert_eq!(pkt[111], 17, "sequence");
        assert_eq!(pkt[112], 0, "options");
        assert_eq!(&pkt[113..115], &263u16.to_be_bytes(), "universe");
    }

    #[test]
    fn dmp_layer_fields() {
        let pkt = test_packet(0, 7);
        assert_eq!(&pkt[115..117], &0x720Bu16.to_be_bytes());
        assert_eq!(pkt[117], 0x02, "dmp vector");
        assert_eq!(pkt[118], 0xa1, "address/data type");
        assert_eq!(&pkt[123..125], &513u16.to_be_bytes(), "property count");
        assert_eq!(pkt[125], 0x00, "start code");
        assert_eq!(pkt[126], 0x10, "slot 1");
        assert_eq!(pkt[127], 0x20, "slot 2");
        assert_eq!(pkt[125 + 512], 0xFF, "slot 512");
    }

    #[test]
    fn source_name_truncates_to_63_bytes() {
        let field = source_name_field(&"x".repeat(100));
        assert_eq!(field[62], b'x');
        assert_eq!(field[63], 0, "last byte is always NUL");
    }

    #[test]
    fn multicast_addr_derives_from_universe() {
        assert_eq!(
            multicast_addr(1),
            "239.255.0.1:5568".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            multicast_addr(263),
            "239.255.1.7:5568".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            multicast_addr(63999),
            "239.255.249.255:5568".parse::<SocketAddr>().unwrap()
        );
    }
}
