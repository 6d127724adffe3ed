//! Reassembly of datagram image streams.
//!
//! Packets may arrive in any order and more than once. The assembler keeps
//! one slot per packet and tracks the contiguous prefix, which is the only
//! part of the stream a decoder can use.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::decode::ImageCodec;
use crate::transport::{FIRST_PACKET_SIZE, MAX_IMG_PACKET_SIZE};

/// Reasons a header or packet is rejected as a bad packet.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("header declares {packet_count} packets for {total_bytes} bytes")]
    InconsistentHeader { packet_count: u16, total_bytes: usize },

    #[error("header chunk is {actual} bytes, expected {expected}")]
    BadHeaderChunk { expected: usize, actual: usize },

    #[error("packet {packet} out of range (image has {packet_count} packets)")]
    OutOfRange { packet: u16, packet_count: u16 },

    #[error("packet {packet} is {actual} bytes, expected {expected}")]
    BadPacketSize {
        packet: u16,
        expected: usize,
        actual: usize,
    },
}

/// Number of packets (header included) a stream of `total_bytes` needs.
pub fn packet_count_for(total_bytes: usize) -> usize {
    if total_bytes <= FIRST_PACKET_SIZE {
        1
    } else {
        1 + (total_bytes - FIRST_PACKET_SIZE).div_ceil(MAX_IMG_PACKET_SIZE)
    }
}

/// Collects the packets of one image stream.
#[derive(Debug, Clone)]
pub struct PacketAssembler {
    codec: ImageCodec,
    total_bytes: usize,
    packets: Vec<Option<Bytes>>,
    received: usize,
    contiguous_packets: usize,
    contiguous_bytes: usize,
}

impl PacketAssembler {
    /// Start a stream from its header datagram.
    pub fn from_header(
        codec: ImageCodec,
        packet_count: u16,
        total_bytes: usize,
        first: Bytes,
    ) -> Result<Self, AssemblyError> {
        if total_bytes == 0 || packet_count as usize != packet_count_for(total_bytes) {
            return Err(AssemblyError::InconsistentHeader {
                packet_count,
                total_bytes,
            });
        }

        let expected = total_bytes.min(FIRST_PACKET_SIZE);
        if first.len() != expected {
            return Err(AssemblyError::BadHeaderChunk {
                expected,
                actual: first.len(),
            });
        }

        let mut packets = vec![None; packet_count as usize];
        let contiguous_bytes = first.len();
        packets[0] = Some(first);

        Ok(Self {
            codec,
            total_bytes,
            packets,
            received: 1,
            contiguous_packets: 1,
            contiguous_bytes,
        })
    }

    /// Byte length packet `packet` must have.
    pub fn expected_size(&self, packet: u16) -> usize {
        if packet == 0 {
            return self.total_bytes.min(FIRST_PACKET_SIZE);
        }
        let start = FIRST_PACKET_SIZE + (packet as usize - 1) * MAX_IMG_PACKET_SIZE;
        self.total_bytes.saturating_sub(start).min(MAX_IMG_PACKET_SIZE)
    }

    /// Store a numbered packet.
    ///
    /// Returns `Ok(false)` for a duplicate.
    pub fn insert(&mut self, packet: u16, data: Bytes) -> Result<bool, AssemblyError> {
        let packet_count = self.packet_count();
        if packet == 0 || packet >= packet_count {
            return Err(AssemblyError::OutOfRange {
                packet,
                packet_count,
            });
        }

        let expected = self.expected_size(packet);
        if data.len() != expected {
            return Err(AssemblyError::BadPacketSize {
                packet,
                expected,
                actual: data.len(),
            });
        }

        let slot = &mut self.packets[packet as usize];
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(data);
        self.received += 1;

        while let Some(Some(next)) = self.packets.get(self.contiguous_packets) {
            self.contiguous_bytes += next.len();
            self.contiguous_packets += 1;
        }
        Ok(true)
    }

    pub fn codec(&self) -> ImageCodec {
        self.codec
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn packet_count(&self) -> u16 {
        self.packets.len() as u16
    }

    pub fn received_packets(&self) -> usize {
        self.received
    }

    /// Length of the usable prefix.
    pub fn contiguous_bytes(&self) -> usize {
        self.contiguous_bytes
    }

    /// First packet not yet received, or `packet_count` when complete.
    pub fn next_missing_packet(&self) -> u16 {
        self.contiguous_packets as u16
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.packets.len()
    }

    /// Copy out the contiguous prefix.
    pub fn assembled(&self) -> Bytes {
        if self.contiguous_packets == 1 {
            return self.packets[0].clone().unwrap_or_default();
        }
        let mut out = BytesMut::with_capacity(self.contiguous_bytes);
        for chunk in self.packets[..self.contiguous_packets].iter().flatten() {
            out.extend_from_slice(chunk);
        }
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stream(total: usize) -> Vec<u8> {
        (0..total).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn chunks(data: &[u8]) -> Vec<Bytes> {
        let mut out = vec![Bytes::copy_from_slice(&data[..data.len().min(FIRST_PACKET_SIZE)])];
        if data.len() > FIRST_PACKET_SIZE {
            out.extend(
                data[FIRST_PACKET_SIZE..]
                    .chunks(MAX_IMG_PACKET_SIZE)
                    .map(Bytes::copy_from_slice),
            );
        }
        out
    }

    fn start(data: &[u8]) -> (PacketAssembler, Vec<Bytes>) {
        let parts = chunks(data);
        let assembler = PacketAssembler::from_header(
            ImageCodec::J2c,
            parts.len() as u16,
            data.len(),
            parts[0].clone(),
        )
        .unwrap();
        (assembler, parts)
    }

    #[test]
    fn test_packet_count_for() {
        assert_eq!(packet_count_for(1), 1);
        assert_eq!(packet_count_for(600), 1);
        assert_eq!(packet_count_for(601), 2);
        assert_eq!(packet_count_for(1600), 2);
        assert_eq!(packet_count_for(1601), 3);
    }

    #[test]
    fn test_single_packet_image_complete_from_header() {
        let data = stream(400);
        let (assembler, _) = start(&data);
        assert!(assembler.is_complete());
        assert_eq!(assembler.assembled(), Bytes::from(data));
    }

    #[test]
    fn test_in_order_assembly() {
        let data = stream(2100);
        let (mut assembler, parts) = start(&data);
        assert!(!assembler.is_complete());
        assert_eq!(assembler.contiguous_bytes(), 600);

        assert!(assembler.insert(1, parts[1].clone()).unwrap());
        assert_eq!(assembler.contiguous_bytes(), 1600);
        assert!(assembler.insert(2, parts[2].clone()).unwrap());

        assert!(assembler.is_complete());
        assert_eq!(assembler.next_missing_packet(), 3);
        assert_eq!(assembler.assembled(), Bytes::from(data));
    }

    #[test]
    fn test_gap_limits_prefix() {
        let data = stream(3600);
        let (mut assembler, parts) = start(&data);

        assembler.insert(2, parts[2].clone()).unwrap();
        assembler.insert(3, parts[3].clone()).unwrap();
        assert_eq!(assembler.contiguous_bytes(), 600);
        assert_eq!(assembler.next_missing_packet(), 1);

        assembler.insert(1, parts[1].clone()).unwrap();
        assert_eq!(assembler.contiguous_bytes(), 3600);
    }

    #[test]
    fn test_duplicate_ignored() {
        let data = stream(1600);
        let (mut assembler, parts) = start(&data);
        assert!(assembler.insert(1, parts[1].clone()).unwrap());
        assert!(!assembler.insert(1, parts[1].clone()).unwrap());
        assert_eq!(assembler.received_packets(), 2);
    }

    #[test]
    fn test_rejects_bad_packets() {
        let data = stream(2100);
        let (mut assembler, parts) = start(&data);

        assert!(matches!(
            assembler.insert(0, parts[0].clone()),
            Err(AssemblyError::OutOfRange { .. })
        ));
        assert!(matches!(
            assembler.insert(3, parts[2].clone()),
            Err(AssemblyError::OutOfRange { .. })
        ));
        assert!(matches!(
            assembler.insert(1, parts[2].clone()),
            Err(AssemblyError::BadPacketSize { packet: 1, .. })
        ));
    }

    #[test]
    fn test_rejects_inconsistent_header() {
        let data = stream(2100);
        let err = PacketAssembler::from_header(
            ImageCodec::J2c,
            5,
            data.len(),
            Bytes::copy_from_slice(&data[..600]),
        )
        .unwrap_err();
        assert!(matches!(err, AssemblyError::InconsistentHeader { .. }));

        let err = PacketAssembler::from_header(
            ImageCodec::J2c,
            3,
            data.len(),
            Bytes::copy_from_slice(&data[..500]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            AssemblyError::BadHeaderChunk {
                expected: 600,
                actual: 500
            }
        );
    }

    proptest! {
        #[test]
        fn prop_arrival_order_does_not_matter(
            total in 601usize..12_000,
            seed in any::<u64>(),
        ) {
            let data = stream(total);
            let (mut assembler, parts) = start(&data);

            let mut order: Vec<u16> = (1..parts.len() as u16).collect();
            // Deterministic shuffle from the seed.
            let mut state = seed | 1;
            for i in (1..order.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                order.swap(i, (state % (i as u64 + 1)) as usize);
            }

            for packet in order {
                assembler.insert(packet, parts[packet as usize].clone()).unwrap();
            }
            prop_assert!(assembler.is_complete());
            prop_assert_eq!(assembler.assembled(), Bytes::from(data));
        }
    }
}
