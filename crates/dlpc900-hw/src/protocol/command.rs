//! Command frame construction and packet splitting.
//!
//! Frame structure:
//! - Flag byte: bit 7 set for reads, bit 6 set to request a reply
//! - Sequence byte
//! - Length (payload + 2), 16 bits, low byte first
//! - Command bytes: com2, then com1
//! - Payload

use super::Opcode;
use crate::bits::{pack, BitString};
use crate::Result;

/// Frame header size.
pub const HEADER_SIZE: usize = 6;

/// Data bytes per USB packet, excluding any report id.
pub const BASE_CHUNK_SIZE: usize = 64;

/// Fixed low bits of the flag byte (reply requested).
const FLAG_LOW_BITS: u64 = 0b100_0000;

/// Command direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

fn flag_byte(direction: Direction) -> Result<u8> {
    let mut bits = BitString::new();
    bits.push_bit(direction == Direction::Read)
        .push_field(FLAG_LOW_BITS, 7)?;
    Ok(bits.to_bytes()[0])
}

/// Builds a complete command frame.
pub fn build_command(
    direction: Direction,
    sequence: u8,
    opcode: Opcode,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let length = pack(payload.len() as u64 + 2, 16)?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.push(flag_byte(direction)?);
    frame.push(sequence);
    frame.extend_from_slice(&length);
    frame.push(opcode.com2());
    frame.push(opcode.com1());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Splits a frame into zero-padded transport packets of `capacity` bytes.
///
/// The first packet carries the header and as much payload as fits, the
/// rest follow in equal chunks. When `report_id` is set (HID), every
/// packet is prefixed with it and the prefix counts against `capacity`.
pub fn packetize(frame: &[u8], report_id: Option<u8>, capacity: usize) -> Vec<Vec<u8>> {
    let prefix = report_id.map_or(0, |_| 1);
    let data = capacity.saturating_sub(prefix).max(1);
    let chunks = frame.len().div_ceil(data).max(1);

    (0..chunks)
        .map(|i| {
            let start = (i * data).min(frame.len());
            let end = (start + data).min(frame.len());
            let mut packet = Vec::with_capacity(prefix + data);
            packet.extend(report_id);
            packet.extend_from_slice(&frame[start..end]);
            packet.resize(prefix + data, 0x00);
            packet
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_flag_byte() {
        assert_eq!(flag_byte(Direction::Read).unwrap(), 0xC0);
        assert_eq!(flag_byte(Direction::Write).unwrap(), 0x40);
    }

    #[test]
    fn test_build_command() {
        let frame = build_command(Direction::Write, 0x00, Opcode::PatternStartStop, &[0x02]).unwrap();
        assert_eq!(frame, vec![0x40, 0x00, 0x03, 0x00, 0x24, 0x1A, 0x02]);

        let frame = build_command(Direction::Read, 0x22, Opcode::ErrorCode, &[]).unwrap();
        assert_eq!(frame, vec![0xC0, 0x22, 0x02, 0x00, 0x00, 0x01]);

        let payload = vec![0u8; 300];
        let frame = build_command(Direction::Write, 0x11, Opcode::PatternBmpLoad, &payload).unwrap();
        assert_eq!(&frame[2..4], &[0x2E, 0x01]);
    }

    #[test]
    fn test_oversized_payload() {
        let payload = vec![0u8; 0xFFFE];
        assert!(matches!(
            build_command(Direction::Write, 0, Opcode::PatternBmpLoad, &payload),
            Err(Error::FieldOverflow { width: 16, .. })
        ));
    }

    #[test]
    fn test_single_packet() {
        let frame = build_command(Direction::Write, 0x00, Opcode::IdleMode, &[0x01]).unwrap();

        let packets = packetize(&frame, None, BASE_CHUNK_SIZE);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), 64);
        assert_eq!(&packets[0][..7], &frame[..]);
        assert!(packets[0][7..].iter().all(|&b| b == 0));

        let packets = packetize(&frame, Some(0x00), BASE_CHUNK_SIZE + 1);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), 65);
        assert_eq!(packets[0][0], 0x00);
        assert_eq!(&packets[0][1..8], &frame[..]);
    }

    #[test]
    fn test_exact_fit() {
        let payload = vec![0xAB; 58];
        let frame = build_command(Direction::Write, 0x11, Opcode::PatternBmpLoad, &payload).unwrap();
        assert_eq!(packetize(&frame, None, BASE_CHUNK_SIZE).len(), 1);

        let payload = vec![0xAB; 59];
        let frame = build_command(Direction::Write, 0x11, Opcode::PatternBmpLoad, &payload).unwrap();
        assert_eq!(packetize(&frame, None, BASE_CHUNK_SIZE).len(), 2);
    }

    #[test]
    fn test_multi_packet_split() {
        // 2-byte length prefix + 504 bytes, as sent for a full bitmap chunk
        let payload: Vec<u8> = (0..506).map(|i| (i % 251) as u8 + 1).collect();
        let frame = build_command(Direction::Write, 0x11, Opcode::PatternBmpLoad, &payload).unwrap();

        for report_id in [None, Some(0x00)] {
            let capacity = BASE_CHUNK_SIZE + report_id.map_or(0, |_| 1);
            let packets = packetize(&frame, report_id, capacity);
            assert_eq!(packets.len(), 8);
            assert!(packets.iter().all(|p| p.len() == capacity));

            let offset = capacity - BASE_CHUNK_SIZE;
            // First packet: header + 58 payload bytes
            assert_eq!(&packets[0][offset..offset + HEADER_SIZE], &frame[..HEADER_SIZE]);
            assert_eq!(packets[0][offset + HEADER_SIZE], payload[0]);
            assert_eq!(packets[1][offset], payload[58]);

            // 512 frame bytes fill exactly 8 chunks
            let rejoined: Vec<u8> = packets.iter().flat_map(|p| p[offset..].to_vec()).collect();
            assert_eq!(&rejoined[..frame.len()], &frame[..]);
        }
    }

    #[test]
    fn test_final_packet_padding() {
        let payload = vec![0xFF; 100];
        let frame = build_command(Direction::Write, 0x11, Opcode::PatternBmpLoad, &payload).unwrap();
        let packets = packetize(&frame, None, BASE_CHUNK_SIZE);
        assert_eq!(packets.len(), 2);
        // 106 frame bytes: 42 in the second packet, then zeros
        assert!(packets[1][..42].iter().all(|&b| b == 0xFF));
        assert!(packets[1][42..].iter().all(|&b| b == 0x00));
    }

    #[test]
    fn test_custom_capacity() {
        let payload = vec![0x5A; 60];
        let frame = build_command(Direction::Write, 0x11, Opcode::PatternBmpLoad, &payload).unwrap();

        // 66 frame bytes at 32 data bytes per packet
        let packets = packetize(&frame, Some(0x00), 33);
        assert_eq!(packets.len(), 3);
        assert!(packets.iter().all(|p| p.len() == 33 && p[0] == 0x00));
        assert_eq!(&packets[0][1..], &frame[..32]);
        assert_eq!(&packets[2][1..3], &frame[64..]);
        assert!(packets[2][3..].iter().all(|&b| b == 0x00));
    }
}
