//! In-memory transport recording traffic for tests.

use super::{StatusStyle, Transport};
use crate::TransportError;
use std::collections::VecDeque;
use std::time::Duration;

/// A command reassembled from written packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Recorded {
    pub flag: u8,
    pub sequence: u8,
    pub opcode: u16,
    pub payload: Vec<u8>,
}

pub(crate) struct MockTransport {
    pub packets: Vec<Vec<u8>>,
    pub reads: Vec<usize>,
    pub replies: VecDeque<Result<Vec<u8>, TransportError>>,
    report_id: Option<u8>,
    style: StatusStyle,
}

impl MockTransport {
    pub fn hid() -> Self {
        Self::with_binding(Some(0x00), StatusStyle::ErrorFlag)
    }

    pub fn bulk() -> Self {
        Self::with_binding(None, StatusStyle::StatusByte(6))
    }

    fn with_binding(report_id: Option<u8>, style: StatusStyle) -> Self {
        Self {
            packets: Vec::new(),
            reads: Vec::new(),
            replies: VecDeque::new(),
            report_id,
            style,
        }
    }

    /// Reassembles the written packets into commands.
    pub fn commands(&self) -> Vec<Recorded> {
        let offset = self.report_id.map_or(0, |_| 1);
        let mut commands = Vec::new();
        let mut packets = self.packets.iter().map(|p| &p[offset..]);

        while let Some(first) = packets.next() {
            let length = u16::from_le_bytes([first[2], first[3]]) as usize;
            let total = 4 + length;
            let mut frame = first.to_vec();
            while frame.len() < total {
                frame.extend_from_slice(packets.next().expect("truncated command"));
            }
            frame.truncate(total);
            commands.push(Recorded {
                flag: frame[0],
                sequence: frame[1],
                opcode: u16::from_be_bytes([frame[5], frame[4]]),
                payload: frame[6..].to_vec(),
            });
        }
        assert!(self.packets.iter().all(|p| p.len() == self.packet_capacity()));
        commands
    }
}

impl Transport for MockTransport {
    fn write_packet(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        self.packets.push(packet.to_vec());
        Ok(())
    }

    fn read_packet(
        &mut self,
        max_len: usize,
        _timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.reads.push(max_len);
        self.replies
            .pop_front()
            .unwrap_or_else(|| Ok(vec![0x40, 0x00, 0x00, 0x00]))
    }

    fn report_id(&self) -> Option<u8> {
        self.report_id
    }

    fn status_style(&self) -> StatusStyle {
        self.style
    }
}
