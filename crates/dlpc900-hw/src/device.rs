//! DMD controller command interface.

use crate::protocol::{
    bmp_chunks, build_command, packetize, set_bmp_payload, Direction, DisplayMode, LutConfig,
    Opcode, PatternDefinition, PowerMode, SequenceState, TriggerOut, SEQ_BITMAP, SEQ_CONTROL,
    SEQ_DIAGNOSTIC, SEQ_TEST_READ,
};
use crate::transport::{HidTransport, Transport, REPLY_DATA_OFFSET};
use crate::{Error, ProtocolError, Result, TransportError, DMD_PID, DMD_VID};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for every reply read.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Size of a regular reply packet.
const REPLY_SIZE: usize = 64;

/// Size of the error description reply.
const DESCRIPTION_SIZE: usize = 128;

/// Payload of the loopback test write.
const TEST_PATTERN: [u8; 6] = [0xFF, 0x01, 0xFF, 0x01, 0xFF, 0x01];

struct Link<T> {
    transport: T,
    last_error: Option<ProtocolError>,
}

/// DMD controller.
///
/// Commands are strictly request/response: the transport stays locked from
/// the first packet of a command until its reply (and any diagnostics) have
/// been read.
pub struct DmdDevice<T: Transport = Box<dyn Transport>> {
    link: Mutex<Link<T>>,
    timeout: Duration,
}

impl DmdDevice<HidTransport> {
    /// Opens the controller over HID by its default VID:PID.
    pub fn open() -> Result<Self> {
        Ok(Self::new(HidTransport::open(DMD_VID, DMD_PID)?))
    }
}

impl<T: Transport> DmdDevice<T> {
    /// Wraps an open transport.
    pub fn new(transport: T) -> Self {
        Self {
            link: Mutex::new(Link {
                transport,
                last_error: None,
            }),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the reply timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the most recent error reported by the controller.
    pub fn last_protocol_error(&self) -> Option<ProtocolError> {
        self.link.lock().ok().and_then(|link| link.last_error.clone())
    }

    /// Releases the transport.
    pub fn into_transport(self) -> T {
        match self.link.into_inner() {
            Ok(link) => link.transport,
            Err(poisoned) => poisoned.into_inner().transport,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Link<T>>> {
        self.link
            .lock()
            .map_err(|_| Error::Transport(TransportError::Poisoned))
    }

    /// Sends one command and checks its reply.
    ///
    /// Error replies are logged and recorded but do not fail the call.
    pub fn command(
        &self,
        direction: Direction,
        sequence: u8,
        opcode: Opcode,
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        let frame = build_command(direction, sequence, opcode, payload)?;
        let mut link = self.lock()?;
        self.exchange(&mut link, sequence, opcode, &frame)
    }

    fn exchange(
        &self,
        link: &mut Link<T>,
        sequence: u8,
        opcode: Opcode,
        frame: &[u8],
    ) -> Result<Vec<u8>> {
        let reply = self.transfer(&mut link.transport, sequence, opcode, frame, REPLY_SIZE)?;

        if link.transport.status_style().is_error(&reply) {
            let error = self.diagnose(&mut link.transport, sequence, opcode, &reply);
            warn!("{}", error);
            link.last_error = Some(error);
        }
        Ok(reply)
    }

    /// Writes a frame and reads one reply, without status interpretation.
    fn transfer(
        &self,
        transport: &mut T,
        sequence: u8,
        opcode: Opcode,
        frame: &[u8],
        reply_size: usize,
    ) -> Result<Vec<u8>> {
        let context = |source| Error::Command {
            opcode,
            sequence,
            source,
        };

        let packets = packetize(frame, transport.report_id(), transport.packet_capacity());
        for packet in &packets {
            transport.write_packet(packet).map_err(context)?;
        }
        debug!(
            "Sent {} ({} bytes, {} packets)",
            opcode,
            frame.len(),
            packets.len()
        );

        transport.read_packet(reply_size, self.timeout).map_err(context)
    }

    /// Sends one diagnostic read and returns its reply.
    fn query(&self, transport: &mut T, opcode: Opcode, reply_size: usize) -> Result<Vec<u8>> {
        let frame = build_command(Direction::Read, SEQ_DIAGNOSTIC, opcode, &[])?;
        self.transfer(transport, SEQ_DIAGNOSTIC, opcode, &frame, reply_size)
    }

    /// Reads the error code and description after an error reply.
    ///
    /// A failed diagnostic read leaves the code and description empty.
    fn diagnose(
        &self,
        transport: &mut T,
        sequence: u8,
        opcode: Opcode,
        reply: &[u8],
    ) -> ProtocolError {
        let mut error = ProtocolError {
            opcode,
            sequence,
            flags: reply.first().copied().unwrap_or(0),
            code: 0,
            description: String::new(),
        };

        let code = match self.query(transport, Opcode::ErrorCode, REPLY_SIZE) {
            Ok(code) => code,
            Err(e) => {
                warn!("Reading error code after {} failed: {}", opcode, e);
                return error;
            }
        };
        error.code = code.get(REPLY_DATA_OFFSET).copied().unwrap_or(0);

        match self.query(transport, Opcode::ErrorDescription, DESCRIPTION_SIZE) {
            Ok(description) => error.description = reply_text(&description),
            Err(e) => warn!("Reading error description after {} failed: {}", opcode, e),
        }
        error
    }

    fn write(&self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        self.command(Direction::Write, SEQ_CONTROL, opcode, payload)?;
        Ok(())
    }

    /// Enables idle mode.
    pub fn idle_on(&self) -> Result<()> {
        self.write(Opcode::IdleMode, &[0x01])?;
        info!("Idle mode on");
        Ok(())
    }

    /// Disables idle mode.
    pub fn idle_off(&self) -> Result<()> {
        self.write(Opcode::IdleMode, &[0x00])?;
        info!("Idle mode off");
        Ok(())
    }

    /// Sets the power state.
    pub fn set_power(&self, mode: PowerMode) -> Result<()> {
        self.write(Opcode::PowerControl, &[mode as u8])?;
        info!("Power mode set to {:?}", mode);
        Ok(())
    }

    /// Puts the controller in standby.
    pub fn standby(&self) -> Result<()> {
        self.set_power(PowerMode::Standby)
    }

    /// Wakes the controller from standby.
    pub fn wakeup(&self) -> Result<()> {
        self.set_power(PowerMode::Normal)
    }

    /// Performs a software reset.
    pub fn reset(&self) -> Result<()> {
        self.set_power(PowerMode::Reset)
    }

    /// Selects the display mode.
    pub fn change_mode(&self, mode: DisplayMode) -> Result<()> {
        self.write(Opcode::DisplayMode, &[mode as u8])?;
        info!("Display mode set to {}", mode);
        Ok(())
    }

    /// Starts, pauses or stops the pattern sequence.
    pub fn set_sequence_state(&self, state: SequenceState) -> Result<()> {
        self.write(Opcode::PatternStartStop, &[state as u8])?;
        debug!("Pattern sequence {}", state);
        Ok(())
    }

    /// Starts the pattern sequence.
    pub fn start_sequence(&self) -> Result<()> {
        self.set_sequence_state(SequenceState::Start)
    }

    /// Pauses the pattern sequence.
    pub fn pause_sequence(&self) -> Result<()> {
        self.set_sequence_state(SequenceState::Pause)
    }

    /// Stops the pattern sequence.
    pub fn stop_sequence(&self) -> Result<()> {
        self.set_sequence_state(SequenceState::Stop)
    }

    /// Configures the pattern lookup table.
    pub fn configure_lut(&self, lut: &LutConfig) -> Result<()> {
        self.write(Opcode::ConfigureLut, &lut.payload()?)
    }

    /// Defines one pattern LUT entry.
    pub fn define_pattern(&self, pattern: &PatternDefinition) -> Result<()> {
        self.write(Opcode::PatternDefinition, &pattern.payload()?)
    }

    /// Configures trigger out 1.
    pub fn configure_trigger_out1(&self, trigger: &TriggerOut) -> Result<()> {
        self.write(Opcode::TriggerOut1, &trigger.payload()?)
    }

    /// Announces and uploads one encoded bitmap into `slot_index`.
    ///
    /// The transport stays locked for the whole upload.
    pub fn upload_bitmap(&self, slot_index: u16, bitmap: &[u8]) -> Result<()> {
        let announce = build_command(
            Direction::Write,
            SEQ_CONTROL,
            Opcode::InitPatternBmpLoad,
            &set_bmp_payload(slot_index, bitmap.len() as u32)?,
        )?;
        let chunks = bmp_chunks(bitmap)?
            .iter()
            .map(|chunk| build_command(Direction::Write, SEQ_BITMAP, Opcode::PatternBmpLoad, chunk))
            .collect::<Result<Vec<_>>>()?;

        let mut link = self.lock()?;
        self.exchange(&mut link, SEQ_CONTROL, Opcode::InitPatternBmpLoad, &announce)?;

        for (i, frame) in chunks.iter().enumerate() {
            if i % 100 == 0 {
                debug!("Slot {}: chunk {}/{}", slot_index, i, chunks.len());
            }
            self.exchange(&mut link, SEQ_BITMAP, Opcode::PatternBmpLoad, frame)?;
        }

        info!(
            "Uploaded slot {} ({} bytes, {} chunks)",
            slot_index,
            bitmap.len(),
            chunks.len()
        );
        Ok(())
    }

    /// Reads the loopback test reply.
    pub fn test_read(&self) -> Result<Vec<u8>> {
        self.command(Direction::Read, SEQ_TEST_READ, Opcode::Test, &[])
    }

    /// Sends the loopback test write.
    pub fn test_write(&self) -> Result<()> {
        self.command(Direction::Write, SEQ_DIAGNOSTIC, Opcode::Test, &TEST_PATTERN)?;
        Ok(())
    }
}

/// Extracts the NUL-terminated text from a reply's data bytes.
fn reply_text(reply: &[u8]) -> String {
    let data = reply.get(REPLY_DATA_OFFSET..).unwrap_or_default();
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn device() -> DmdDevice<MockTransport> {
        DmdDevice::new(MockTransport::hid())
    }

    #[test]
    fn test_control_opcodes() {
        let dmd = device();
        dmd.idle_on().unwrap();
        dmd.idle_off().unwrap();
        dmd.standby().unwrap();
        dmd.wakeup().unwrap();
        dmd.reset().unwrap();
        dmd.change_mode(DisplayMode::PatternOnTheFly).unwrap();
        dmd.start_sequence().unwrap();
        dmd.pause_sequence().unwrap();
        dmd.stop_sequence().unwrap();

        let transport = dmd.into_transport();
        let sent: Vec<(u16, Vec<u8>)> = transport
            .commands()
            .into_iter()
            .map(|c| (c.opcode, c.payload))
            .collect();
        assert_eq!(
            sent,
            vec![
                (0x0201, vec![0x01]),
                (0x0201, vec![0x00]),
                (0x0200, vec![0x01]),
                (0x0200, vec![0x00]),
                (0x0200, vec![0x02]),
                (0x1A1B, vec![0x03]),
                (0x1A24, vec![0x02]),
                (0x1A24, vec![0x01]),
                (0x1A24, vec![0x00]),
            ]
        );
        // One status read per command
        assert_eq!(transport.reads, vec![REPLY_SIZE; 9]);
    }

    #[test]
    fn test_write_flag_and_report_id() {
        let dmd = device();
        dmd.stop_sequence().unwrap();
        let transport = dmd.into_transport();
        assert_eq!(transport.packets.len(), 1);
        assert_eq!(
            &transport.packets[0][..8],
            &[0x00, 0x40, 0x00, 0x03, 0x00, 0x24, 0x1A, 0x00]
        );
    }

    #[test]
    fn test_error_reply_runs_diagnostics() {
        let mut transport = MockTransport::hid();
        transport.replies.push_back(Ok(vec![0x60, 0x00, 0x01, 0x00]));
        transport
            .replies
            .push_back(Ok(vec![0xC0, 0x22, 0x01, 0x00, 0x06]));
        let mut description = vec![0xC0, 0x22, 0x10, 0x00];
        description.extend_from_slice(b"Invalid param\0junk");
        transport.replies.push_back(Ok(description));

        let dmd = DmdDevice::new(transport);
        dmd.change_mode(DisplayMode::Video).unwrap();

        let error = dmd.last_protocol_error().unwrap();
        assert_eq!(error.opcode, Opcode::DisplayMode);
        assert_eq!(error.sequence, SEQ_CONTROL);
        assert_eq!(error.flags, 0x60);
        assert_eq!(error.code, 6);
        assert_eq!(error.description, "Invalid param");

        let transport = dmd.into_transport();
        let commands = transport.commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[1].opcode, 0x0100);
        assert_eq!(commands[1].flag, 0xC0);
        assert_eq!(commands[1].sequence, SEQ_DIAGNOSTIC);
        assert_eq!(commands[2].opcode, 0x0101);
        assert_eq!(transport.reads, vec![REPLY_SIZE, REPLY_SIZE, DESCRIPTION_SIZE]);
    }

    #[test]
    fn test_diagnostic_failure_is_not_fatal() {
        let mut transport = MockTransport::hid();
        transport.replies.push_back(Ok(vec![0x60, 0x00, 0x01, 0x00]));
        transport
            .replies
            .push_back(Err(TransportError::Timeout(1000)));
        let dmd = DmdDevice::new(transport);

        dmd.stop_sequence().unwrap();

        let error = dmd.last_protocol_error().unwrap();
        assert_eq!(error.opcode, Opcode::PatternStartStop);
        assert_eq!(error.sequence, SEQ_CONTROL);
        assert_eq!(error.flags, 0x60);
        assert_eq!(error.code, 0);
        assert!(error.description.is_empty());

        // Description read skipped once the code read fails
        let transport = dmd.into_transport();
        assert_eq!(transport.commands().len(), 2);
        assert_eq!(transport.reads, vec![REPLY_SIZE, REPLY_SIZE]);
    }

    #[test]
    fn test_bulk_status_byte() {
        let mut transport = MockTransport::bulk();
        transport
            .replies
            .push_back(Ok(vec![0x40, 0x00, 0x03, 0x00, 0x00, 0x00, 0x09]));
        let dmd = DmdDevice::new(transport);
        dmd.start_sequence().unwrap();
        assert!(dmd.last_protocol_error().is_some());

        let transport = dmd.into_transport();
        assert!(transport.packets.iter().all(|p| p.len() == 64));
        assert_eq!(transport.commands().len(), 3);
    }

    #[test]
    fn test_timeout_is_fatal() {
        let mut transport = MockTransport::hid();
        transport
            .replies
            .push_back(Err(TransportError::Timeout(1000)));
        let dmd = DmdDevice::new(transport);

        let err = dmd.stop_sequence().unwrap_err();
        assert!(matches!(
            err,
            Error::Command {
                opcode: Opcode::PatternStartStop,
                sequence: 0x00,
                source: TransportError::Timeout(1000),
            }
        ));
        // No retry
        assert_eq!(dmd.into_transport().packets.len(), 1);
    }

    #[test]
    fn test_overflow_sends_nothing() {
        let dmd = device();
        let lut = LutConfig {
            pattern_count: 4096,
            repeat_count: 0,
        };
        assert!(matches!(
            dmd.configure_lut(&lut),
            Err(Error::FieldOverflow { width: 11, .. })
        ));
        assert!(dmd.upload_bitmap(40, &[0u8; 8]).is_err());
        assert!(dmd.into_transport().packets.is_empty());
    }

    #[test]
    fn test_upload_bitmap() {
        let dmd = device();
        let bitmap: Vec<u8> = (0..1100u32).map(|i| i as u8).collect();
        dmd.upload_bitmap(2, &bitmap).unwrap();

        let commands = dmd.into_transport().commands();
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[0].opcode, 0x1A2A);
        assert_eq!(commands[0].payload, vec![0x02, 0x00, 0x4C, 0x04, 0x00, 0x00]);

        let mut uploaded = Vec::new();
        for chunk in &commands[1..] {
            assert_eq!(chunk.opcode, 0x1A2B);
            assert_eq!(chunk.sequence, SEQ_BITMAP);
            let len = u16::from_le_bytes([chunk.payload[0], chunk.payload[1]]) as usize;
            assert!(len <= 504);
            assert_eq!(chunk.payload.len(), len + 2);
            uploaded.extend_from_slice(&chunk.payload[2..]);
        }
        assert_eq!(uploaded, bitmap);
    }

    #[test]
    fn test_loopback_commands() {
        let dmd = device();
        dmd.test_write().unwrap();
        dmd.test_read().unwrap();
        let commands = dmd.into_transport().commands();
        assert_eq!(commands[0].sequence, 0x22);
        assert_eq!(commands[0].payload, TEST_PATTERN.to_vec());
        assert_eq!(commands[1].flag, 0xC0);
        assert_eq!(commands[1].sequence, 0xFF);
    }
}
