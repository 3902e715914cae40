//! Command execution.
//!
//! `execute_cmd_request` drives one full command exchange including
//! outbound chunking and the retry protocol; `write_message` wraps it
//! with command lifecycle state and the polling/event wait for the
//! terminal response.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{CommandResponse, CommandStatus, ResponseMode, WriteOutcome};
use crate::error::TcmError;
use crate::protocol::constants::{
    CMD_CONTINUE_WRITE, CMD_NONE, CMD_RESET, CMD_SET_MAX_READ_LENGTH, MESSAGE_HEADER_SIZE,
    PAYLOAD_CRC_SIZE, STATUS_ACK, STATUS_INVALID, STATUS_NO_REPORT_AVAILABLE, STATUS_OK,
    STATUS_PACKET_CORRUPTED, STATUS_RETRY_REQUESTED, is_report_code,
};
use crate::transport::BusTransport;

use super::TouchCommV2;

/// Floor for the polling interval; tighter loops hammer the bus.
const MIN_POLLING_INTERVAL: Duration = Duration::from_millis(100);

/// Smallest usable transfer limit: header, CRC trailer and at least one
/// payload byte must fit.
const MIN_TRANSFER_SIZE: usize = MESSAGE_HEADER_SIZE + PAYLOAD_CRC_SIZE + 1;

impl<T: BusTransport> TouchCommV2<T> {
    /// Send `command` with its payload, chunking to the negotiated write
    /// limit, and read the immediate response to every chunk.
    ///
    /// `total_length` is the length of the whole message and goes into
    /// every chunk's header length field; it equals `payload.len()`
    /// unless the caller streams a larger message in pieces.
    pub(crate) fn execute_cmd_request(
        &mut self,
        command: u8,
        payload: &[u8],
        total_length: usize,
    ) -> Result<(), TcmError> {
        let length = payload.len();
        if total_length < length {
            return Err(TcmError::InvalidArgument(format!(
                "total length {total_length} below the {length} bytes provided"
            )));
        }

        let mut remaining = length;
        let chunk_space = if self.max_write_size == 0 {
            remaining
        } else {
            self.max_write_size
                .saturating_sub(MESSAGE_HEADER_SIZE + PAYLOAD_CRC_SIZE)
        };
        let chunks = if remaining == 0 || chunk_space == 0 {
            1
        } else {
            remaining.div_ceil(chunk_space)
        };

        let mut offset = 0;
        let mut retry_cnt: u32 = 0;
        for idx in 0..chunks {
            let xfer = remaining.min(chunk_space);
            let chunk_cmd = if idx == 0 { command } else { CMD_CONTINUE_WRITE };
            loop {
                self.write_packet(
                    chunk_cmd,
                    &payload[offset..offset + xfer],
                    total_length,
                    retry_cnt > 0,
                )?;
                thread::sleep(self.config.turnaround_delay());
                self.read_response()?;
                self.state.response_code = self.state.status_report_code;

                match self.state.response_code {
                    STATUS_NO_REPORT_AVAILABLE | STATUS_OK | STATUS_ACK => {
                        retry_cnt = 0;
                        // A streamed message completes once the final
                        // piece went out, whatever the chunk status was.
                        if idx + 1 == chunks && total_length != length {
                            self.state.response_code = STATUS_OK;
                        }
                    }
                    STATUS_PACKET_CORRUPTED | STATUS_RETRY_REQUESTED => {
                        retry_cnt += 1;
                    }
                    code if is_report_code(code) => {
                        // A report rode in on the transaction; dispatch
                        // happens upstream, keep the exchange moving.
                        retry_cnt = 0;
                    }
                    code => {
                        return Err(TcmError::UnexpectedStatus {
                            command: chunk_cmd,
                            status: code,
                        });
                    }
                }

                if retry_cnt == 0 {
                    break;
                }
                if command == CMD_RESET {
                    // A reset drops the link mid-response; take the
                    // mangled packet as the acknowledgment it was.
                    warn!("Reset response corrupted, assuming acknowledged");
                    self.state.response_code = STATUS_ACK;
                    return Ok(());
                }
                if retry_cnt > self.config.retry_limit {
                    return Err(TcmError::ProtocolCorrupted {
                        command: chunk_cmd,
                        attempts: self.config.retry_limit,
                    });
                }
                info!(
                    command = format!("0x{chunk_cmd:02X}"),
                    retry = retry_cnt,
                    "Command chunk rejected, resending"
                );
                thread::sleep(self.config.retry_delay());
            }

            offset += xfer;
            remaining -= xfer;
            if chunks > 1 {
                thread::sleep(self.config.retry_delay());
            }
        }
        Ok(())
    }

    /// Issue one command and wait for its terminal response.
    ///
    /// In `Attn` mode an acknowledged command returns
    /// [`WriteOutcome::Pending`] and completes through `read_message`
    /// when the caller delivers the inbound event.
    pub(crate) fn write_message(
        &mut self,
        command: u8,
        payload: &[u8],
        total_length: usize,
        mode: ResponseMode,
    ) -> Result<WriteOutcome, TcmError> {
        if command == CMD_NONE {
            return Err(TcmError::InvalidArgument("no command given".into()));
        }

        debug!(
            command = format!("0x{command:02X}"),
            length = payload.len(),
            "Executing command"
        );
        self.state.command = command;
        self.state.command_status = CommandStatus::Busy;
        self.state.response_code = STATUS_INVALID;

        if let Err(err) = self.execute_cmd_request(command, payload, total_length) {
            self.reset_command_state();
            return Err(err);
        }

        if is_report_code(self.state.response_code) {
            self.dispatch_report();
            return self.finish_command().map(WriteOutcome::Complete);
        }
        if self.state.response_code != STATUS_ACK {
            self.dispatch_response();
            return self.finish_command().map(WriteOutcome::Complete);
        }

        match mode {
            ResponseMode::Attn => Ok(WriteOutcome::Pending),
            ResponseMode::Polling(requested) => {
                let interval = requested.max(MIN_POLLING_INTERVAL);
                let timeout = self.config.command_timeout();
                let mut waited = Duration::ZERO;
                while self.state.command_status != CommandStatus::Idle && waited < timeout {
                    thread::sleep(interval);
                    waited += interval;
                    if self.state.command_status == CommandStatus::Idle {
                        break;
                    }
                    // Whatever went wrong on the last poll, keep asking
                    // until the response shows up or the clock runs out.
                    self.state.command_status = CommandStatus::Busy;
                    if let Err(err) = self.read_message() {
                        debug!(error = %err, "Poll read failed, retrying");
                    }
                }
                if self.state.command_status != CommandStatus::Idle {
                    return Err(self.abort_command());
                }
                self.finish_command().map(WriteOutcome::Complete)
            }
        }
    }

    /// Consume the terminal state of the pending command, resetting the
    /// lifecycle to idle.
    pub(crate) fn finish_command(&mut self) -> Result<CommandResponse, TcmError> {
        let command = self.state.command;
        let status = self.state.status_report_code;
        let response_code = self.state.response_code;
        let outcome = self.state.command_status;
        self.reset_command_state();

        match outcome {
            CommandStatus::Busy => Err(TcmError::Timeout {
                command,
                timeout_ms: self.config.command_timeout_ms,
            }),
            CommandStatus::Error => Err(TcmError::ErrorStatus { command, status }),
            CommandStatus::Idle => {
                if response_code != STATUS_OK {
                    Err(TcmError::ErrorStatus {
                        command,
                        status: response_code,
                    })
                } else {
                    Ok(CommandResponse {
                        status,
                        payload: self.buffers.response.data().to_vec(),
                    })
                }
            }
        }
    }

    /// Give up on the pending command, yielding the timeout error the
    /// caller reports.
    pub(crate) fn abort_command(&mut self) -> TcmError {
        let command = self.state.command;
        warn!(command = format!("0x{command:02X}"), "Command timed out");
        self.reset_command_state();
        TcmError::Timeout {
            command,
            timeout_ms: self.config.command_timeout_ms,
        }
    }

    /// Derive the transfer ceilings from the stored identification and
    /// tell the device how much it may send per transfer.
    ///
    /// Limits only ever shrink; a device reporting zero or a size too
    /// small to carry any payload stays unbounded and is logged rather
    /// than failed.
    pub(crate) fn negotiate_transfer_sizes(&mut self) -> Result<(), TcmError> {
        let Some(info) = &self.id_info else {
            return Err(TcmError::InvalidArgument(
                "no identification stored, cannot size transfers".into(),
            ));
        };

        let wr_size = info.max_write_size as usize;
        let rd_size = info.effective_read_size() as usize;
        if wr_size < MIN_TRANSFER_SIZE || rd_size < MIN_TRANSFER_SIZE {
            warn!(rd_size, wr_size, "Device reported unusable transfer sizes, staying unbounded");
            return Ok(());
        }

        if wr_size != self.max_write_size {
            self.max_write_size = if self.max_write_size == 0 {
                wr_size
            } else {
                wr_size.min(self.max_write_size)
            };
            debug!(bytes = self.max_write_size, "Max write length set");
        }

        let new_rd = if self.max_read_size == 0 {
            rd_size
        } else {
            rd_size.min(self.max_read_size)
        };
        if new_rd != self.max_read_size {
            self.max_read_size = new_rd;
            let data = (self.max_read_size as u16).to_le_bytes();
            self.execute_cmd_request(CMD_SET_MAX_READ_LENGTH, &data, data.len())?;
            debug!(bytes = self.max_read_size, "Max read length set");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::config::ProtocolConfig;
    use crate::engine::testutil::{corrupt_header, engine_with, fast_config, frame, header_only};
    use crate::engine::{ResponseMode, WriteOutcome};
    use crate::error::TcmError;
    use crate::protocol::constants::{
        CMD_CONTINUE_WRITE, CMD_ENABLE_REPORT, CMD_GET_REPORT, CMD_IDENTIFY, CMD_RESET,
        STATUS_ACK, STATUS_CONTINUED_READ, STATUS_ERROR, STATUS_OK, STATUS_RETRY_REQUESTED,
    };
    use crate::transport::MockBus;
    use byteorder::{ByteOrder, LittleEndian};

    #[test]
    fn inline_response_completes_the_command() {
        let bus = MockBus::new();
        bus.queue_read(&header_only(STATUS_OK, 2, 1));
        bus.queue_read(&frame(STATUS_CONTINUED_READ, 2, &[0xCA, 0xFE], 1));
        let mut engine = engine_with(&bus, fast_config());

        let outcome = engine
            .write_message(CMD_IDENTIFY, &[], 0, ResponseMode::Attn)
            .unwrap();
        let WriteOutcome::Complete(response) = outcome else {
            panic!("expected inline completion");
        };
        assert_eq!(response.status, STATUS_OK);
        assert_eq!(response.payload, vec![0xCA, 0xFE]);
    }

    #[test]
    fn write_spanning_chunks_repeats_the_total_length() {
        let bus = MockBus::new();
        let payload: Vec<u8> = (0u8..20).collect();

        let mut engine = engine_with(&bus, fast_config());
        // max_write 14 leaves 8 payload bytes per chunk.
        engine.set_transfer_limits(14, 0);

        bus.queue_read(&header_only(STATUS_ACK, 0, 1));
        bus.queue_read(&header_only(STATUS_ACK, 0, 0));
        bus.queue_read(&header_only(STATUS_OK, 0, 1));

        let outcome = engine
            .write_message(CMD_ENABLE_REPORT, &payload, payload.len(), ResponseMode::Attn)
            .unwrap();
        let WriteOutcome::Complete(_) = outcome else {
            panic!("final chunk status was OK, command should be done");
        };

        let writes = bus.writes();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0][0], CMD_ENABLE_REPORT);
        assert_eq!(writes[1][0], CMD_CONTINUE_WRITE);
        assert_eq!(writes[2][0], CMD_CONTINUE_WRITE);
        for chunk in &writes {
            assert_eq!(LittleEndian::read_u16(&chunk[1..3]), 20);
        }
        assert_eq!(&writes[0][4..12], &payload[..8]);
        assert_eq!(&writes[1][4..12], &payload[8..16]);
        assert_eq!(&writes[2][4..8], &payload[16..20]);
    }

    #[test]
    fn retry_requested_resends_the_same_chunk() {
        let bus = MockBus::new();
        bus.queue_read(&header_only(STATUS_RETRY_REQUESTED, 0, 1));
        bus.queue_read(&header_only(STATUS_OK, 1, 1));
        bus.queue_read(&frame(STATUS_CONTINUED_READ, 1, &[0x01], 1));
        let mut engine = engine_with(&bus, fast_config());

        engine
            .write_message(CMD_IDENTIFY, &[0x55], 1, ResponseMode::Attn)
            .unwrap();

        let writes = bus.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], writes[1]);
    }

    #[test]
    fn retry_bound_fails_the_command() {
        let bus = MockBus::new();
        for _ in 0..6 {
            bus.queue_read(&corrupt_header());
        }
        let mut engine = engine_with(&bus, fast_config());

        let err = engine
            .write_message(CMD_IDENTIFY, &[], 0, ResponseMode::Attn)
            .unwrap_err();
        assert!(matches!(
            err,
            TcmError::ProtocolCorrupted {
                command: CMD_IDENTIFY,
                attempts: 5
            }
        ));
    }

    #[test]
    fn corrupted_reset_response_counts_as_acknowledged() {
        let bus = MockBus::new();
        bus.queue_read(&corrupt_header());
        // The identify report the reset produces, fetched by polling.
        bus.queue_read(&header_only(crate::protocol::constants::REPORT_IDENTIFY, 28, 0));
        bus.queue_read(&frame(
            crate::protocol::constants::STATUS_CONTINUED_READ,
            28,
            &identify_payload(),
            0,
        ));
        let mut engine = engine_with(&bus, fast_config());

        let outcome = engine
            .write_message(
                CMD_RESET,
                &[],
                0,
                ResponseMode::Polling(Duration::from_millis(1)),
            )
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Complete(_)));
        assert!(engine.id_info.is_some());
    }

    #[test]
    fn error_status_surfaces_as_a_command_failure() {
        let bus = MockBus::new();
        bus.queue_read(&header_only(STATUS_ERROR, 0, 1));
        let mut engine = engine_with(&bus, fast_config());

        let err = engine
            .write_message(CMD_IDENTIFY, &[], 0, ResponseMode::Attn)
            .unwrap_err();
        assert!(matches!(
            err,
            TcmError::UnexpectedStatus {
                command: CMD_IDENTIFY,
                status: STATUS_ERROR
            }
        ));
    }

    #[test]
    fn polling_gives_up_after_the_timeout() {
        let bus = MockBus::new();
        bus.queue_read(&header_only(STATUS_ACK, 0, 1));
        let config = ProtocolConfig {
            command_timeout_ms: 250,
            ..fast_config()
        };
        let mut engine = engine_with(&bus, config);

        let err = engine
            .write_message(
                CMD_GET_REPORT,
                &[],
                0,
                ResponseMode::Polling(Duration::from_millis(1)),
            )
            .unwrap_err();
        assert!(matches!(err, TcmError::Timeout { command: CMD_GET_REPORT, .. }));
    }

    #[test]
    fn transfer_limits_only_shrink() {
        let bus = MockBus::new();
        let mut engine = engine_with(&bus, fast_config());

        engine.id_info = Some(crate::identify::IdentifyInfo {
            version: 0x10,
            mode: 0x01,
            build_id: 42,
            max_write_size: 32,
            max_read_size: 64,
            max_possible_read_size: Some(64),
            ..Default::default()
        });

        bus.queue_read(&header_only(STATUS_OK, 0, 1));
        engine.negotiate_transfer_sizes().unwrap();
        assert_eq!(engine.max_write_size, 32);
        assert_eq!(engine.max_read_size, 64);

        // The device now claims more; the negotiated limits hold.
        engine.id_info.as_mut().unwrap().max_write_size = 128;
        engine.id_info.as_mut().unwrap().max_read_size = 128;
        engine.id_info.as_mut().unwrap().max_possible_read_size = Some(128);
        engine.negotiate_transfer_sizes().unwrap();
        assert_eq!(engine.max_write_size, 32);
        assert_eq!(engine.max_read_size, 64);

        // Only the first negotiation told the device anything.
        let writes = bus.writes();
        assert_eq!(writes.len(), 1);
        let set_rd = &writes[0];
        assert_eq!(set_rd[0], crate::protocol::constants::CMD_SET_MAX_READ_LENGTH);
        assert_eq!(LittleEndian::read_u16(&set_rd[4..6]), 64);
    }

    #[test]
    fn undersized_advertised_limits_stay_unbounded() {
        let bus = MockBus::new();
        let mut engine = engine_with(&bus, fast_config());

        // Nonzero but too small to carry a header, trailer and payload.
        engine.id_info = Some(crate::identify::IdentifyInfo {
            version: 0x10,
            mode: 0x01,
            build_id: 42,
            max_write_size: 4,
            max_read_size: 6,
            max_possible_read_size: Some(6),
            ..Default::default()
        });

        engine.negotiate_transfer_sizes().unwrap();
        assert_eq!(engine.max_write_size, 0);
        assert_eq!(engine.max_read_size, 0);
        assert!(bus.writes().is_empty());
    }

    fn identify_payload() -> Vec<u8> {
        let mut payload = vec![0u8; 28];
        payload[0] = 0x10;
        payload[1] = 0x01;
        payload[2..6].copy_from_slice(b"TD99");
        LittleEndian::write_u32(&mut payload[18..22], 42);
        LittleEndian::write_u16(&mut payload[22..24], 0x0100);
        LittleEndian::write_u16(&mut payload[24..26], 0x0200);
        LittleEndian::write_u16(&mut payload[26..28], 0x0200);
        payload
    }
}
