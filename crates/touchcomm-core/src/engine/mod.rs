//! TouchComm v2 protocol engine.
//!
//! The engine turns the raw byte channel into a reliable
//! command/response exchange: it frames and validates packets, splits
//! oversized payloads into bounded chunks, retries corrupted exchanges,
//! and demultiplexes asynchronous reports from command responses.
//!
//! One engine value owns the transport and every working buffer, so all
//! operations take `&mut self`; concurrent callers go through the
//! session layer, which serializes access on a single consumer thread.

mod chunk;
mod command;
mod dispatch;
mod wire;

use std::sync::Arc;
use std::time::Duration;

use crate::buffer::PayloadBuffer;
use crate::config::ProtocolConfig;
use crate::error::TcmError;
use crate::events::TcmObserver;
use crate::identify::IdentifyInfo;
use crate::protocol::constants::{CMD_NONE, MODE_UNKNOWN, STATUS_INVALID};
use crate::transport::BusTransport;

/// Lifecycle of the command currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandStatus {
    /// No command outstanding.
    #[default]
    Idle,
    /// Command issued, awaiting its terminal response or report.
    Busy,
    /// Command ended abnormally; consumed by the caller and reset to
    /// `Idle` before the next command.
    Error,
}

/// How a command waits for its response after the device acknowledged it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Event driven: the interrupt collaborator delivers inbound events
    /// and the session completes the command from those.
    Attn,
    /// Active polling at the given interval (floored at 100ms).
    Polling(Duration),
}

/// Terminal result of one command exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    /// Status or report code that completed the command.
    pub status: u8,
    /// Response payload, if any.
    pub payload: Vec<u8>,
}

/// Outcome of issuing a command.
#[derive(Debug)]
pub enum WriteOutcome {
    /// The exchange ran to completion inline.
    Complete(CommandResponse),
    /// The device acknowledged the command; completion arrives through
    /// a later inbound event.
    Pending,
}

/// Version-independent surface of a protocol engine.
///
/// The bootstrap layer picks the concrete implementation for the
/// firmware it detected; the session drives it through this trait.
pub trait ProtocolEngine: Send {
    /// Issue one command with its payload and classify the result.
    fn write_message(
        &mut self,
        command: u8,
        payload: &[u8],
        total_length: usize,
        mode: ResponseMode,
    ) -> Result<WriteOutcome, TcmError>;

    /// Fetch one pending packet from the device and dispatch it as a
    /// report or a response. Returns the status/report code received.
    fn read_message(&mut self) -> Result<u8, TcmError>;

    /// Consume the terminal state of a pending command.
    fn finish_command(&mut self) -> Result<CommandResponse, TcmError>;

    /// Force a pending command back to idle, yielding the timeout error.
    fn abort_command(&mut self) -> TcmError;

    /// Current command lifecycle state.
    fn command_status(&self) -> CommandStatus;

    /// Negotiate the chunk size limits from the stored identification.
    fn negotiate_transfer_sizes(&mut self) -> Result<(), TcmError>;

    /// Payload copy handed upward by the most recent `read_message`.
    fn external_payload(&self) -> &[u8];

    /// Payload of the most recent asynchronous report.
    fn report_payload(&self) -> &[u8];

    /// Most recent identification info, if any.
    fn identity(&self) -> Option<&IdentifyInfo>;

    /// Engine configuration.
    fn config(&self) -> &ProtocolConfig;
}

/// Mutable per-connection protocol state.
#[derive(Debug)]
pub(crate) struct MessageState {
    /// Command code currently in flight.
    pub(crate) command: u8,
    pub(crate) command_status: CommandStatus,
    /// Last status/report code decoded from the bus.
    pub(crate) status_report_code: u8,
    /// Classification of the in-flight command's response.
    pub(crate) response_code: u8,
    /// Last decoded payload length.
    pub(crate) payload_length: usize,
    /// Sequence toggle; bit 0 rides in every outbound header and flips
    /// on each new (non-resend) packet.
    pub(crate) seq_toggle: u8,
    /// Payload bytes to prefetch together with the next header read.
    pub(crate) predict_length: usize,
    /// Legacy firmware requires an acknowledgment before every chunk.
    pub(crate) legacy: bool,
    /// Whether inbound payloads carry the trailing CRC-16.
    pub(crate) payload_crc: bool,
    /// Whether packets carry an extra trailing residue byte. Never set
    /// for this protocol version.
    pub(crate) extra_trailer_byte: bool,
}

impl Default for MessageState {
    fn default() -> Self {
        Self {
            command: CMD_NONE,
            command_status: CommandStatus::Idle,
            status_report_code: STATUS_INVALID,
            response_code: STATUS_INVALID,
            payload_length: 0,
            seq_toggle: 0,
            predict_length: 0,
            legacy: false,
            payload_crc: true,
            extra_trailer_byte: false,
        }
    }
}

/// The engine's working buffers. Capacity grows on demand and is reused
/// across exchanges.
#[derive(Debug, Default)]
pub(crate) struct EngineBuffers {
    /// Raw outbound packet staging.
    pub(crate) outbound: PayloadBuffer,
    /// Reassembled inbound packet (header + full payload).
    pub(crate) inbound: PayloadBuffer,
    /// Per-transfer decode scratch.
    pub(crate) scratch: PayloadBuffer,
    /// Payload of the last command response.
    pub(crate) response: PayloadBuffer,
    /// Payload of the last asynchronous report.
    pub(crate) report: PayloadBuffer,
    /// Copy handed to the upward collaborator.
    pub(crate) external: PayloadBuffer,
}

/// TouchComm v2 engine over an owned bus transport.
pub struct TouchCommV2<T: BusTransport> {
    pub(crate) transport: T,
    pub(crate) config: ProtocolConfig,
    pub(crate) observer: Arc<dyn TcmObserver>,
    pub(crate) state: MessageState,
    pub(crate) buffers: EngineBuffers,
    /// Negotiated transfer ceilings; 0 means unbounded/unnegotiated.
    pub(crate) max_write_size: usize,
    pub(crate) max_read_size: usize,
    pub(crate) id_info: Option<IdentifyInfo>,
    pub(crate) device_mode: u8,
}

impl<T: BusTransport> TouchCommV2<T> {
    pub fn new(transport: T, config: ProtocolConfig, observer: Arc<dyn TcmObserver>) -> Self {
        Self {
            transport,
            config,
            observer,
            state: MessageState::default(),
            buffers: EngineBuffers::default(),
            max_write_size: 0,
            max_read_size: 0,
            id_info: None,
            device_mode: MODE_UNKNOWN,
        }
    }

    pub(crate) fn reset_command_state(&mut self) {
        self.state.command = CMD_NONE;
        self.state.command_status = CommandStatus::Idle;
    }

    #[cfg(test)]
    pub(crate) fn set_transfer_limits(&mut self, max_write: usize, max_read: usize) {
        self.max_write_size = max_write;
        self.max_read_size = max_read;
    }
}

impl<T: BusTransport> ProtocolEngine for TouchCommV2<T> {
    fn write_message(
        &mut self,
        command: u8,
        payload: &[u8],
        total_length: usize,
        mode: ResponseMode,
    ) -> Result<WriteOutcome, TcmError> {
        TouchCommV2::write_message(self, command, payload, total_length, mode)
    }

    fn read_message(&mut self) -> Result<u8, TcmError> {
        TouchCommV2::read_message(self)
    }

    fn finish_command(&mut self) -> Result<CommandResponse, TcmError> {
        TouchCommV2::finish_command(self)
    }

    fn abort_command(&mut self) -> TcmError {
        TouchCommV2::abort_command(self)
    }

    fn command_status(&self) -> CommandStatus {
        self.state.command_status
    }

    fn negotiate_transfer_sizes(&mut self) -> Result<(), TcmError> {
        TouchCommV2::negotiate_transfer_sizes(self)
    }

    fn external_payload(&self) -> &[u8] {
        self.buffers.external.data()
    }

    fn report_payload(&self) -> &[u8] {
        self.buffers.report.data()
    }

    fn identity(&self) -> Option<&IdentifyInfo> {
        self.id_info.as_ref()
    }

    fn config(&self) -> &ProtocolConfig {
        &self.config
    }
}
