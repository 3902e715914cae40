//! Protocol constants for TouchComm v2.
//!
//! Command, status and report codes as defined by the TouchComm v2
//! firmware interface.

// ============================================================================
// Packet Geometry
// ============================================================================

/// Size of the packet header in bytes.
pub const MESSAGE_HEADER_SIZE: usize = 4;

/// Size of the trailing payload CRC in bytes.
pub const PAYLOAD_CRC_SIZE: usize = 2;

/// Number of bits covered by the header CRC check.
pub const BITS_IN_MESSAGE_HEADER: usize = MESSAGE_HEADER_SIZE * 8;

/// Host-role marker placed in bit 7 of the header control byte.
pub const HOST_PRIMARY: u8 = 0;

/// Mask for the 6-bit CRC residue stored in the control byte.
pub const HEADER_CRC_MASK: u8 = 0x3F;

/// Retry bound for corrupted packet exchanges.
pub const COMMAND_RETRY_LIMIT: u32 = 5;

// ============================================================================
// Command Codes (Host -> Device)
// ============================================================================

pub const CMD_NONE: u8 = 0x00;
/// Continuation chunk of a payload started by another command.
pub const CMD_CONTINUE_WRITE: u8 = 0x01;
pub const CMD_IDENTIFY: u8 = 0x02;
pub const CMD_RESET: u8 = 0x04;
pub const CMD_ENABLE_REPORT: u8 = 0x05;
pub const CMD_DISABLE_REPORT: u8 = 0x06;
/// Acknowledge the current packet and request the next chunk.
pub const CMD_ACK: u8 = 0x07;
/// Request retransmission of the previous packet.
pub const CMD_RETRY: u8 = 0x08;
pub const CMD_SET_MAX_READ_LENGTH: u8 = 0x09;
/// Ask the device for a pending report or response packet.
pub const CMD_GET_REPORT: u8 = 0x0A;

// Mode switching and reset variants. The dispatcher treats an identify
// report arriving for any of these as the command's completion.
pub const CMD_RUN_APPLICATION_FIRMWARE: u8 = 0x14;
pub const CMD_REBOOT_TO_ROM_BOOTLOADER: u8 = 0x16;
pub const CMD_RUN_BOOTLOADER_FIRMWARE: u8 = 0x1F;
pub const CMD_ROMBOOT_RUN_BOOTLOADER_FIRMWARE: u8 = 0x27;
pub const CMD_ENTER_PRODUCTION_TEST_MODE: u8 = 0x2F;
pub const CMD_SMART_BRIDGE_RESET: u8 = 0xC7;
pub const CMD_REBOOT_TO_DISPLAY_ROM_BOOTLOADER: u8 = 0xC8;

// ============================================================================
// Status Codes (Device -> Host)
// ============================================================================

pub const STATUS_IDLE: u8 = 0x00;
pub const STATUS_OK: u8 = 0x01;
pub const STATUS_BUSY: u8 = 0x02;
/// Chunk of a payload continued from a previous packet.
pub const STATUS_CONTINUED_READ: u8 = 0x03;
pub const STATUS_RETRY_REQUESTED: u8 = 0x04;
pub const STATUS_ACK: u8 = 0x05;
pub const STATUS_PACKET_CORRUPTED: u8 = 0x06;
pub const STATUS_NO_REPORT_AVAILABLE: u8 = 0x07;
pub const STATUS_RECEIVE_BUFFER_OVERFLOW: u8 = 0x0C;
pub const STATUS_PREVIOUS_COMMAND_PENDING: u8 = 0x0D;
pub const STATUS_NOT_IMPLEMENTED: u8 = 0x0E;
pub const STATUS_ERROR: u8 = 0x0F;
pub const STATUS_INVALID: u8 = 0xFF;

// ============================================================================
// Report Codes (Device -> Host, asynchronous)
// ============================================================================

/// Lowest report code. Any status/report code at or above this value
/// identifies an asynchronous report rather than a command response.
pub const REPORT_IDENTIFY: u8 = 0x10;
pub const REPORT_TOUCH: u8 = 0x11;
pub const REPORT_DELTA: u8 = 0x12;
pub const REPORT_RAW: u8 = 0x13;

/// Check whether a status/report code identifies an asynchronous report.
#[inline]
pub const fn is_report_code(code: u8) -> bool {
    code >= REPORT_IDENTIFY
}

// ============================================================================
// Device Modes
// ============================================================================

pub const MODE_UNKNOWN: u8 = 0x00;
pub const MODE_APPLICATION_FIRMWARE: u8 = 0x01;
pub const MODE_HOST_DOWNLOAD: u8 = 0x02;
pub const MODE_BOOTLOADER: u8 = 0x0B;
pub const MODE_ROM_BOOTLOADER: u8 = 0x0C;
