//! Inbound packet dispatch.
//!
//! Everything the device sends is either an asynchronous report (codes
//! `0x10` and up) or the response to the host's pending command. Reports
//! can complete a pending command too: firmware-switching commands
//! answer with an identify report instead of a plain response.

use tracing::{debug, info, warn};

use crate::engine::CommandStatus;
use crate::error::TcmError;
use crate::identify::IdentifyInfo;
use crate::protocol::constants::{
    CMD_ENTER_PRODUCTION_TEST_MODE, CMD_GET_REPORT, CMD_REBOOT_TO_DISPLAY_ROM_BOOTLOADER,
    CMD_REBOOT_TO_ROM_BOOTLOADER, CMD_RESET, CMD_ROMBOOT_RUN_BOOTLOADER_FIRMWARE,
    CMD_RUN_APPLICATION_FIRMWARE, CMD_RUN_BOOTLOADER_FIRMWARE, CMD_SMART_BRIDGE_RESET,
    MESSAGE_HEADER_SIZE, REPORT_IDENTIFY, STATUS_NO_REPORT_AVAILABLE, STATUS_OK, is_report_code,
};
use crate::transport::BusTransport;

use super::TouchCommV2;

impl<T: BusTransport> TouchCommV2<T> {
    /// Fetch whatever the device has pending and dispatch it.
    ///
    /// This is both the interrupt path (device signalled attention) and
    /// the polling path of a pending command. Returns the status/report
    /// code of the packet received.
    pub(crate) fn read_message(&mut self) -> Result<u8, TcmError> {
        if let Err(err) = self.execute_cmd_request(CMD_GET_REPORT, &[], 0) {
            if self.state.command_status == CommandStatus::Busy {
                self.state.command_status = CommandStatus::Error;
            }
            return Err(err);
        }

        // Copy for the upward collaborator before dispatch consumes it.
        let payload_len = self.state.payload_length;
        if payload_len > 0 {
            let src = &self.buffers.inbound.as_slice()
                [MESSAGE_HEADER_SIZE..MESSAGE_HEADER_SIZE + payload_len];
            self.buffers.external.fill_from(src);
        } else {
            self.buffers.external.clear();
        }

        // An empty mailbox is not an answer; a pending command keeps
        // waiting for its real response.
        if self.state.response_code == STATUS_NO_REPORT_AVAILABLE {
            return Ok(self.state.status_report_code);
        }

        if is_report_code(self.state.status_report_code) {
            self.dispatch_report();
        } else {
            self.dispatch_response();
        }
        Ok(self.state.status_report_code)
    }

    /// Route an asynchronous report: stash the payload, fold identify
    /// reports into the stored identification, and complete the pending
    /// command when the report is its terminal answer.
    pub(crate) fn dispatch_report(&mut self) {
        let report_code = self.state.status_report_code;
        let payload_len = self.state.payload_length;

        if payload_len == 0 {
            warn!(
                code = format!("0x{report_code:02X}"),
                "Report carried no payload"
            );
            self.buffers.report.clear();
            self.state.command_status = CommandStatus::Idle;
            return;
        }

        let src =
            &self.buffers.inbound.as_slice()[MESSAGE_HEADER_SIZE..MESSAGE_HEADER_SIZE + payload_len];
        self.buffers.report.fill_from(src);

        if report_code == REPORT_IDENTIFY {
            let info = match IdentifyInfo::parse(self.buffers.report.data()) {
                Ok(info) => info,
                Err(err) => {
                    warn!(error = %err, "Discarding malformed identify report");
                    return;
                }
            };
            self.apply_identity(info);

            if self.state.command_status == CommandStatus::Busy {
                match self.state.command {
                    CMD_RESET | CMD_SMART_BRIDGE_RESET => {
                        debug!("Device reset by command");
                        self.complete_ok();
                    }
                    // Mode switches announce themselves through identify.
                    CMD_GET_REPORT
                    | CMD_REBOOT_TO_DISPLAY_ROM_BOOTLOADER
                    | CMD_REBOOT_TO_ROM_BOOTLOADER
                    | CMD_RUN_BOOTLOADER_FIRMWARE
                    | CMD_RUN_APPLICATION_FIRMWARE
                    | CMD_ENTER_PRODUCTION_TEST_MODE
                    | CMD_ROMBOOT_RUN_BOOTLOADER_FIRMWARE => self.complete_ok(),
                    other => {
                        info!(
                            command = format!("0x{other:02X}"),
                            "Device reset while an unrelated command was pending"
                        );
                        self.state.command_status = CommandStatus::Error;
                    }
                }
            } else {
                self.observer.on_reset();
            }
        } else {
            self.observer.on_report(report_code);
            if self.state.command == CMD_GET_REPORT
                && self.state.command_status == CommandStatus::Busy
            {
                self.complete_ok();
            }
        }
    }

    /// Route a command response into the response buffer and complete
    /// the pending command. Responses with nobody waiting are dropped.
    pub(crate) fn dispatch_response(&mut self) {
        if self.state.command_status != CommandStatus::Busy {
            return;
        }

        if self.state.response_code == STATUS_NO_REPORT_AVAILABLE
            && self.state.command == CMD_GET_REPORT
        {
            // Nothing pending is a valid answer to a report fetch.
            self.state.response_code = STATUS_OK;
        }

        let payload_len = self.state.payload_length;
        if payload_len == 0 {
            self.buffers.response.clear();
            self.state.command_status = CommandStatus::Idle;
            return;
        }

        let src =
            &self.buffers.inbound.as_slice()[MESSAGE_HEADER_SIZE..MESSAGE_HEADER_SIZE + payload_len];
        self.buffers.response.fill_from(src);
        self.state.command_status = CommandStatus::Idle;
    }

    pub(crate) fn apply_identity(&mut self, info: IdentifyInfo) {
        if let Some(prev) = &self.id_info {
            if prev.build_id != info.build_id {
                info!(
                    previous = prev.build_id,
                    current = info.build_id,
                    "Firmware build changed"
                );
            }
        }
        debug!(
            mode = format!("0x{:02X}", info.mode),
            build_id = info.build_id,
            "Device identified"
        );
        self.device_mode = info.mode;
        self.state.legacy = info.is_legacy();
        self.id_info = Some(info);
    }

    fn complete_ok(&mut self) {
        self.state.response_code = STATUS_OK;
        self.state.command_status = CommandStatus::Idle;
    }
}
