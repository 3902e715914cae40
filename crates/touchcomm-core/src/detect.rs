//! Device bootstrap.
//!
//! Qualifies a freshly connected device by probing the bytes it pushes
//! at startup, then walks an escalation ladder until an identification
//! is in hand: read whatever is pending, ask for identification, and as
//! a last resort reset the device.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ProtocolConfig;
use crate::engine::{ResponseMode, TouchCommV2};
use crate::error::TcmError;
use crate::events::TcmObserver;
use crate::identify::IdentifyInfo;
use crate::protocol::constants::{
    BITS_IN_MESSAGE_HEADER, CMD_IDENTIFY, CMD_RESET, MESSAGE_HEADER_SIZE, MODE_UNKNOWN,
    REPORT_IDENTIFY,
};
use crate::protocol::crc::crc6;
use crate::transport::BusTransport;

/// Qualify the device behind `transport` and return a ready engine.
///
/// `startup` holds the first bytes the device pushed after power-up;
/// they must look like a valid packet header before any command is
/// spent on the bus.
pub fn detect<T: BusTransport>(
    transport: T,
    startup: &[u8],
    config: ProtocolConfig,
    observer: Arc<dyn TcmObserver>,
) -> Result<TouchCommV2<T>, TcmError> {
    if startup.len() < MESSAGE_HEADER_SIZE {
        return Err(TcmError::InvalidArgument(format!(
            "startup sample of {} bytes is shorter than a header",
            startup.len()
        )));
    }
    if crc6(&startup[..MESSAGE_HEADER_SIZE], BITS_IN_MESSAGE_HEADER) != 0 {
        debug!("Startup bytes do not frame as a packet header");
        return Err(TcmError::NoDevice);
    }

    let mut engine = TouchCommV2::new(transport, config, observer);

    let identified = matches!(engine.read_message(), Ok(code) if code == REPORT_IDENTIFY);
    if !identified {
        debug!("No identify report pending, requesting identification");
        let polling = ResponseMode::Polling(engine.config.polling_interval());
        if engine.write_message(CMD_IDENTIFY, &[], 0, polling).is_err() {
            warn!("Identification request failed, resetting the device");
            let after_reset = ResponseMode::Polling(engine.config.reset_delay());
            engine.write_message(CMD_RESET, &[], 0, after_reset)?;
        }
    }

    // The identify payload normally arrives as a report and is folded
    // in by dispatch; a plain response still carries it in the inbound
    // buffer.
    if engine.device_mode == MODE_UNKNOWN {
        let payload_len = engine.state.payload_length;
        let payload =
            &engine.buffers.inbound.as_slice()[MESSAGE_HEADER_SIZE..MESSAGE_HEADER_SIZE + payload_len];
        match IdentifyInfo::parse(payload) {
            Ok(parsed) => engine.apply_identity(parsed),
            Err(err) => {
                warn!(error = %err, "Device never produced a usable identification");
                return Err(TcmError::NoDevice);
            }
        }
    }

    engine.negotiate_transfer_sizes()?;

    // v2 firmware always protects payloads with the trailing CRC and
    // never pads transfers with the extra trailer byte.
    engine.state.payload_crc = true;
    engine.state.extra_trailer_byte = false;

    if let Some(info) = &engine.id_info {
        info!(
            mode = format!("0x{:02X}", info.mode),
            build_id = info.build_id,
            legacy = info.is_legacy(),
            "TouchComm v2 device ready"
        );
    }
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use byteorder::{ByteOrder, LittleEndian};

    use crate::engine::testutil::{fast_config, frame, header_only};
    use crate::error::TcmError;
    use crate::events::NullObserver;
    use crate::protocol::constants::{
        CMD_IDENTIFY, CMD_SET_MAX_READ_LENGTH, REPORT_IDENTIFY, STATUS_CONTINUED_READ, STATUS_OK,
    };
    use crate::protocol::header::encode_header;
    use crate::transport::MockBus;

    use super::detect;

    fn identify_payload(max_write: u16, max_read: u16) -> Vec<u8> {
        let mut payload = vec![0u8; 28];
        payload[0] = 0x10;
        payload[1] = 0x01;
        payload[2..9].copy_from_slice(b"TD-4100");
        LittleEndian::write_u32(&mut payload[18..22], 0x00BEEF);
        LittleEndian::write_u16(&mut payload[22..24], max_write);
        LittleEndian::write_u16(&mut payload[24..26], max_read);
        LittleEndian::write_u16(&mut payload[26..28], max_read);
        payload
    }

    #[test]
    fn pending_identify_report_bootstraps_the_engine() {
        let bus = MockBus::new();
        bus.queue_read(&header_only(REPORT_IDENTIFY, 28, 1));
        bus.queue_read(&frame(
            STATUS_CONTINUED_READ,
            28,
            &identify_payload(0x0020, 0x0040),
            1,
        ));
        // Acknowledgment of the read-length negotiation.
        bus.queue_read(&header_only(STATUS_OK, 0, 0));

        let startup = encode_header(REPORT_IDENTIFY, 0, 28);
        let engine = detect(bus.clone(), &startup, fast_config(), Arc::new(NullObserver)).unwrap();

        assert_eq!(engine.max_write_size, 32);
        assert_eq!(engine.max_read_size, 64);
        assert_eq!(engine.device_mode, 0x01);
        assert!(!engine.state.legacy);

        let negotiation = bus.writes().last().unwrap().clone();
        assert_eq!(negotiation[0], CMD_SET_MAX_READ_LENGTH);
        assert_eq!(LittleEndian::read_u16(&negotiation[4..6]), 64);
    }

    #[test]
    fn silent_device_is_asked_to_identify() {
        let bus = MockBus::new();
        // The report fetch finds nothing usable.
        bus.queue_read(&header_only(STATUS_OK, 0, 1));
        // The identify command answers inline.
        bus.queue_read(&header_only(STATUS_OK, 28, 0));
        bus.queue_read(&frame(
            STATUS_CONTINUED_READ,
            28,
            &identify_payload(0x0020, 0x0040),
            0,
        ));
        bus.queue_read(&header_only(STATUS_OK, 0, 1));

        let startup = encode_header(0x00, 0, 0);
        let engine = detect(bus.clone(), &startup, fast_config(), Arc::new(NullObserver)).unwrap();

        assert_eq!(engine.device_mode, 0x01);
        assert!(bus.writes().iter().any(|w| w[0] == CMD_IDENTIFY));
    }

    #[test]
    fn garbage_startup_bytes_mean_no_device() {
        let bus = MockBus::new();
        let result = detect(
            bus,
            &[0xDE, 0xAD, 0xBE, 0xEF],
            fast_config(),
            Arc::new(NullObserver),
        );
        assert!(matches!(result, Err(TcmError::NoDevice)));
    }

    #[test]
    fn truncated_startup_sample_is_rejected() {
        let bus = MockBus::new();
        let result = detect(bus, &[0x10], fast_config(), Arc::new(NullObserver));
        assert!(matches!(result, Err(TcmError::InvalidArgument(_))));
    }
}
