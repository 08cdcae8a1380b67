use crate::device::constants::{STATUS_DYSKINESIA, STATUS_PAYLOAD_LEN, STATUS_TREMOR, STATUS_TREMOR_AND_DYSKINESIA};
use crate::device::types::{TremorReading, TremorState};
use crate::error::DecodeError;

pub fn decode_state(raw_value: u16) -> TremorState {
    match raw_value {
        STATUS_TREMOR => TremorState::Tremor,
        STATUS_DYSKINESIA => TremorState::Dyskinesia,
        STATUS_TREMOR_AND_DYSKINESIA => TremorState::TremorAndDyskinesia,
        other => TremorState::Unknown(other),
    }
}

/// Decodes a status notification. The first two bytes are a little endian `u16`,
/// anything after them is ignored.
pub fn decode(bytes: &[u8]) -> Result<TremorReading, DecodeError> {
    if bytes.len() < STATUS_PAYLOAD_LEN {
        return Err(DecodeError::PayloadTooShort { len: bytes.len() });
    }

    let raw_value = u16::from_le_bytes([bytes[0], bytes[1]]);

    Ok(TremorReading {
        raw_value,
        decoded_state: decode_state(raw_value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_payloads_are_rejected() {
        assert_eq!(decode(&[]), Err(DecodeError::PayloadTooShort { len: 0 }));
        assert_eq!(decode(&[0x01]), Err(DecodeError::PayloadTooShort { len: 1 }));
    }

    #[test]
    fn status_codes_are_little_endian() {
        assert_eq!(decode(&[0x01, 0x00]).unwrap().decoded_state, TremorState::Tremor);
        assert_eq!(decode(&[0x00, 0x02]).unwrap().decoded_state, TremorState::Dyskinesia);
        assert_eq!(decode(&[0x01, 0x02]).unwrap().decoded_state, TremorState::TremorAndDyskinesia);
        assert_eq!(decode(&[0xFF, 0xFF]).unwrap().decoded_state, TremorState::Unknown(0xFFFF));

        // big endian reading of "tremor" is not a known code
        assert_eq!(decode(&[0x00, 0x01]).unwrap().decoded_state, TremorState::Unknown(0x0100));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let reading = decode(&[0x01, 0x02, 0xAA, 0xBB, 0xCC]).unwrap();
        assert_eq!(reading.raw_value, 0x0201);
        assert_eq!(reading.decoded_state, TremorState::TremorAndDyskinesia);
    }

    #[test]
    fn every_status_code_decodes() {
        for raw in 0..=u16::MAX {
            let reading = decode(&raw.to_le_bytes()).unwrap();
            assert_eq!(reading.raw_value, raw);

            let expected = match raw {
                0x0001 => TremorState::Tremor,
                0x0200 => TremorState::Dyskinesia,
                0x0201 => TremorState::TremorAndDyskinesia,
                other => TremorState::Unknown(other),
            };
            assert_eq!(reading.decoded_state, expected);
        }
    }

    #[test]
    fn states_have_display_labels() {
        assert_eq!(TremorState::Tremor.to_string(), "Tremor Detected");
        assert_eq!(TremorState::Dyskinesia.to_string(), "Dyskinesia Detected");
        assert_eq!(TremorState::TremorAndDyskinesia.to_string(), "Tremor and Dyskinesia Detected");
        assert_eq!(TremorState::Unknown(0x2A).to_string(), "Unknown State: 0x002A");
    }
}
