//! Firmware error code decoder
//! Converts `ERROR:<code>` codes to named conditions

use gcodeservice_core::FirmwareErrorKind;

/// Decode a firmware error code
pub fn decode_error(code: &str) -> FirmwareErrorKind {
    match code.trim() {
        "100" => FirmwareErrorKind::Killed,
        "101" => FirmwareErrorKind::Stopped,
        "102" => FirmwareErrorKind::DoorOpen,
        "103" => FirmwareErrorKind::MinTemp,
        "104" => FirmwareErrorKind::MaxTemp,
        "105" => FirmwareErrorKind::MaxBedTemp,
        "106" => FirmwareErrorKind::XMaxEndstop,
        "107" => FirmwareErrorKind::XMinEndstop,
        "108" => FirmwareErrorKind::YMaxEndstop,
        "109" => FirmwareErrorKind::YMinEndstop,
        "110" => FirmwareErrorKind::IdleSafety,
        "120" => FirmwareErrorKind::YBothTriggered,
        "121" => FirmwareErrorKind::ZBothTriggered,
        other => FirmwareErrorKind::Unknown(other.to_string()),
    }
}

/// Whether the condition leaves the machine unable to continue a job
pub fn is_fatal(kind: &FirmwareErrorKind) -> bool {
    matches!(
        kind,
        FirmwareErrorKind::Killed
            | FirmwareErrorKind::Stopped
            | FirmwareErrorKind::MaxTemp
            | FirmwareErrorKind::MaxBedTemp
            | FirmwareErrorKind::MinTemp
    )
}

/// Format an error code for logging
pub fn format_error(code: &str) -> String {
    format!("error:{} ({})", code.trim(), decode_error(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_codes() {
        assert_eq!(decode_error("100"), FirmwareErrorKind::Killed);
        assert_eq!(decode_error("102"), FirmwareErrorKind::DoorOpen);
        assert_eq!(decode_error(" 110 "), FirmwareErrorKind::IdleSafety);
        assert_eq!(decode_error("121"), FirmwareErrorKind::ZBothTriggered);
    }

    #[test]
    fn test_decode_unknown_code() {
        assert_eq!(
            decode_error("111"),
            FirmwareErrorKind::Unknown("111".to_string())
        );
        assert_eq!(decode_error(""), FirmwareErrorKind::Unknown(String::new()));
    }

    #[test]
    fn test_fatal_conditions() {
        assert!(is_fatal(&FirmwareErrorKind::Killed));
        assert!(!is_fatal(&FirmwareErrorKind::DoorOpen));
        assert!(!is_fatal(&FirmwareErrorKind::Unknown("7".to_string())));
    }

    #[test]
    fn test_format_error() {
        assert_eq!(format_error("104"), "error:104 (ERROR_MAX_TEMP)");
    }
}
