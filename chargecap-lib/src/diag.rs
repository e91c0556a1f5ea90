//! Read-only troubleshooting reports.
//!
//! These mirror the transport's stage/return-code vocabulary verbatim so a
//! user can paste the output of `chargecap diagnose` into a bug report. The
//! control path never depends on anything in this module.

use crate::error::Error;
use crate::io::{
    self, KeyInfo, SmcIo, validate_definition,
};
use crate::key::{KeyDefinition, SmcKey};
use crate::proto::HelperStatus;

/// How far a key-list scan got. Codes are wire values shared with the
/// helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyListStage {
    Ok,
    ServiceNotFound,
    ServiceOpenFailed,
    UserClientOpenFailed,
    KeyCountFailed,
    KeyReadFailed,
    Unknown,
}

impl KeyListStage {
    pub const fn code(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::ServiceNotFound => 1,
            Self::ServiceOpenFailed => 2,
            Self::UserClientOpenFailed => 3,
            Self::KeyCountFailed => 4,
            Self::KeyReadFailed => 5,
            Self::Unknown => 99,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::ServiceNotFound => "AppleSMC service not found",
            Self::ServiceOpenFailed => "service open failed",
            Self::UserClientOpenFailed => "user client open failed",
            Self::KeyCountFailed => "key count read failed",
            Self::KeyReadFailed => "key list read failed",
            Self::Unknown => "unknown",
        }
    }
}

/// How far a single-key read got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyReadStage {
    Ok,
    InvalidKey,
    ServiceNotFound,
    ServiceOpenFailed,
    UserClientOpenFailed,
    KeyInfoFailed,
    KeyInfoInvalid,
    ReadFailed,
    Unknown,
}

impl KeyReadStage {
    pub const fn code(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::InvalidKey => 1,
            Self::ServiceNotFound => 2,
            Self::ServiceOpenFailed => 3,
            Self::UserClientOpenFailed => 4,
            Self::KeyInfoFailed => 5,
            Self::KeyInfoInvalid => 6,
            Self::ReadFailed => 7,
            Self::Unknown => 99,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::InvalidKey,
            2 => Self::ServiceNotFound,
            3 => Self::ServiceOpenFailed,
            4 => Self::UserClientOpenFailed,
            5 => Self::KeyInfoFailed,
            6 => Self::KeyInfoInvalid,
            7 => Self::ReadFailed,
            _ => Self::Unknown,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::InvalidKey => "key name invalid",
            Self::ServiceNotFound => "AppleSMC service not found",
            Self::ServiceOpenFailed => "service open failed",
            Self::UserClientOpenFailed => "user client open failed",
            Self::KeyInfoFailed => "key info read failed",
            Self::KeyInfoInvalid => "key info invalid",
            Self::ReadFailed => "read failed",
            Self::Unknown => "unknown",
        }
    }
}

/// How far a charge-limit write probe got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnoseStage {
    Ok,
    InvalidKey,
    ServiceNotFound,
    ServiceOpenFailed,
    UserClientOpenFailed,
    KeyInfoFailed,
    KeyInfoInvalid,
    TypeMismatch,
    WriteFailed,
    Unknown,
}

impl DiagnoseStage {
    pub const fn code(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::InvalidKey => 1,
            Self::ServiceNotFound => 2,
            Self::ServiceOpenFailed => 3,
            Self::UserClientOpenFailed => 4,
            Self::KeyInfoFailed => 5,
            Self::KeyInfoInvalid => 6,
            Self::TypeMismatch => 7,
            Self::WriteFailed => 8,
            Self::Unknown => 99,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::InvalidKey,
            2 => Self::ServiceNotFound,
            3 => Self::ServiceOpenFailed,
            4 => Self::UserClientOpenFailed,
            5 => Self::KeyInfoFailed,
            6 => Self::KeyInfoInvalid,
            7 => Self::TypeMismatch,
            8 => Self::WriteFailed,
            _ => Self::Unknown,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::InvalidKey => "key name invalid",
            Self::ServiceNotFound => "AppleSMC service not found",
            Self::ServiceOpenFailed => "service open failed",
            Self::UserClientOpenFailed => "user client open failed",
            Self::KeyInfoFailed => "key info read failed",
            Self::KeyInfoInvalid => "key info invalid",
            Self::TypeMismatch => "key size or type mismatch",
            Self::WriteFailed => "write failed",
            Self::Unknown => "unknown",
        }
    }
}

/// Result of scanning the key index for charge-control-relevant names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyListReport {
    pub stage: KeyListStage,
    pub kern_return: i32,
    pub key_count: u32,
    pub scanned: u32,
    pub candidates: Vec<String>,
}

/// Result of reading one key, stage by stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyReadReport {
    pub key: String,
    pub stage: KeyReadStage,
    pub kern_return: i32,
    pub data_size: u32,
    pub data_type: u32,
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

/// Result of a staged charge-limit write probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeLimitDiagnosis {
    pub status: HelperStatus,
    pub stage: DiagnoseStage,
    pub kern_return: i32,
    pub data_size: u32,
    pub data_type: u32,
}

/// The kern return a taxonomy error most plausibly came from. Reports carry
/// raw-looking codes even when the transport has already collapsed them.
pub fn kern_return_for(err: &Error) -> i32 {
    match err {
        Error::PermissionDenied => io::IO_RETURN_NOT_PRIVILEGED,
        Error::SmcUnavailable => io::IO_RETURN_NO_DEVICE,
        Error::KeyNotFound => io::IO_RETURN_NOT_FOUND,
        Error::TypeMismatch => io::IO_RETURN_UNSUPPORTED,
        _ => io::IO_RETURN_ERROR,
    }
}

pub fn kern_name(code: i32) -> &'static str {
    match code {
        io::KERN_SUCCESS => "KERN_SUCCESS",
        io::IO_RETURN_ERROR => "kIOReturnError",
        io::IO_RETURN_NO_DEVICE => "kIOReturnNoDevice",
        io::IO_RETURN_NOT_PRIVILEGED => "kIOReturnNotPrivileged",
        io::IO_RETURN_UNSUPPORTED => "kIOReturnUnsupported",
        io::IO_RETURN_NOT_OPEN => "kIOReturnNotOpen",
        io::IO_RETURN_NOT_PERMITTED => "kIOReturnNotPermitted",
        io::IO_RETURN_NOT_FOUND => "kIOReturnNotFound",
        _ => "unknown",
    }
}

pub fn format_kern_return(code: i32) -> String {
    format!("{} ({})", code, kern_name(code))
}

/// FourCC type code as text plus hex, e.g. `ui8  (0x75693820)`.
pub fn format_data_type(code: u32) -> String {
    if code == 0 {
        return "unknown".to_string();
    }
    match SmcKey::decode(code) {
        Some(key) => format!("{} (0x{:08X})", key, code),
        None => format!("0x{:08X}", code),
    }
}

/// Hex dump with a decimal rendering for the common fixed-width sizes.
pub fn format_bytes(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "empty".to_string();
    }
    let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
    match bytes.len() {
        1 => format!("0x{} (u8={})", hex, bytes[0]),
        2 => {
            let value = u16::from_be_bytes([bytes[0], bytes[1]]);
            format!("0x{} (u16={})", hex, value)
        }
        4 => {
            let value = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            format!("0x{} (u32={})", hex, value)
        }
        _ => format!("0x{}", hex),
    }
}

fn is_charge_control_candidate(name: &str) -> bool {
    name.starts_with("CH") || name == "BCLM"
}

/// Scans the whole key index, collecting charge-control-relevant names.
pub fn key_list_report(io: &dyn SmcIo) -> KeyListReport {
    let key_count = match io.key_count() {
        Ok(count) => count,
        Err(err) => {
            let stage = match err {
                Error::SmcUnavailable => KeyListStage::ServiceNotFound,
                Error::PermissionDenied => KeyListStage::ServiceOpenFailed,
                _ => KeyListStage::KeyCountFailed,
            };
            return KeyListReport {
                stage,
                kern_return: kern_return_for(&err),
                key_count: 0,
                scanned: 0,
                candidates: Vec::new(),
            };
        }
    };

    let mut candidates = Vec::new();
    let mut scanned = 0;
    for index in 0..key_count {
        match io.key_at_index(index) {
            Ok(key) => {
                scanned += 1;
                let name = key.to_string();
                if is_charge_control_candidate(&name) {
                    candidates.push(name);
                }
            }
            Err(err) => {
                return KeyListReport {
                    stage: KeyListStage::KeyReadFailed,
                    kern_return: kern_return_for(&err),
                    key_count,
                    scanned,
                    candidates,
                };
            }
        }
    }

    KeyListReport {
        stage: KeyListStage::Ok,
        kern_return: io::KERN_SUCCESS,
        key_count,
        scanned,
        candidates,
    }
}

/// Reads one key and records where the attempt stopped.
pub fn read_key_report(io: &dyn SmcIo, name: &str) -> KeyReadReport {
    let key = match SmcKey::new(name) {
        Ok(key) => key,
        Err(_) => {
            return KeyReadReport {
                key: name.to_string(),
                stage: KeyReadStage::InvalidKey,
                kern_return: io::KERN_SUCCESS,
                data_size: 0,
                data_type: 0,
                bytes: Vec::new(),
                truncated: false,
            };
        }
    };
    match io.read_key(key) {
        Ok(reading) => KeyReadReport {
            key: name.to_string(),
            stage: KeyReadStage::Ok,
            kern_return: io::KERN_SUCCESS,
            data_size: reading.data_size,
            data_type: reading.data_type,
            bytes: reading.bytes,
            truncated: reading.truncated,
        },
        Err(err) => {
            let stage = match err {
                Error::SmcUnavailable => KeyReadStage::ServiceNotFound,
                Error::PermissionDenied => KeyReadStage::ServiceOpenFailed,
                Error::KeyNotFound => KeyReadStage::KeyInfoInvalid,
                Error::ReadFailed => KeyReadStage::ReadFailed,
                _ => KeyReadStage::Unknown,
            };
            KeyReadReport {
                key: name.to_string(),
                stage,
                kern_return: kern_return_for(&err),
                data_size: 0,
                data_type: 0,
                bytes: Vec::new(),
                truncated: false,
            }
        }
    }
}

/// Probes the charge-limit register stage by stage and, when everything
/// checks out, performs the actual write.
pub fn diagnose_charge_limit(
    io: &dyn SmcIo,
    def: &KeyDefinition,
    percent: u8,
) -> ChargeLimitDiagnosis {
    let info: KeyInfo = match io.key_info(def.key) {
        Ok(info) => info,
        Err(err) => {
            let stage = match err {
                Error::SmcUnavailable => DiagnoseStage::ServiceNotFound,
                Error::PermissionDenied => DiagnoseStage::ServiceOpenFailed,
                Error::KeyNotFound => DiagnoseStage::KeyInfoInvalid,
                _ => DiagnoseStage::KeyInfoFailed,
            };
            return ChargeLimitDiagnosis {
                status: HelperStatus::from_error(&err),
                stage,
                kern_return: kern_return_for(&err),
                data_size: 0,
                data_type: 0,
            };
        }
    };

    if validate_definition(io, def).is_err() {
        return ChargeLimitDiagnosis {
            status: HelperStatus::TypeMismatch,
            stage: DiagnoseStage::TypeMismatch,
            kern_return: io::KERN_SUCCESS,
            data_size: info.data_size,
            data_type: info.data_type,
        };
    }

    match io.write_key(def, &[percent]) {
        Ok(()) => ChargeLimitDiagnosis {
            status: HelperStatus::Ok,
            stage: DiagnoseStage::Ok,
            kern_return: io::KERN_SUCCESS,
            data_size: info.data_size,
            data_type: info.data_type,
        },
        Err(err) => ChargeLimitDiagnosis {
            status: HelperStatus::from_error(&err),
            stage: DiagnoseStage::WriteFailed,
            kern_return: kern_return_for(&err),
            data_size: info.data_size,
            data_type: info.data_type,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mock::MockSmc;
    use crate::key::firmware_limit_key;

    #[test]
    fn key_list_scan_collects_charge_control_names() {
        let io = MockSmc::new()
            .with_key("CHTE", "hex_", 4)
            .with_key("TB0T", "flt ", 4)
            .with_key("BCLM", "ui8 ", 1)
            .with_key("CH0B", "hex_", 1);
        let report = key_list_report(&io);
        assert_eq!(report.stage, KeyListStage::Ok);
        assert_eq!(report.key_count, 4);
        assert_eq!(report.scanned, 4);
        assert_eq!(report.candidates, ["CHTE", "BCLM", "CH0B"]);
    }

    #[test]
    fn key_list_scan_reports_an_unreachable_controller() {
        let report = key_list_report(&MockSmc::unavailable());
        assert_eq!(report.stage, KeyListStage::ServiceNotFound);
        assert_eq!(report.kern_return, io::IO_RETURN_NO_DEVICE);
        assert!(report.candidates.is_empty());
    }

    #[test]
    fn read_report_flags_invalid_names() {
        let io = MockSmc::new();
        let report = read_key_report(&io, "toolong");
        assert_eq!(report.stage, KeyReadStage::InvalidKey);
    }

    #[test]
    fn read_report_carries_value_bytes() {
        let io = MockSmc::new().with_key_bytes("CHTE", "hex_", 4, vec![0, 0, 0, 1]);
        let report = read_key_report(&io, "CHTE");
        assert_eq!(report.stage, KeyReadStage::Ok);
        assert_eq!(report.bytes, [0, 0, 0, 1]);
        assert!(!report.truncated);
    }

    #[test]
    fn diagnose_reports_a_clean_write() {
        let io = MockSmc::new().with_key("BCLM", "ui8 ", 1);
        let diagnosis = diagnose_charge_limit(&io, &firmware_limit_key(), 80);
        assert_eq!(diagnosis.status, HelperStatus::Ok);
        assert_eq!(diagnosis.stage, DiagnoseStage::Ok);
        assert_eq!(io.writes(), [("BCLM".to_string(), vec![80])]);
    }

    #[test]
    fn diagnose_stops_at_a_size_mismatch() {
        let io = MockSmc::new().with_key("BCLM", "ui8 ", 2);
        let diagnosis = diagnose_charge_limit(&io, &firmware_limit_key(), 80);
        assert_eq!(diagnosis.status, HelperStatus::TypeMismatch);
        assert_eq!(diagnosis.stage, DiagnoseStage::TypeMismatch);
        assert_eq!(diagnosis.data_size, 2);
        assert!(io.writes().is_empty());
    }

    #[test]
    fn byte_renderings_match_width() {
        assert_eq!(format_bytes(&[]), "empty");
        assert_eq!(format_bytes(&[0x50]), "0x50 (u8=80)");
        assert_eq!(format_bytes(&[0x01, 0x00]), "0x0100 (u16=256)");
        assert_eq!(format_bytes(&[0, 0, 0, 2]), "0x00000002 (u32=2)");
        assert_eq!(format_bytes(&[1, 2, 3]), "0x010203");
    }

    #[test]
    fn data_type_rendering_decodes_fourcc() {
        assert_eq!(format_data_type(0), "unknown");
        assert_eq!(
            format_data_type(u32::from_be_bytes(*b"ui8 ")),
            "ui8  (0x75693820)"
        );
    }

    #[test]
    fn kern_formatting_names_known_codes() {
        assert_eq!(format_kern_return(io::KERN_SUCCESS), "0 (KERN_SUCCESS)");
        assert!(format_kern_return(io::IO_RETURN_NOT_PRIVILEGED).contains("kIOReturnNotPrivileged"));
    }
}
