//! Wire contract between the app and the privileged helper.
//!
//! Newline-delimited JSON frames over a Unix domain socket, one logical call
//! per connection. Status codes travel as plain integers and are mapped by
//! hand on each side: the helper and the app are separate executables, and
//! neither may assume the other's in-memory enum layout.

use std::io::{BufRead, Write};
use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::Error;

pub const SOCKET_PATH: &str = "/var/run/chargecap.sock";
pub const HELPER_SERVICE_NAME: &str = "com.chargecap.helper";
pub const HELPER_EXECUTABLE_PATH: &str = "/Library/PrivilegedHelperTools/com.chargecap.helper";
pub const HELPER_PLIST_PATH: &str = "/Library/LaunchDaemons/com.chargecap.helper.plist";

/// Caller-side deadline for one helper call. The helper and its transport
/// are external processes and must not be allowed to wedge the control loop.
pub const CALL_DEADLINE: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HelperRequest {
    SetChargingEnabled { enabled: bool },
    SetChargeLimit { percent: u8 },
    ReadKey { key: String },
    DiagnoseChargeLimit { percent: u8 },
}

/// Reply statuses, with their on-wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperStatus {
    Ok,
    PermissionDenied,
    KeyNotFound,
    TypeMismatch,
    SmcUnavailable,
    WriteFailed,
    InvalidKey,
    Unknown,
}

impl HelperStatus {
    pub const fn code(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::PermissionDenied => 1,
            Self::KeyNotFound => 2,
            Self::TypeMismatch => 3,
            Self::SmcUnavailable => 4,
            Self::WriteFailed => 5,
            Self::InvalidKey => 6,
            Self::Unknown => 99,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::PermissionDenied,
            2 => Self::KeyNotFound,
            3 => Self::TypeMismatch,
            4 => Self::SmcUnavailable,
            5 => Self::WriteFailed,
            6 => Self::InvalidKey,
            _ => Self::Unknown,
        }
    }

    /// Helper side: the status to report for a failed operation.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::PermissionDenied => Self::PermissionDenied,
            Error::KeyNotFound => Self::KeyNotFound,
            Error::TypeMismatch => Self::TypeMismatch,
            Error::SmcUnavailable => Self::SmcUnavailable,
            Error::WriteFailed => Self::WriteFailed,
            Error::InvalidKey => Self::InvalidKey,
            _ => Self::Unknown,
        }
    }

    /// App side: the error a reply status stands for, `None` for `Ok`.
    pub fn into_error(self) -> Option<Error> {
        match self {
            Self::Ok => None,
            Self::PermissionDenied => Some(Error::PermissionDenied),
            Self::KeyNotFound => Some(Error::KeyNotFound),
            Self::TypeMismatch => Some(Error::TypeMismatch),
            Self::SmcUnavailable => Some(Error::SmcUnavailable),
            Self::WriteFailed => Some(Error::WriteFailed),
            Self::InvalidKey => Some(Error::InvalidKey),
            Self::Unknown => Some(Error::Unknown("helper reported an unknown failure".into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperReply {
    pub status: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<DiagnosticReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading: Option<ReadKeyReply>,
}

impl HelperReply {
    pub fn ok() -> Self {
        Self { status: HelperStatus::Ok.code(), diagnostic: None, reading: None }
    }

    pub fn from_status(status: HelperStatus) -> Self {
        Self { status: status.code(), diagnostic: None, reading: None }
    }
}

/// Staged result of a charge-limit write probe, field-for-field what the
/// diagnostics report shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticReply {
    pub stage: u32,
    pub kern_return: i32,
    pub data_size: u32,
    pub data_type: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadKeyReply {
    pub stage: u32,
    pub kern_return: i32,
    pub data_size: u32,
    pub data_type: u32,
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

/// Writes one JSON frame followed by a newline.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> std::io::Result<()> {
    serde_json::to_writer(&mut *writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Reads one newline-delimited JSON frame. EOF before any data yields
/// `UnexpectedEof`.
pub fn read_frame<R: BufRead, T: DeserializeOwned>(reader: &mut R) -> std::io::Result<T> {
    let mut line = String::new();
    let read = reader.read_line(&mut line)?;
    if read == 0 {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip() {
        for status in [
            HelperStatus::Ok,
            HelperStatus::PermissionDenied,
            HelperStatus::KeyNotFound,
            HelperStatus::TypeMismatch,
            HelperStatus::SmcUnavailable,
            HelperStatus::WriteFailed,
            HelperStatus::InvalidKey,
            HelperStatus::Unknown,
        ] {
            assert_eq!(HelperStatus::from_code(status.code()), status);
        }
        assert_eq!(HelperStatus::from_code(42), HelperStatus::Unknown);
    }

    #[test]
    fn error_mapping_tables_are_inverse() {
        for err in [
            Error::PermissionDenied,
            Error::KeyNotFound,
            Error::TypeMismatch,
            Error::SmcUnavailable,
            Error::WriteFailed,
            Error::InvalidKey,
        ] {
            let status = HelperStatus::from_error(&err);
            assert_eq!(status.into_error(), Some(err));
        }
        assert_eq!(HelperStatus::Ok.into_error(), None);
    }

    #[test]
    fn request_frames_round_trip() {
        let requests = [
            HelperRequest::SetChargingEnabled { enabled: false },
            HelperRequest::SetChargeLimit { percent: 80 },
            HelperRequest::ReadKey { key: "CHTE".into() },
            HelperRequest::DiagnoseChargeLimit { percent: 75 },
        ];
        for request in requests {
            let mut buf = Vec::new();
            write_frame(&mut buf, &request).unwrap();
            let mut reader = std::io::BufReader::new(buf.as_slice());
            let decoded: HelperRequest = read_frame(&mut reader).unwrap();
            assert_eq!(decoded, request);
        }
    }

    #[test]
    fn reply_frames_round_trip_with_payloads() {
        let reply = HelperReply {
            status: HelperStatus::Ok.code(),
            diagnostic: None,
            reading: Some(ReadKeyReply {
                stage: 0,
                kern_return: 0,
                data_size: 4,
                data_type: u32::from_be_bytes(*b"hex_"),
                bytes: vec![0, 0, 0, 1],
                truncated: false,
            }),
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, &reply).unwrap();
        let mut reader = std::io::BufReader::new(buf.as_slice());
        let decoded: HelperReply = read_frame(&mut reader).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn empty_stream_is_eof() {
        let mut reader = std::io::BufReader::new(&[][..]);
        let result: std::io::Result<HelperReply> = read_frame(&mut reader);
        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
