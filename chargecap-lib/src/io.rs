//! SMC transport: a trait seam over the AppleSMC user client.
//!
//! Every operation opens a fresh connection and closes it before returning.
//! Calls happen at most about once a minute, and a pooled connection would
//! pin a kernel resource across app suspend/resume for no gain.

use crate::error::{Error, Result};
use crate::key::{KeyDefinition, SmcKey};
use crate::structs::{SMC_BYTES_LEN, SmcBytes};

/// IOKit return codes this crate cares about, as `kern_return_t` values.
/// Spelled out here so the mapping (and the diagnostics that mirror it) can
/// be exercised on any platform.
pub const KERN_SUCCESS: i32 = 0;
pub const IO_RETURN_ERROR: i32 = 0xE000_02BCu32 as i32;
pub const IO_RETURN_NO_DEVICE: i32 = 0xE000_02C0u32 as i32;
pub const IO_RETURN_NOT_PRIVILEGED: i32 = 0xE000_02C1u32 as i32;
pub const IO_RETURN_UNSUPPORTED: i32 = 0xE000_02C7u32 as i32;
pub const IO_RETURN_NOT_OPEN: i32 = 0xE000_02CDu32 as i32;
pub const IO_RETURN_NOT_PERMITTED: i32 = 0xE000_02E2u32 as i32;
pub const IO_RETURN_NOT_FOUND: i32 = 0xE000_02F0u32 as i32;

/// Maps a non-success kernel return to the shared taxonomy. `fallback` is the
/// per-operation failure kind (read or write).
pub fn map_kern_return(code: i32, fallback: Error) -> Error {
    match code {
        IO_RETURN_NOT_PRIVILEGED | IO_RETURN_NOT_PERMITTED => Error::PermissionDenied,
        IO_RETURN_NO_DEVICE => Error::SmcUnavailable,
        _ => fallback,
    }
}

/// Size and type the firmware reports for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInfo {
    pub data_size: u32,
    pub data_type: u32,
}

/// A decoded read: at most [`SMC_BYTES_LEN`] bytes of payload, with the
/// `truncated` flag set when the firmware reported more than fits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmcReading {
    pub key: SmcKey,
    pub data_size: u32,
    pub data_type: u32,
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

impl SmcReading {
    pub(crate) fn from_raw(key: SmcKey, data_size: u32, data_type: u32, raw: &SmcBytes) -> Self {
        let take = (data_size as usize).min(SMC_BYTES_LEN);
        Self {
            key,
            data_size,
            data_type,
            bytes: raw[..take].to_vec(),
            truncated: data_size as usize > SMC_BYTES_LEN,
        }
    }
}

/// The transport seam. The resolver, router, controller, and diagnostics all
/// talk to the SMC through this trait, so they can be driven against a fake
/// in tests and reused verbatim inside the privileged helper.
pub trait SmcIo {
    /// Fails with [`Error::KeyNotFound`] when the firmware reports a zero
    /// size for the key.
    fn key_info(&self, key: SmcKey) -> Result<KeyInfo>;

    fn read_key(&self, key: SmcKey) -> Result<SmcReading>;

    /// Validates `value` against the definition and the probed key info
    /// before writing; a disagreement fails with [`Error::TypeMismatch`].
    fn write_key(&self, def: &KeyDefinition, value: &[u8]) -> Result<()>;

    /// Total number of keys, read from `#KEY` (falling back to `NKEY`).
    /// Diagnostics only; the control path never enumerates.
    fn key_count(&self) -> Result<u32>;

    fn key_at_index(&self, index: u32) -> Result<SmcKey>;
}

/// Probes a key definition and checks the reported size and (when the
/// definition pins one) type against it.
pub fn validate_definition(io: &dyn SmcIo, def: &KeyDefinition) -> Result<KeyInfo> {
    let info = io.key_info(def.key)?;
    if info.data_size as usize != def.data_size {
        return Err(Error::TypeMismatch);
    }
    if let Some(expected) = def.data_type
        && expected.code() != info.data_type
    {
        return Err(Error::TypeMismatch);
    }
    Ok(info)
}

/// Returns the platform transport: the IOKit-backed one on macOS, a stub
/// that reports [`Error::SmcUnavailable`] everywhere else.
#[cfg(target_os = "macos")]
pub fn platform_smc() -> std::sync::Arc<dyn SmcIo + Send + Sync> {
    std::sync::Arc::new(IoKitSmc::new())
}

#[cfg(not(target_os = "macos"))]
pub fn platform_smc() -> std::sync::Arc<dyn SmcIo + Send + Sync> {
    std::sync::Arc::new(UnsupportedSmc)
}

/// Stand-in transport for platforms without an SMC.
#[cfg(not(target_os = "macos"))]
pub struct UnsupportedSmc;

#[cfg(not(target_os = "macos"))]
impl SmcIo for UnsupportedSmc {
    fn key_info(&self, _key: SmcKey) -> Result<KeyInfo> {
        Err(Error::SmcUnavailable)
    }

    fn read_key(&self, _key: SmcKey) -> Result<SmcReading> {
        Err(Error::SmcUnavailable)
    }

    fn write_key(&self, _def: &KeyDefinition, _value: &[u8]) -> Result<()> {
        Err(Error::SmcUnavailable)
    }

    fn key_count(&self) -> Result<u32> {
        Err(Error::SmcUnavailable)
    }

    fn key_at_index(&self, _index: u32) -> Result<SmcKey> {
        Err(Error::SmcUnavailable)
    }
}

#[cfg(target_os = "macos")]
pub use iokit::IoKitSmc;

#[cfg(target_os = "macos")]
mod iokit {
    use super::{KeyInfo, SmcIo, SmcReading, map_kern_return};
    use crate::error::{Error, Result};
    use crate::key::{KeyDefinition, SmcKey};
    use crate::structs::{
        KERNEL_INDEX_SMC, SMC_BYTES_LEN, SMC_CMD_READ_BYTES, SMC_CMD_READ_INDEX,
        SMC_CMD_READ_KEYINFO, SMC_CMD_WRITE_BYTES, SMC_RESULT_KEY_NOT_FOUND, SmcKeyData,
        fill_payload,
    };
    use libc::KERN_SUCCESS;
    use objc2_io_kit::{
        IOConnectCallStructMethod, IOIteratorNext, IOMainPort, IOObjectRelease, IOServiceClose,
        IOServiceGetMatchingServices, IOServiceMatching, IOServiceOpen, io_connect_t,
    };
    use std::ffi::c_void;

    unsafe extern "C" {
        static mach_task_self_: libc::mach_port_t;
    }

    /// One open connection to the AppleSMC user client. Closed on drop.
    struct Connection {
        conn: io_connect_t,
    }

    impl Connection {
        fn open() -> Result<Self> {
            unsafe {
                let mut main_port = 0;
                let res = IOMainPort(0, &raw mut main_port);
                if res != KERN_SUCCESS {
                    return Err(Error::SmcUnavailable);
                }
                let matching_dict =
                    IOServiceMatching(c"AppleSMC".as_ptr()).and_then(|d| d.downcast().ok());
                let mut iterator = 0;
                let res =
                    IOServiceGetMatchingServices(main_port, matching_dict, &raw mut iterator);
                if res != KERN_SUCCESS {
                    return Err(Error::SmcUnavailable);
                }
                let device = IOIteratorNext(iterator);
                IOObjectRelease(iterator);
                if device == 0 {
                    return Err(Error::SmcUnavailable);
                }
                let mut conn = 0;
                let res = IOServiceOpen(device, mach_task_self_, 0, &raw mut conn);
                IOObjectRelease(device);
                if res != KERN_SUCCESS {
                    return Err(map_kern_return(res, Error::SmcUnavailable));
                }
                Ok(Self { conn })
            }
        }

        fn call(
            &self,
            input: &SmcKeyData,
            output: &mut SmcKeyData,
        ) -> std::result::Result<(), i32> {
            unsafe {
                let mut output_cnt = size_of::<SmcKeyData>();
                let res = IOConnectCallStructMethod(
                    self.conn,
                    KERNEL_INDEX_SMC,
                    input as *const _ as *const c_void,
                    size_of::<SmcKeyData>(),
                    output as *mut _ as *mut c_void,
                    &raw mut output_cnt,
                );
                if res == KERN_SUCCESS { Ok(()) } else { Err(res) }
            }
        }

        fn key_info(&self, key: SmcKey) -> Result<KeyInfo> {
            let input = SmcKeyData {
                key: key.code(),
                data8: SMC_CMD_READ_KEYINFO,
                ..Default::default()
            };
            let mut output = SmcKeyData::default();
            self.call(&input, &mut output)
                .map_err(|code| map_kern_return(code, Error::ReadFailed))?;
            if output.result == SMC_RESULT_KEY_NOT_FOUND || output.key_info.data_size == 0 {
                return Err(Error::KeyNotFound);
            }
            Ok(KeyInfo {
                data_size: output.key_info.data_size,
                data_type: output.key_info.data_type,
            })
        }

        fn read_key(&self, key: SmcKey) -> Result<SmcReading> {
            let info = self.key_info(key)?;
            let mut input = SmcKeyData {
                key: key.code(),
                data8: SMC_CMD_READ_BYTES,
                ..Default::default()
            };
            input.key_info.data_size = info.data_size;
            input.key_info.data_type = info.data_type;
            let mut output = SmcKeyData::default();
            self.call(&input, &mut output)
                .map_err(|code| map_kern_return(code, Error::ReadFailed))?;
            Ok(SmcReading::from_raw(key, info.data_size, info.data_type, &output.bytes))
        }

        fn write_key(&self, def: &KeyDefinition, value: &[u8]) -> Result<()> {
            if value.len() != def.data_size || value.len() > SMC_BYTES_LEN {
                return Err(Error::TypeMismatch);
            }
            let info = self.key_info(def.key)?;
            if info.data_size as usize != def.data_size {
                return Err(Error::TypeMismatch);
            }
            if let Some(expected) = def.data_type
                && expected.code() != info.data_type
            {
                return Err(Error::TypeMismatch);
            }
            let mut input = SmcKeyData {
                key: def.key.code(),
                data8: SMC_CMD_WRITE_BYTES,
                ..Default::default()
            };
            input.key_info.data_size = info.data_size;
            fill_payload(&mut input.bytes, value);
            let mut output = SmcKeyData::default();
            self.call(&input, &mut output)
                .map_err(|code| map_kern_return(code, Error::WriteFailed))?;
            Ok(())
        }

        fn count_from(&self, key: SmcKey) -> Result<u32> {
            let reading = self.read_key(key)?;
            if reading.bytes.len() == 4 {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&reading.bytes);
                Ok(u32::from_be_bytes(raw))
            } else {
                Err(Error::ReadFailed)
            }
        }

        fn key_count(&self) -> Result<u32> {
            match self.count_from(SmcKey::from_bytes(*b"#KEY")) {
                Err(Error::KeyNotFound) => self.count_from(SmcKey::from_bytes(*b"NKEY")),
                other => other,
            }
        }

        fn key_at_index(&self, index: u32) -> Result<SmcKey> {
            let input = SmcKeyData {
                data8: SMC_CMD_READ_INDEX,
                data32: index,
                ..Default::default()
            };
            let mut output = SmcKeyData::default();
            self.call(&input, &mut output)
                .map_err(|code| map_kern_return(code, Error::ReadFailed))?;
            SmcKey::decode(output.key).ok_or(Error::ReadFailed)
        }
    }

    impl Drop for Connection {
        fn drop(&mut self) {
            IOServiceClose(self.conn);
        }
    }

    /// The real transport. Stateless: each trait call opens its own
    /// [`Connection`] and drops it before returning.
    #[derive(Debug, Default)]
    pub struct IoKitSmc;

    impl IoKitSmc {
        pub fn new() -> Self {
            Self
        }
    }

    impl SmcIo for IoKitSmc {
        fn key_info(&self, key: SmcKey) -> Result<KeyInfo> {
            Connection::open()?.key_info(key)
        }

        fn read_key(&self, key: SmcKey) -> Result<SmcReading> {
            Connection::open()?.read_key(key)
        }

        fn write_key(&self, def: &KeyDefinition, value: &[u8]) -> Result<()> {
            Connection::open()?.write_key(def, value)
        }

        fn key_count(&self) -> Result<u32> {
            Connection::open()?.key_count()
        }

        fn key_at_index(&self, index: u32) -> Result<SmcKey> {
            Connection::open()?.key_at_index(index)
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::{KeyInfo, SmcIo, SmcReading};
    use crate::error::{Error, Result};
    use crate::key::{KeyDefinition, SmcDataType, SmcKey};
    use crate::structs::{SMC_BYTES_LEN, SmcBytes};
    use std::sync::Mutex;

    struct Entry {
        key: SmcKey,
        info: Result<KeyInfo>,
        bytes: Vec<u8>,
        write_result: Result<()>,
    }

    /// Scriptable in-memory transport for tests.
    #[derive(Default)]
    pub(crate) struct MockSmc {
        entries: Vec<Entry>,
        down: bool,
        writes: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl MockSmc {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every operation fails with `SmcUnavailable`.
        pub fn unavailable() -> Self {
            Self { down: true, ..Self::default() }
        }

        pub fn with_key(self, name: &str, type_tag: &str, size: u32) -> Self {
            let bytes = vec![0; (size as usize).min(SMC_BYTES_LEN)];
            self.with_key_bytes(name, type_tag, size, bytes)
        }

        pub fn with_key_bytes(
            mut self,
            name: &str,
            type_tag: &str,
            size: u32,
            bytes: Vec<u8>,
        ) -> Self {
            let key = SmcKey::new(name).unwrap();
            let data_type = SmcDataType::new(type_tag).map_or(0, SmcDataType::code);
            self.entries.push(Entry {
                key,
                info: Ok(KeyInfo { data_size: size, data_type }),
                bytes,
                write_result: Ok(()),
            });
            self
        }

        pub fn with_probe_error(mut self, name: &str, err: Error) -> Self {
            self.entries.push(Entry {
                key: SmcKey::new(name).unwrap(),
                info: Err(err),
                bytes: Vec::new(),
                write_result: Ok(()),
            });
            self
        }

        pub fn with_write_error(mut self, name: &str, err: Error) -> Self {
            let key = SmcKey::new(name).unwrap();
            if let Some(entry) = self.entries.iter_mut().find(|e| e.key == key) {
                entry.write_result = Err(err);
            }
            self
        }

        pub fn writes(&self) -> Vec<(String, Vec<u8>)> {
            self.writes.lock().unwrap().clone()
        }

        fn entry(&self, key: SmcKey) -> Option<&Entry> {
            self.entries.iter().find(|e| e.key == key)
        }
    }

    impl SmcIo for MockSmc {
        fn key_info(&self, key: SmcKey) -> Result<KeyInfo> {
            if self.down {
                return Err(Error::SmcUnavailable);
            }
            match self.entry(key) {
                Some(entry) => entry.info.clone(),
                None => Err(Error::KeyNotFound),
            }
        }

        fn read_key(&self, key: SmcKey) -> Result<SmcReading> {
            let info = self.key_info(key)?;
            let entry = self.entry(key).ok_or(Error::KeyNotFound)?;
            let mut raw: SmcBytes = [0; SMC_BYTES_LEN];
            let take = entry.bytes.len().min(SMC_BYTES_LEN);
            raw[..take].copy_from_slice(&entry.bytes[..take]);
            Ok(SmcReading::from_raw(key, info.data_size, info.data_type, &raw))
        }

        fn write_key(&self, def: &KeyDefinition, value: &[u8]) -> Result<()> {
            if self.down {
                return Err(Error::SmcUnavailable);
            }
            let entry = self.entry(def.key).ok_or(Error::KeyNotFound)?;
            entry.write_result.clone()?;
            let info = entry.info.clone()?;
            if value.len() != def.data_size || info.data_size as usize != def.data_size {
                return Err(Error::TypeMismatch);
            }
            self.writes.lock().unwrap().push((def.key.to_string(), value.to_vec()));
            Ok(())
        }

        fn key_count(&self) -> Result<u32> {
            if self.down {
                return Err(Error::SmcUnavailable);
            }
            Ok(self.entries.len() as u32)
        }

        fn key_at_index(&self, index: u32) -> Result<SmcKey> {
            if self.down {
                return Err(Error::SmcUnavailable);
            }
            self.entries.get(index as usize).map(|e| e.key).ok_or(Error::ReadFailed)
        }
    }
}
