//! The fixed-layout record exchanged with the AppleSMC user client.
//!
//! The kernel call is a struct method: the same 80-byte record goes in and
//! comes back out. Its size and field offsets are hardware ABI; any drift
//! corrupts every call silently, so the layout is pinned by a unit test.

pub(crate) const KERNEL_INDEX_SMC: u32 = 2;
pub(crate) const SMC_CMD_READ_BYTES: u8 = 5;
pub(crate) const SMC_CMD_WRITE_BYTES: u8 = 6;
pub(crate) const SMC_CMD_READ_INDEX: u8 = 8;
pub(crate) const SMC_CMD_READ_KEYINFO: u8 = 9;

/// `result` byte reported by the firmware when a key does not exist.
pub(crate) const SMC_RESULT_KEY_NOT_FOUND: u8 = 132;

/// Maximum size in bytes of a single SMC value.
pub const SMC_BYTES_LEN: usize = 32;

/// Payload buffer of an SMC call.
pub type SmcBytes = [u8; SMC_BYTES_LEN];

/// Version sub-record. Always zeroed on input; reserved for the firmware
/// protocol.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SmcVersion {
    major: u8,
    minor: u8,
    build: u8,
    reserved: u8,
    release: u16,
}

/// Power-limit sub-record. Always zeroed on input; reserved for the firmware
/// protocol.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SmcPLimitData {
    pub version: u16,
    pub length: u16,
    pub cpu_plimit: u32,
    pub gpu_plimit: u32,
    pub mem_plimit: u32,
}

/// Size/type metadata the firmware reports for a key.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SmcKeyInfoData {
    pub data_size: u32,
    pub data_type: u32,
    pub data_attributes: u8,
}

/// The full command record. `data8` selects the command, `data32` carries the
/// index for by-index reads, `bytes` carries the value payload.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SmcKeyData {
    pub key: u32,
    pub vers: SmcVersion,
    pub plimit_data: SmcPLimitData,
    pub key_info: SmcKeyInfoData,
    pub result: u8,
    pub status: u8,
    pub data8: u8,
    pub data32: u32,
    pub bytes: SmcBytes,
}

/// Zero-fills `bytes` and copies `value` to offset 0.
pub(crate) fn fill_payload(bytes: &mut SmcBytes, value: &[u8]) {
    bytes.fill(0);
    bytes[..value.len()].copy_from_slice(value);
}
