//! SMC key names and the static charge-control key tables.
//!
//! Keys are four ASCII characters packed big-endian into a `u32`, the way the
//! SMC addresses its registers. Which registers control charging differs
//! between hardware generations; [`charge_control_candidates`] lists the known
//! layouts in priority order, newest firmware first.

use std::fmt;

use crate::error::{Error, Result};

/// A four-character SMC register name, stored as its packed 32-bit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SmcKey(u32);

impl SmcKey {
    /// Parses a key name. Fails with [`Error::InvalidKey`] unless the name is
    /// exactly four ASCII characters.
    pub fn new(name: &str) -> Result<Self> {
        let bytes: [u8; 4] = name.as_bytes().try_into().map_err(|_| Error::InvalidKey)?;
        if !bytes.iter().all(|b| b.is_ascii()) {
            return Err(Error::InvalidKey);
        }
        Ok(Self(u32::from_be_bytes(bytes)))
    }

    /// Packs a byte-string literal such as `*b"CHTE"`. Only used for the
    /// static tables below, which are ASCII by construction.
    pub const fn from_bytes(name: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(name))
    }

    /// Recovers a key from its packed code. Returns `None` unless all four
    /// bytes decode as ASCII.
    pub fn decode(code: u32) -> Option<Self> {
        if code.to_be_bytes().iter().all(|b| b.is_ascii()) {
            Some(Self(code))
        } else {
            None
        }
    }

    pub const fn code(self) -> u32 {
        self.0
    }

    pub const fn bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for SmcKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.bytes() {
            write!(f, "{}", b as char)?;
        }
        Ok(())
    }
}

/// A four-character SMC data type tag (e.g. `ui8 `), packed like a key.
/// Only used as an optional cross-check against what the hardware reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmcDataType(u32);

impl SmcDataType {
    pub const UI8: Self = Self::from_bytes(*b"ui8 ");

    pub fn new(name: &str) -> Option<Self> {
        let bytes: [u8; 4] = name.as_bytes().try_into().ok()?;
        bytes.iter().all(|b| b.is_ascii()).then_some(Self(u32::from_be_bytes(bytes)))
    }

    pub const fn from_bytes(name: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(name))
    }

    pub const fn code(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SmcDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.to_be_bytes() {
            write!(f, "{}", b as char)?;
        }
        Ok(())
    }
}

/// One register this crate may read or write: the key plus the size (and
/// optionally the type) the hardware is expected to report for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDefinition {
    pub key: SmcKey,
    pub data_type: Option<SmcDataType>,
    pub data_size: usize,
}

impl KeyDefinition {
    pub const fn new(key: SmcKey, data_type: Option<SmcDataType>, data_size: usize) -> Self {
        Self { key, data_type, data_size }
    }
}

/// A charging on/off switch: one or two registers that must all be written
/// with a fixed byte pattern to enable or disable the charge relay.
///
/// Invariant: every member key's `data_size` equals the pattern length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargingSwitch {
    pub keys: Vec<KeyDefinition>,
    pub enable_bytes: Vec<u8>,
    pub disable_bytes: Vec<u8>,
}

impl ChargingSwitch {
    pub fn data_size(&self) -> usize {
        self.keys.first().map_or(0, |k| k.data_size)
    }

    pub fn key_names(&self) -> Vec<String> {
        self.keys.iter().map(|k| k.key.to_string()).collect()
    }
}

/// One of the known hardware layouts for charge control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeControlStrategy {
    /// A single register holding the charge-limit percentage; the firmware
    /// enforces the cap on its own.
    Limit(KeyDefinition),
    /// Registers that switch charging outright; software has to poll and
    /// flip them at the limit boundary.
    Switch(ChargingSwitch),
}

impl ChargeControlStrategy {
    /// Every register the strategy touches, for probing.
    pub fn key_definitions(&self) -> Vec<&KeyDefinition> {
        match self {
            Self::Limit(def) => vec![def],
            Self::Switch(switch) => switch.keys.iter().collect(),
        }
    }

    /// Short human-readable form for logs and diagnostics, e.g. `CHTE/4`.
    pub fn describe(&self) -> String {
        match self {
            Self::Limit(def) => format!("{}/{}", def.key, def.data_size),
            Self::Switch(switch) => {
                format!("{}/{}", switch.key_names().join("+"), switch.data_size())
            }
        }
    }
}

/// Charging switch on current firmware: a single four-byte register where
/// zero means "charge" and one means "inhibit".
pub fn tahoe_switch() -> ChargeControlStrategy {
    ChargeControlStrategy::Switch(ChargingSwitch {
        keys: vec![KeyDefinition::new(SmcKey::from_bytes(*b"CHTE"), None, 4)],
        enable_bytes: vec![0x00, 0x00, 0x00, 0x00],
        disable_bytes: vec![0x01, 0x00, 0x00, 0x00],
    })
}

/// Charging switch on older firmware: two one-byte registers written as a
/// pair.
pub fn legacy_switch() -> ChargeControlStrategy {
    ChargeControlStrategy::Switch(ChargingSwitch {
        keys: vec![
            KeyDefinition::new(SmcKey::from_bytes(*b"CH0B"), None, 1),
            KeyDefinition::new(SmcKey::from_bytes(*b"CH0C"), None, 1),
        ],
        enable_bytes: vec![0x00],
        disable_bytes: vec![0x02],
    })
}

/// The firmware charge-limit register found on Intel machines.
pub fn firmware_limit_key() -> KeyDefinition {
    KeyDefinition::new(SmcKey::from_bytes(*b"BCLM"), Some(SmcDataType::UI8), 1)
}

/// Switch-style candidates only, for callers that toggle charging outright.
pub fn charging_switch_candidates() -> Vec<ChargeControlStrategy> {
    vec![tahoe_switch(), legacy_switch()]
}

/// All known charge-control layouts in priority order, newest firmware
/// first. This table is static configuration; nothing is derived at runtime.
pub fn charge_control_candidates() -> Vec<ChargeControlStrategy> {
    vec![
        tahoe_switch(),
        legacy_switch(),
        ChargeControlStrategy::Limit(firmware_limit_key()),
    ]
}
