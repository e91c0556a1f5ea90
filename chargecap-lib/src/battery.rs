//! Current battery charge, read from the OS power-source report.

use std::process::Command;

use tracing::warn;

use crate::error::{Error, Result};

/// Where the control loop gets the current charge percentage from.
pub trait ChargeSource {
    fn current_charge_percent(&self) -> Result<u8>;
}

/// Reads the charge from `pmset -g batt`.
#[derive(Debug, Default)]
pub struct PmsetChargeSource;

impl PmsetChargeSource {
    pub fn new() -> Self {
        Self
    }
}

impl ChargeSource for PmsetChargeSource {
    fn current_charge_percent(&self) -> Result<u8> {
        let output = Command::new("pmset").args(["-g", "batt"]).output().map_err(|err| {
            warn!(%err, "pmset failed");
            Error::PowerSourceUnavailable
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_battery_percent(&stdout).ok_or(Error::PowerSourceUnavailable)
    }
}

/// Pulls the percentage out of pmset output like
/// `-InternalBattery-0 (id=4653155)  85%; charging; 1:02 remaining`.
fn parse_battery_percent(output: &str) -> Option<u8> {
    for token in output.split_whitespace() {
        let token = token.trim_end_matches(';');
        if let Some(number) = token.strip_suffix('%')
            && let Ok(percent) = number.parse::<u8>()
            && percent <= 100
        {
            return Some(percent);
        }
    }
    None
}
