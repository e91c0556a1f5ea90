//! The charging-mode decision. Pure: no I/O, no retained state.

use crate::settings::{BatterySettings, MAX_CHARGE_LIMIT, MIN_CHARGE_LIMIT, clamp_charge_limit};

/// Width of each side of the hysteresis band around the limit. One percent
/// is enough: battery percentage moves slowly and the band only has to stop
/// the charge relay from toggling every sample at the boundary.
pub const HYSTERESIS_PERCENT: u8 = 1;

/// What the charge hardware should be told to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargingMode {
    /// No cap; the firmware charges to 100% as it pleases.
    Normal,
    /// Cap charging at the given percentage.
    ChargeLimit(u8),
    /// Charging is suppressed. Carries the charge percentage observed when
    /// suppression began; hysteresis bookkeeping only, not for display.
    Hold(u8),
}

impl ChargingMode {
    /// Whether the charge relay should be on in this mode.
    pub fn should_enable_charging(self) -> bool {
        !matches!(self, Self::Hold(_))
    }

    /// The value to put in a firmware limit register for this mode. Holding
    /// caps at the observed charge, which stops charging right there.
    pub fn limit_register_value(self) -> u8 {
        match self {
            Self::Normal => MAX_CHARGE_LIMIT,
            Self::ChargeLimit(limit) => limit,
            Self::Hold(observed) => observed.min(MAX_CHARGE_LIMIT),
        }
    }
}

/// Maps the current charge, the user's settings, and the last successfully
/// applied mode to the next mode.
///
/// Two-state hysteresis between `ChargeLimit` and `Hold`: entering `Hold` at
/// `limit + hysteresis`, releasing at `limit - hysteresis`. The caller must
/// feed back the mode that was actually applied, not the one previously
/// computed; otherwise a failed write amplifies into mode flapping.
pub fn desired_mode(
    current_charge: u8,
    settings: &BatterySettings,
    last_applied: Option<ChargingMode>,
    hysteresis_percent: u8,
) -> ChargingMode {
    if !settings.limit_control_enabled {
        return ChargingMode::Normal;
    }

    let limit = clamp_charge_limit(settings.charge_limit);
    let upper = limit.saturating_add(hysteresis_percent).min(MAX_CHARGE_LIMIT);
    let lower = limit.saturating_sub(hysteresis_percent).max(MIN_CHARGE_LIMIT);

    match last_applied {
        Some(ChargingMode::Hold(_)) => {
            if current_charge > lower {
                ChargingMode::Hold(current_charge)
            } else {
                ChargingMode::ChargeLimit(limit)
            }
        }
        _ => {
            if current_charge >= upper {
                ChargingMode::Hold(current_charge)
            } else {
                ChargingMode::ChargeLimit(limit)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(limit: u8) -> BatterySettings {
        BatterySettings { limit_control_enabled: true, charge_limit: limit, ..Default::default() }
    }

    #[test]
    fn disabled_control_always_yields_normal() {
        let settings = BatterySettings { limit_control_enabled: false, ..Default::default() };
        assert_eq!(desired_mode(95, &settings, None, 1), ChargingMode::Normal);
        assert_eq!(
            desired_mode(95, &settings, Some(ChargingMode::Hold(96)), 1),
            ChargingMode::Normal
        );
    }

    #[test]
    fn holds_at_the_upper_band_edge() {
        let settings = enabled(80);
        assert_eq!(desired_mode(80, &settings, None, 1), ChargingMode::ChargeLimit(80));
        assert_eq!(desired_mode(81, &settings, None, 1), ChargingMode::Hold(81));
    }

    #[test]
    fn stays_held_until_the_lower_band_edge() {
        let settings = enabled(80);
        assert_eq!(
            desired_mode(80, &settings, Some(ChargingMode::Hold(90)), 1),
            ChargingMode::Hold(80)
        );
        assert_eq!(
            desired_mode(79, &settings, Some(ChargingMode::Hold(90)), 1),
            ChargingMode::ChargeLimit(80)
        );
    }

    #[test]
    fn limits_are_clamped_into_range() {
        assert_eq!(desired_mode(40, &enabled(20), None, 1), ChargingMode::ChargeLimit(50));
        assert_eq!(desired_mode(99, &enabled(120), None, 1), ChargingMode::ChargeLimit(100));
    }

    #[test]
    fn band_never_leaves_the_valid_range() {
        // At limit 100 the hold threshold saturates at 100.
        let settings = enabled(100);
        assert_eq!(desired_mode(99, &settings, None, 1), ChargingMode::ChargeLimit(100));
        assert_eq!(desired_mode(100, &settings, None, 1), ChargingMode::Hold(100));

        // At limit 50 the release threshold saturates at 50.
        let settings = enabled(50);
        assert_eq!(
            desired_mode(50, &settings, Some(ChargingMode::Hold(55)), 1),
            ChargingMode::ChargeLimit(50)
        );
    }

    #[test]
    fn hold_mode_drives_the_relay_off() {
        assert!(!ChargingMode::Hold(81).should_enable_charging());
        assert!(ChargingMode::ChargeLimit(80).should_enable_charging());
        assert!(ChargingMode::Normal.should_enable_charging());
    }

    #[test]
    fn limit_register_values_per_mode() {
        assert_eq!(ChargingMode::Normal.limit_register_value(), 100);
        assert_eq!(ChargingMode::ChargeLimit(80).limit_register_value(), 80);
        assert_eq!(ChargingMode::Hold(83).limit_register_value(), 83);
    }
}
