//! Probes the candidate charge-control strategies and picks the first one
//! the hardware actually exposes.

use tracing::debug;

use crate::error::Error;
use crate::io::{SmcIo, validate_definition};
use crate::key::ChargeControlStrategy;

/// Outcome of probing one strategy. Recomputed on demand and never
/// persisted: firmware state and privilege grants change across boots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCapability {
    Supported,
    PermissionDenied,
    KeyNotFound,
    TypeMismatch,
    SmcUnavailable,
    Unknown,
}

impl WriteCapability {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Supported => "supported (writable)",
            Self::PermissionDenied => "permission denied",
            Self::KeyNotFound => "key missing or not writable",
            Self::TypeMismatch => "key size or type mismatch",
            Self::SmcUnavailable => "SMC unreachable",
            Self::Unknown => "unknown",
        }
    }

    /// The error a write attempt would surface, `None` for `Supported`.
    pub fn into_error(self) -> Option<Error> {
        match self {
            Self::Supported => None,
            Self::PermissionDenied => Some(Error::PermissionDenied),
            Self::KeyNotFound => Some(Error::KeyNotFound),
            Self::TypeMismatch => Some(Error::TypeMismatch),
            Self::SmcUnavailable => Some(Error::SmcUnavailable),
            Self::Unknown => Some(Error::Unsupported),
        }
    }

    fn from_error(err: &Error) -> Self {
        match err {
            Error::PermissionDenied => Self::PermissionDenied,
            Error::KeyNotFound => Self::KeyNotFound,
            Error::TypeMismatch => Self::TypeMismatch,
            Error::SmcUnavailable => Self::SmcUnavailable,
            _ => Self::Unknown,
        }
    }
}

/// Probes every key of one strategy; `Supported` only when all of them
/// validate exactly.
pub fn check_strategy(io: &dyn SmcIo, strategy: &ChargeControlStrategy) -> WriteCapability {
    for def in strategy.key_definitions() {
        if let Err(err) = validate_definition(io, def) {
            return WriteCapability::from_error(&err);
        }
    }
    WriteCapability::Supported
}

/// Walks `candidates` in priority order and returns the first usable
/// strategy.
///
/// A `PermissionDenied` candidate is remembered but the scan continues: a
/// lower-priority candidate may be writable without privilege, and wins if
/// so. `SmcUnavailable` aborts immediately, since the whole controller is
/// down. `KeyNotFound`/`TypeMismatch` just move on to the next candidate.
pub fn resolve(
    io: &dyn SmcIo,
    candidates: &[ChargeControlStrategy],
) -> (Option<ChargeControlStrategy>, WriteCapability) {
    let mut denied: Option<&ChargeControlStrategy> = None;
    for candidate in candidates {
        let capability = check_strategy(io, candidate);
        debug!(strategy = %candidate.describe(), capability = capability.describe(), "probed candidate");
        match capability {
            WriteCapability::Supported => {
                return (Some(candidate.clone()), WriteCapability::Supported);
            }
            WriteCapability::PermissionDenied => {
                denied.get_or_insert(candidate);
            }
            WriteCapability::SmcUnavailable => {
                return (None, WriteCapability::SmcUnavailable);
            }
            WriteCapability::KeyNotFound
            | WriteCapability::TypeMismatch
            | WriteCapability::Unknown => {}
        }
    }
    match denied {
        Some(candidate) => (Some(candidate.clone()), WriteCapability::PermissionDenied),
        None => (None, WriteCapability::KeyNotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mock::MockSmc;
    use crate::key::{charge_control_candidates, legacy_switch, tahoe_switch};

    #[test]
    fn highest_priority_supported_candidate_wins() {
        let io = MockSmc::new()
            .with_key("CHTE", "hex_", 4)
            .with_key("CH0B", "hex_", 1)
            .with_key("CH0C", "hex_", 1);
        let (strategy, capability) = resolve(&io, &charge_control_candidates());
        assert_eq!(capability, WriteCapability::Supported);
        assert_eq!(strategy, Some(tahoe_switch()));
    }

    #[test]
    fn later_supported_candidate_beats_remembered_denied_one() {
        let io = MockSmc::new()
            .with_probe_error("CHTE", Error::PermissionDenied)
            .with_key("CH0B", "hex_", 1)
            .with_key("CH0C", "hex_", 1);
        let (strategy, capability) = resolve(&io, &charge_control_candidates());
        assert_eq!(capability, WriteCapability::Supported);
        assert_eq!(strategy, Some(legacy_switch()));
    }

    #[test]
    fn denied_candidate_is_reported_when_nothing_else_validates() {
        let io = MockSmc::new().with_probe_error("CHTE", Error::PermissionDenied);
        let (strategy, capability) = resolve(&io, &charge_control_candidates());
        assert_eq!(capability, WriteCapability::PermissionDenied);
        assert_eq!(strategy, Some(tahoe_switch()));
    }

    #[test]
    fn unavailable_smc_aborts_the_scan() {
        let io = MockSmc::unavailable();
        let (strategy, capability) = resolve(&io, &charge_control_candidates());
        assert_eq!(capability, WriteCapability::SmcUnavailable);
        assert_eq!(strategy, None);
    }

    #[test]
    fn no_usable_candidate_reports_key_not_found() {
        let io = MockSmc::new().with_key("CHTE", "hex_", 2);
        let (strategy, capability) = resolve(&io, &charge_control_candidates());
        assert_eq!(capability, WriteCapability::KeyNotFound);
        assert_eq!(strategy, None);
    }

    #[test]
    fn partial_switch_does_not_validate() {
        // CH0B present but its pair CH0C missing: the pair must not be used.
        let io = MockSmc::new().with_key("CH0B", "hex_", 1);
        let (strategy, capability) = resolve(&io, &charge_control_candidates());
        assert_eq!(capability, WriteCapability::KeyNotFound);
        assert_eq!(strategy, None);
    }
}
