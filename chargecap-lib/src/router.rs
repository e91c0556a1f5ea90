//! Decides where writes go: straight at the SMC, through the privileged
//! helper, or nowhere.

use crate::key::ChargeControlStrategy;
use crate::resolver::WriteCapability;

pub const REASON_WRITES_OFF: &str = "SMC writes are turned off in settings";
pub const REASON_NO_WRITABLE_KEY: &str = "no writable charge-control key on this machine";
pub const REASON_SMC_UNREACHABLE: &str = "SMC unreachable";
pub const REASON_NEEDS_HELPER: &str = "writing requires the privileged helper";

/// The resolved write path. Derived, never stored: a pure function of the
/// latest capability probe and the helper install state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRoute {
    Direct(ChargeControlStrategy),
    Helper(ChargeControlStrategy),
    Disabled(String),
}

impl WriteRoute {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled(_))
    }

    pub fn strategy(&self) -> Option<&ChargeControlStrategy> {
        match self {
            Self::Direct(strategy) | Self::Helper(strategy) => Some(strategy),
            Self::Disabled(_) => None,
        }
    }
}

/// Routing rules, evaluated in order. A present helper always wins over a
/// direct-writable key: the helper path is strictly more capable and keeps
/// privileged writes in one place.
pub fn route(
    allow_writes: bool,
    capability: WriteCapability,
    strategy: Option<&ChargeControlStrategy>,
    helper_installed: bool,
) -> WriteRoute {
    if !allow_writes {
        return WriteRoute::Disabled(REASON_WRITES_OFF.to_string());
    }
    let Some(strategy) = strategy else {
        return WriteRoute::Disabled(REASON_NO_WRITABLE_KEY.to_string());
    };
    if capability == WriteCapability::SmcUnavailable {
        return WriteRoute::Disabled(REASON_SMC_UNREACHABLE.to_string());
    }
    if capability == WriteCapability::Supported && !helper_installed {
        return WriteRoute::Direct(strategy.clone());
    }
    if helper_installed {
        return WriteRoute::Helper(strategy.clone());
    }
    WriteRoute::Disabled(REASON_NEEDS_HELPER.to_string())
}

/// What the UI and diagnostics get to see of the route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteStatus {
    pub enabled: bool,
    pub needs_privilege: bool,
    pub reason: Option<String>,
}

impl WriteStatus {
    pub fn from_route(route: &WriteRoute) -> Self {
        match route {
            WriteRoute::Direct(_) | WriteRoute::Helper(_) => {
                Self { enabled: true, needs_privilege: false, reason: None }
            }
            WriteRoute::Disabled(reason) => Self {
                enabled: false,
                needs_privilege: reason == REASON_NEEDS_HELPER,
                reason: Some(reason.clone()),
            },
        }
    }
}
