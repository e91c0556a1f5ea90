//! The control-loop orchestrator.
//!
//! Owns the one piece of long-lived mutable state in the crate: the last
//! successfully applied charging mode. Capability, route, and desired mode
//! are all recomputed per cycle.

use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::battery::ChargeSource;
use crate::error::{Error, Result};
use crate::helper_client::HelperClient;
use crate::io::SmcIo;
use crate::key::{ChargeControlStrategy, charge_control_candidates};
use crate::policy::{self, ChargingMode, HYSTERESIS_PERCENT};
use crate::resolver::{self, WriteCapability};
use crate::router::{self, WriteRoute, WriteStatus};
use crate::settings::BatterySettings;

/// How often the control loop samples the battery. Battery percentage moves
/// slowly; generous tolerance is fine.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// How long process shutdown waits for the restore-to-normal write before
/// abandoning it.
pub const SHUTDOWN_RESTORE_BOUND: Duration = Duration::from_secs(2);

/// Seam over the privileged helper, so the controller can be tested without
/// a live daemon.
pub trait HelperGateway: Send + Sync {
    fn is_installed(&self) -> bool;
    fn set_charging_enabled(&self, enabled: bool) -> Result<()>;
    fn set_charge_limit(&self, percent: u8) -> Result<()>;
}

impl HelperGateway for HelperClient {
    fn is_installed(&self) -> bool {
        HelperClient::is_installed()
    }

    fn set_charging_enabled(&self, enabled: bool) -> Result<()> {
        HelperClient::set_charging_enabled(self, enabled)
    }

    fn set_charge_limit(&self, percent: u8) -> Result<()> {
        HelperClient::set_charge_limit(self, percent)
    }
}

/// One control cycle's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub charge: u8,
    pub mode: ChargingMode,
    /// Whether this cycle actually wrote to the hardware. Identical
    /// consecutive modes are not re-applied.
    pub applied: bool,
}

pub struct ChargeController {
    io: Arc<dyn SmcIo + Send + Sync>,
    helper: Arc<dyn HelperGateway>,
    source: Box<dyn ChargeSource>,
    settings: BatterySettings,
    capability: WriteCapability,
    route: WriteRoute,
    last_applied: Option<ChargingMode>,
    hysteresis_percent: u8,
}

impl ChargeController {
    /// Builds a controller and resolves its initial route.
    pub fn new(
        io: Arc<dyn SmcIo + Send + Sync>,
        helper: Arc<dyn HelperGateway>,
        source: Box<dyn ChargeSource>,
        settings: BatterySettings,
    ) -> Self {
        let mut controller = Self {
            io,
            helper,
            source,
            settings,
            capability: WriteCapability::Unknown,
            route: WriteRoute::Disabled(router::REASON_NO_WRITABLE_KEY.to_string()),
            last_applied: None,
            hysteresis_percent: HYSTERESIS_PERCENT,
        };
        controller.refresh_route();
        controller
    }

    /// Re-probes the hardware and recomputes the write route. Probing
    /// failures are never fatal; they degrade the route to `Disabled`.
    pub fn refresh_route(&mut self) {
        let (strategy, capability) = resolver::resolve(self.io.as_ref(), &charge_control_candidates());
        let route = router::route(
            self.settings.allow_smc_writes,
            capability,
            strategy.as_ref(),
            self.helper.is_installed(),
        );
        if route != self.route {
            info!(?route, capability = capability.describe(), "write route changed");
        }
        self.capability = capability;
        self.route = route;
    }

    pub fn write_status(&self) -> WriteStatus {
        WriteStatus::from_route(&self.route)
    }

    pub fn route(&self) -> &WriteRoute {
        &self.route
    }

    pub fn capability(&self) -> WriteCapability {
        self.capability
    }

    pub fn settings(&self) -> &BatterySettings {
        &self.settings
    }

    /// Replaces the settings snapshot and re-routes (the writes-allowed
    /// toggle participates in routing).
    pub fn update_settings(&mut self, settings: BatterySettings) {
        self.settings = settings;
        self.refresh_route();
    }

    pub fn last_applied_mode(&self) -> Option<ChargingMode> {
        self.last_applied
    }

    /// The single write-path entry point. On success the mode is recorded as
    /// the last applied one; on failure the previous record stands, so the
    /// next policy decision is driven by what the hardware actually is.
    pub fn apply_charging_mode(&mut self, mode: ChargingMode) -> Result<()> {
        let outcome = match &self.route {
            WriteRoute::Disabled(reason) => {
                debug!(reason, "write requested while disabled");
                Err(Error::Unsupported)
            }
            WriteRoute::Direct(strategy) => {
                match direct_write(self.io.as_ref(), strategy, mode) {
                    Err(err)
                        if matches!(err, Error::PermissionDenied | Error::WriteFailed)
                            && self.helper.is_installed() =>
                    {
                        // One fallback attempt, never a loop. The reverse
                        // direction (helper down -> direct) is pointless:
                        // direct was already known insufficient when the
                        // helper route was chosen.
                        warn!(%err, "direct SMC write failed, retrying through the helper");
                        helper_write(self.helper.as_ref(), strategy, mode)
                    }
                    other => other,
                }
            }
            WriteRoute::Helper(strategy) => helper_write(self.helper.as_ref(), strategy, mode),
        };

        if outcome.is_ok() {
            debug!(?mode, "charging mode applied");
            self.last_applied = Some(mode);
        }
        outcome
    }

    /// One control cycle: read the charge, decide, apply on change.
    pub fn tick(&mut self) -> Result<Tick> {
        let charge = self.source.current_charge_percent()?;
        let mode = policy::desired_mode(charge, &self.settings, self.last_applied, self.hysteresis_percent);
        if self.last_applied == Some(mode) {
            return Ok(Tick { charge, mode, applied: false });
        }
        self.apply_charging_mode(mode)?;
        Ok(Tick { charge, mode, applied: true })
    }

    /// Best-effort restore on shutdown: fire the `Normal` write on a worker,
    /// wait briefly, give up. Failures are swallowed; there is nothing left
    /// to report to.
    pub fn restore_normal_on_exit(&self) {
        if self.settings.keep_state_on_quit {
            return;
        }
        let strategy = match self.route.strategy() {
            Some(strategy) => strategy.clone(),
            None => return,
        };
        let via_helper = matches!(self.route, WriteRoute::Helper(_));
        let io = Arc::clone(&self.io);
        let helper = Arc::clone(&self.helper);
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let result = if via_helper {
                helper_write(helper.as_ref(), &strategy, ChargingMode::Normal)
            } else {
                direct_write(io.as_ref(), &strategy, ChargingMode::Normal)
            };
            let _ = tx.send(result);
        });
        match rx.recv_timeout(SHUTDOWN_RESTORE_BOUND) {
            Ok(Ok(())) => debug!("restored normal charging on exit"),
            Ok(Err(err)) => debug!(%err, "restore on exit failed"),
            Err(_) => debug!("restore on exit timed out"),
        }
    }
}

fn direct_write(
    io: &dyn SmcIo,
    strategy: &ChargeControlStrategy,
    mode: ChargingMode,
) -> Result<()> {
    match strategy {
        ChargeControlStrategy::Limit(def) => io.write_key(def, &[mode.limit_register_value()]),
        ChargeControlStrategy::Switch(switch) => {
            let pattern = if mode.should_enable_charging() {
                &switch.enable_bytes
            } else {
                &switch.disable_bytes
            };
            for def in &switch.keys {
                io.write_key(def, pattern)?;
            }
            Ok(())
        }
    }
}

fn helper_write(
    helper: &dyn HelperGateway,
    strategy: &ChargeControlStrategy,
    mode: ChargingMode,
) -> Result<()> {
    match strategy {
        ChargeControlStrategy::Limit(_) => helper.set_charge_limit(mode.limit_register_value()),
        ChargeControlStrategy::Switch(_) => {
            helper.set_charging_enabled(mode.should_enable_charging())
        }
    }
}
