use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chargecap_lib::battery::{ChargeSource, PmsetChargeSource};
use chargecap_lib::controller::{ChargeController, REFRESH_INTERVAL};
use chargecap_lib::diag;
use chargecap_lib::error::Error;
use chargecap_lib::helper_client::HelperClient;
use chargecap_lib::io::platform_smc;
use chargecap_lib::key::{ChargeControlStrategy, charge_control_candidates};
use chargecap_lib::policy::ChargingMode;
use chargecap_lib::resolver;
use chargecap_lib::settings::{BatterySettings, SettingsStore, clamp_charge_limit};
use tracing::{debug, info, warn};

type CliResult = Result<(), Error>;

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_shutdown_signal(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

fn install_signal_handlers() {
    let handler = handle_shutdown_signal as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
}

fn build_controller(settings: BatterySettings) -> ChargeController {
    ChargeController::new(
        platform_smc(),
        Arc::new(HelperClient::new()),
        Box::new(PmsetChargeSource::new()),
        settings,
    )
}

fn save(store: &SettingsStore, settings: &BatterySettings) -> CliResult {
    store.save(settings).map_err(|err| Error::Unknown(err.to_string()))
}

pub fn status() -> CliResult {
    let settings = SettingsStore::open_default().load();
    let controller = build_controller(settings.clone());
    let status = controller.write_status();

    match PmsetChargeSource::new().current_charge_percent() {
        Ok(charge) => println!("Battery charge: {charge}%"),
        Err(err) => println!("Battery charge: unavailable ({err})"),
    }
    println!(
        "Charge limiting: {}",
        if settings.limit_control_enabled { "on" } else { "off" }
    );
    println!("Charge limit: {}%", settings.charge_limit);
    println!(
        "Helper installed: {}",
        if HelperClient::is_installed() { "yes" } else { "no" }
    );
    match status.reason {
        None => println!("SMC writes: enabled"),
        Some(reason) => {
            println!("SMC writes: disabled ({reason})");
            if status.needs_privilege {
                println!("Install the privileged helper to enable charge control.");
            }
        }
    }
    Ok(())
}

pub fn run() -> CliResult {
    install_signal_handlers();
    let settings = SettingsStore::open_default().load();
    let mut controller = build_controller(settings);
    info!("charge control loop started");

    while RUNNING.load(Ordering::SeqCst) {
        controller.refresh_route();
        match controller.tick() {
            Ok(tick) => {
                info!(charge = tick.charge, mode = ?tick.mode, applied = tick.applied, "cycle complete");
            }
            // A vanished helper is an expected state right after an
            // uninstall, not an alert; the route degrades on its own.
            Err(Error::ControllerUnavailable) => debug!("helper unreachable this cycle"),
            Err(err) => warn!(%err, "control cycle failed"),
        }
        sleep_interruptibly(REFRESH_INTERVAL);
    }

    info!("shutting down, restoring normal charging");
    controller.restore_normal_on_exit();
    Ok(())
}

pub fn set_limit(limit: u8) -> CliResult {
    let store = SettingsStore::open_default();
    let mut settings = store.load();
    let clamped = clamp_charge_limit(limit);
    if clamped != limit {
        println!("Limit {limit}% is out of range, using {clamped}%.");
    }
    settings.charge_limit = clamped;
    save(&store, &settings)?;
    println!("Charge limit set to {clamped}%.");
    if settings.limit_control_enabled {
        apply_once(settings)?;
    }
    Ok(())
}

pub fn enable() -> CliResult {
    let store = SettingsStore::open_default();
    let mut settings = store.load();
    settings.limit_control_enabled = true;
    save(&store, &settings)?;
    println!("Charge limiting enabled at {}%.", settings.charge_limit);
    apply_once(settings)
}

pub fn disable() -> CliResult {
    let store = SettingsStore::open_default();
    let mut settings = store.load();
    settings.limit_control_enabled = false;
    save(&store, &settings)?;
    println!("Charge limiting disabled.");
    apply_normal(settings)
}

pub fn restore() -> CliResult {
    let store = SettingsStore::open_default();
    let mut settings = store.load();
    settings.limit_control_enabled = false;
    save(&store, &settings)?;
    println!("Charge control disabled.");
    // Best effort: the uninstaller may already have removed the helper.
    if let Err(err) = apply_normal(settings) {
        debug!(%err, "restore write failed");
    }
    Ok(())
}

fn apply_once(settings: BatterySettings) -> CliResult {
    let mut controller = build_controller(settings);
    let status = controller.write_status();
    if !status.enabled {
        if let Some(reason) = status.reason {
            println!("Settings saved, but writes are disabled: {reason}");
        }
        return Ok(());
    }
    let tick = controller.tick()?;
    println!("Applied {:?} at {}% charge.", tick.mode, tick.charge);
    Ok(())
}

fn apply_normal(settings: BatterySettings) -> CliResult {
    let mut controller = build_controller(settings);
    if !controller.write_status().enabled {
        return Ok(());
    }
    controller.apply_charging_mode(ChargingMode::Normal)?;
    println!("Normal charging restored.");
    Ok(())
}

pub fn read(key: &str) -> CliResult {
    let io = platform_smc();
    let report = diag::read_key_report(io.as_ref(), key);
    print_key_report(&report);
    if report.stage != diag::KeyReadStage::Ok && HelperClient::is_installed() {
        println!("privileged read:");
        match HelperClient::new().read_key(key) {
            Ok(report) => print_key_report(&report),
            Err(err) => println!("  failed: {err}"),
        }
    }
    Ok(())
}

pub fn list() -> CliResult {
    let io = platform_smc();
    let report = diag::key_list_report(io.as_ref());
    print_key_list_report(&report);
    for key in &report.candidates {
        print_key_report(&diag::read_key_report(io.as_ref(), key));
    }
    Ok(())
}

pub fn diagnose() -> CliResult {
    println!("chargecap diagnostics");

    let settings = SettingsStore::open_default().load();
    println!(
        "settings: limiting={}, limit={}%, keep-on-quit={}",
        settings.limit_control_enabled, settings.charge_limit, settings.keep_state_on_quit
    );
    println!("SMC writes allowed: {}", settings.allow_smc_writes);

    let helper_installed = HelperClient::is_installed();
    println!("helper installed: {}", if helper_installed { "yes" } else { "no" });

    let io = platform_smc();
    let (strategy, capability) = resolver::resolve(io.as_ref(), &charge_control_candidates());
    match &strategy {
        Some(strategy) => println!("charge-control keys: {}", strategy.describe()),
        None => println!("charge-control keys: none found"),
    }
    println!("direct write check: {}", capability.describe());

    let report = diag::key_list_report(io.as_ref());
    print_key_list_report(&report);
    if !report.candidates.is_empty() {
        println!("candidate reads:");
        for key in &report.candidates {
            print_key_report(&diag::read_key_report(io.as_ref(), key));
        }
        if helper_installed {
            println!("candidate reads (privileged):");
            let client = HelperClient::new();
            for key in &report.candidates {
                match client.read_key(key) {
                    Ok(report) => print_key_report(&report),
                    Err(err) => println!("  {key}: failed - {err}"),
                }
            }
        }
    }

    match (&strategy, helper_installed) {
        (_, false) => println!("helper write check: skipped (helper not installed)"),
        (Some(ChargeControlStrategy::Limit(_)), true) => {
            match HelperClient::new().diagnose_charge_limit(settings.charge_limit) {
                Ok(diagnosis) => println!(
                    "helper write check: status={:?}, stage={}, return={}, size={}, type={}",
                    diagnosis.status,
                    diagnosis.stage.describe(),
                    diag::format_kern_return(diagnosis.kern_return),
                    diagnosis.data_size,
                    diag::format_data_type(diagnosis.data_type)
                ),
                Err(err) => println!("helper write check: failed - {err}"),
            }
        }
        _ => println!("helper write check: skipped (charging switch writes change charge state)"),
    }

    println!("diagnostics complete");
    Ok(())
}

fn print_key_list_report(report: &diag::KeyListReport) {
    println!(
        "key list: stage={}, return={}",
        report.stage.describe(),
        diag::format_kern_return(report.kern_return)
    );
    println!("key list: total={}, scanned={}", report.key_count, report.scanned);
    if report.candidates.is_empty() {
        println!("key list: candidates=none");
    } else {
        println!("key list: candidates={}", report.candidates.join(", "));
    }
}

fn print_key_report(report: &diag::KeyReadReport) {
    println!(
        "  {}: stage={}, return={}",
        report.key,
        report.stage.describe(),
        diag::format_kern_return(report.kern_return)
    );
    let suffix = if report.truncated { " (truncated)" } else { "" };
    println!(
        "    size={}, type={}, value={}{}",
        report.data_size,
        diag::format_data_type(report.data_type),
        diag::format_bytes(&report.bytes),
        suffix
    );
}

fn sleep_interruptibly(total: Duration) {
    let step = Duration::from_secs(1);
    let mut remaining = total;
    while !remaining.is_zero() && RUNNING.load(Ordering::SeqCst) {
        let chunk = remaining.min(step);
        std::thread::sleep(chunk);
        remaining -= chunk;
    }
}
