//! Privileged SMC write helper.
//!
//! Runs as root under launchd, listens on a Unix domain socket, and performs
//! the charge-control writes the unprivileged app cannot. One request/reply
//! frame pair per call; requests are served sequentially.

mod service;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chargecap_lib::proto;
use tracing::{info, warn};

fn main() -> Result<()> {
    setup_logging();

    // Writes go straight at the SMC; without root they would all fail with
    // permission errors anyway.
    if unsafe { libc::geteuid() } != 0 {
        bail!("chargecap-helper must run as root");
    }

    let socket = Path::new(proto::SOCKET_PATH);
    if socket.exists() {
        fs::remove_file(socket)
            .with_context(|| format!("removing stale socket {}", socket.display()))?;
    }
    let listener = UnixListener::bind(socket)
        .with_context(|| format!("binding {}", socket.display()))?;
    // Requests are open to everyone; privilege lives in this process, not in
    // socket access.
    fs::set_permissions(socket, fs::Permissions::from_mode(0o666))
        .with_context(|| format!("setting permissions on {}", socket.display()))?;

    info!(socket = %socket.display(), "chargecap helper listening");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                if let Err(err) = service::serve(stream) {
                    warn!(%err, "connection ended with error");
                }
            }
            Err(err) => warn!(%err, "accept failed"),
        }
    }

    Ok(())
}

fn setup_logging() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_ansi(false))
        .init();
}
