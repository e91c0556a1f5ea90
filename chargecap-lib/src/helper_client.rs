//! Client half of the privileged-helper channel.
//!
//! Each logical call opens its own connection, exchanges one frame pair, and
//! tears the connection down. Any transport-level failure (refused, reset,
//! timed out, malformed) collapses to [`Error::ControllerUnavailable`]; the
//! policy layer does not distinguish "helper said no" from "helper never
//! answered".

use std::io::BufReader;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::diag::{ChargeLimitDiagnosis, DiagnoseStage, KeyReadReport, KeyReadStage};
use crate::error::{Error, Result};
use crate::proto::{
    self, CALL_DEADLINE, HelperReply, HelperRequest, HelperStatus, SOCKET_PATH,
};

/// Ensures a call resolves exactly once even when the reply and the deadline
/// race. Whichever side claims the gate first wins; the loser's result is
/// discarded.
struct CompleteOnce {
    done: Mutex<bool>,
}

impl CompleteOnce {
    fn new() -> Self {
        Self { done: Mutex::new(false) }
    }

    fn claim(&self) -> bool {
        let mut done = self.done.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *done {
            false
        } else {
            *done = true;
            true
        }
    }
}

/// Talks to the privileged helper daemon over its socket.
pub struct HelperClient {
    socket_path: PathBuf,
    deadline: Duration,
}

impl Default for HelperClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HelperClient {
    pub fn new() -> Self {
        Self { socket_path: PathBuf::from(SOCKET_PATH), deadline: CALL_DEADLINE }
    }

    /// Custom socket and deadline, for tests and alternate installs.
    pub fn with_socket(socket_path: impl Into<PathBuf>, deadline: Duration) -> Self {
        Self { socket_path: socket_path.into(), deadline }
    }

    /// Whether the helper binary and its launchd registration are on disk.
    pub fn is_installed() -> bool {
        Path::new(proto::HELPER_EXECUTABLE_PATH).exists()
            && Path::new(proto::HELPER_PLIST_PATH).exists()
    }

    pub fn set_charging_enabled(&self, enabled: bool) -> Result<()> {
        let reply = self.call(HelperRequest::SetChargingEnabled { enabled })?;
        match HelperStatus::from_code(reply.status).into_error() {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    pub fn set_charge_limit(&self, percent: u8) -> Result<()> {
        let reply = self.call(HelperRequest::SetChargeLimit { percent })?;
        match HelperStatus::from_code(reply.status).into_error() {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Reads a key with the helper's privileges. The report is returned even
    /// for failed reads; only transport loss is an error.
    pub fn read_key(&self, key: &str) -> Result<KeyReadReport> {
        let reply = self.call(HelperRequest::ReadKey { key: key.to_string() })?;
        let reading = reply.reading.ok_or(Error::ControllerUnavailable)?;
        Ok(KeyReadReport {
            key: key.to_string(),
            stage: KeyReadStage::from_code(reading.stage),
            kern_return: reading.kern_return,
            data_size: reading.data_size,
            data_type: reading.data_type,
            bytes: reading.bytes,
            truncated: reading.truncated,
        })
    }

    pub fn diagnose_charge_limit(&self, percent: u8) -> Result<ChargeLimitDiagnosis> {
        let reply = self.call(HelperRequest::DiagnoseChargeLimit { percent })?;
        let status = HelperStatus::from_code(reply.status);
        let diagnostic = reply.diagnostic.ok_or(Error::ControllerUnavailable)?;
        Ok(ChargeLimitDiagnosis {
            status,
            stage: DiagnoseStage::from_code(diagnostic.stage),
            kern_return: diagnostic.kern_return,
            data_size: diagnostic.data_size,
            data_type: diagnostic.data_type,
        })
    }

    /// One request/reply exchange on a worker thread, bounded by the
    /// deadline. The worker owns the connection; if the deadline fires first
    /// the gate keeps the late reply from resolving the call a second time.
    fn call(&self, request: HelperRequest) -> Result<HelperReply> {
        let (tx, rx) = mpsc::channel();
        let gate = Arc::new(CompleteOnce::new());
        let worker_gate = Arc::clone(&gate);
        let socket_path = self.socket_path.clone();
        let deadline = self.deadline;

        thread::spawn(move || {
            let outcome = exchange(&socket_path, &request, deadline);
            if worker_gate.claim() {
                let _ = tx.send(outcome);
            }
        });

        match rx.recv_timeout(self.deadline) {
            Ok(outcome) => outcome,
            Err(_) => {
                if gate.claim() {
                    warn!(deadline_secs = self.deadline.as_secs(), "helper call timed out");
                }
                Err(Error::ControllerUnavailable)
            }
        }
    }
}

fn exchange(socket_path: &Path, request: &HelperRequest, deadline: Duration) -> Result<HelperReply> {
    let stream = UnixStream::connect(socket_path).map_err(|err| {
        debug!(path = %socket_path.display(), %err, "helper socket connect failed");
        Error::ControllerUnavailable
    })?;
    stream
        .set_read_timeout(Some(deadline))
        .and_then(|()| stream.set_write_timeout(Some(deadline)))
        .map_err(|_| Error::ControllerUnavailable)?;

    let mut writer = stream.try_clone().map_err(|_| Error::ControllerUnavailable)?;
    proto::write_frame(&mut writer, request).map_err(|_| Error::ControllerUnavailable)?;

    let mut reader = BufReader::new(stream);
    proto::read_frame(&mut reader).map_err(|err| {
        debug!(%err, "helper reply unreadable");
        Error::ControllerUnavailable
    })
}
