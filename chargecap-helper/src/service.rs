//! Request handling: one JSON frame in, one JSON frame out.
//!
//! Status codes on the wire are plain integers; this side maps its own
//! errors onto them and never assumes the app shares its enum layout.

use std::io::{self, BufReader};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use chargecap_lib::diag;
use chargecap_lib::error::{Error, Result};
use chargecap_lib::io::{SmcIo, platform_smc};
use chargecap_lib::key::{ChargeControlStrategy, charging_switch_candidates, firmware_limit_key};
use chargecap_lib::proto::{
    self, DiagnosticReply, HelperReply, HelperRequest, HelperStatus, ReadKeyReply,
};
use chargecap_lib::resolver::{self, WriteCapability};
use tracing::{debug, info, warn};

const CONNECTION_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub fn serve(stream: UnixStream) -> io::Result<()> {
    stream.set_read_timeout(Some(CONNECTION_IDLE_TIMEOUT))?;
    stream.set_write_timeout(Some(CONNECTION_IDLE_TIMEOUT))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    loop {
        let request: HelperRequest = match proto::read_frame(&mut reader) {
            Ok(request) => request,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        };
        debug!(?request, "handling request");
        let io = platform_smc();
        let reply = handle(io.as_ref(), &request);
        proto::write_frame(&mut writer, &reply)?;
    }
}

fn handle(io: &dyn SmcIo, request: &HelperRequest) -> HelperReply {
    match request {
        HelperRequest::SetChargingEnabled { enabled } => {
            status_only(set_charging_enabled(io, *enabled))
        }
        HelperRequest::SetChargeLimit { percent } => status_only(set_charge_limit(io, *percent)),
        HelperRequest::ReadKey { key } => read_key(io, key),
        HelperRequest::DiagnoseChargeLimit { percent } => diagnose(io, *percent),
    }
}

fn status_only(result: Result<()>) -> HelperReply {
    match result {
        Ok(()) => HelperReply::ok(),
        Err(err) => {
            warn!(%err, "request failed");
            HelperReply::from_status(HelperStatus::from_error(&err))
        }
    }
}

/// Resolves the switch layout for this hardware generation and writes the
/// on/off pattern to every member key.
fn set_charging_enabled(io: &dyn SmcIo, enabled: bool) -> Result<()> {
    let (strategy, capability) = resolver::resolve(io, &charging_switch_candidates());
    let switch = match (strategy, capability) {
        (Some(ChargeControlStrategy::Switch(switch)), WriteCapability::Supported) => switch,
        (_, capability) => {
            return Err(capability.into_error().unwrap_or(Error::KeyNotFound));
        }
    };
    let pattern = if enabled { &switch.enable_bytes } else { &switch.disable_bytes };
    for def in &switch.keys {
        io.write_key(def, pattern)?;
    }
    info!(enabled, keys = ?switch.key_names(), "charging switch written");
    Ok(())
}

fn set_charge_limit(io: &dyn SmcIo, percent: u8) -> Result<()> {
    let clamped = percent.clamp(1, 100);
    io.write_key(&firmware_limit_key(), &[clamped])?;
    info!(limit = clamped, "charge limit written");
    Ok(())
}

fn read_key(io: &dyn SmcIo, key: &str) -> HelperReply {
    let report = diag::read_key_report(io, key);
    let status = match report.stage {
        diag::KeyReadStage::Ok => HelperStatus::Ok,
        diag::KeyReadStage::InvalidKey => HelperStatus::InvalidKey,
        _ => HelperStatus::Unknown,
    };
    HelperReply {
        status: status.code(),
        diagnostic: None,
        reading: Some(ReadKeyReply {
            stage: report.stage.code(),
            kern_return: report.kern_return,
            data_size: report.data_size,
            data_type: report.data_type,
            bytes: report.bytes,
            truncated: report.truncated,
        }),
    }
}

fn diagnose(io: &dyn SmcIo, percent: u8) -> HelperReply {
    let clamped = percent.clamp(1, 100);
    let diagnosis = diag::diagnose_charge_limit(io, &firmware_limit_key(), clamped);
    HelperReply {
        status: diagnosis.status.code(),
        diagnostic: Some(DiagnosticReply {
            stage: diagnosis.stage.code(),
            kern_return: diagnosis.kern_return,
            data_size: diagnosis.data_size,
            data_type: diagnosis.data_type,
        }),
        reading: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chargecap_lib::io::{KeyInfo, SmcReading};
    use chargecap_lib::key::{KeyDefinition, SmcKey};
    use std::sync::Mutex;

    /// Just enough of a transport to exercise request handling.
    #[derive(Default)]
    struct FakeSmc {
        keys: Vec<(SmcKey, u32)>,
        writes: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl FakeSmc {
        fn with_key(mut self, name: &str, size: u32) -> Self {
            self.keys.push((SmcKey::new(name).unwrap(), size));
            self
        }

        fn writes(&self) -> Vec<(String, Vec<u8>)> {
            self.writes.lock().unwrap().clone()
        }

        fn size_of(&self, key: SmcKey) -> Option<u32> {
            self.keys.iter().find(|(k, _)| *k == key).map(|(_, size)| *size)
        }
    }

    impl SmcIo for FakeSmc {
        fn key_info(&self, key: SmcKey) -> Result<KeyInfo> {
            match self.size_of(key) {
                Some(data_size) => Ok(KeyInfo {
                    data_size,
                    data_type: chargecap_lib::key::SmcDataType::UI8.code(),
                }),
                None => Err(Error::KeyNotFound),
            }
        }

        fn read_key(&self, key: SmcKey) -> Result<SmcReading> {
            let info = self.key_info(key)?;
            Ok(SmcReading {
                key,
                data_size: info.data_size,
                data_type: info.data_type,
                bytes: vec![0; info.data_size as usize],
                truncated: false,
            })
        }

        fn write_key(&self, def: &KeyDefinition, value: &[u8]) -> Result<()> {
            self.key_info(def.key)?;
            self.writes.lock().unwrap().push((def.key.to_string(), value.to_vec()));
            Ok(())
        }

        fn key_count(&self) -> Result<u32> {
            Ok(self.keys.len() as u32)
        }

        fn key_at_index(&self, index: u32) -> Result<SmcKey> {
            self.keys.get(index as usize).map(|(key, _)| *key).ok_or(Error::ReadFailed)
        }
    }

    #[test]
    fn disabling_charging_writes_the_inhibit_pattern() {
        let io = FakeSmc::default().with_key("CHTE", 4);
        let reply = handle(&io, &HelperRequest::SetChargingEnabled { enabled: false });
        assert_eq!(reply.status, HelperStatus::Ok.code());
        assert_eq!(io.writes(), [("CHTE".to_string(), vec![0x01, 0x00, 0x00, 0x00])]);
    }

    #[test]
    fn legacy_switch_writes_both_keys() {
        let io = FakeSmc::default().with_key("CH0B", 1).with_key("CH0C", 1);
        let reply = handle(&io, &HelperRequest::SetChargingEnabled { enabled: false });
        assert_eq!(reply.status, HelperStatus::Ok.code());
        assert_eq!(
            io.writes(),
            [("CH0B".to_string(), vec![0x02]), ("CH0C".to_string(), vec![0x02])]
        );
    }

    #[test]
    fn missing_switch_reports_key_not_found() {
        let io = FakeSmc::default();
        let reply = handle(&io, &HelperRequest::SetChargingEnabled { enabled: true });
        assert_eq!(reply.status, HelperStatus::KeyNotFound.code());
        assert!(io.writes().is_empty());
    }

    #[test]
    fn charge_limit_is_clamped_before_writing() {
        let io = FakeSmc::default().with_key("BCLM", 1);
        let reply = handle(&io, &HelperRequest::SetChargeLimit { percent: 0 });
        assert_eq!(reply.status, HelperStatus::Ok.code());
        assert_eq!(io.writes(), [("BCLM".to_string(), vec![1])]);
    }

    #[test]
    fn read_key_reply_carries_the_report() {
        let io = FakeSmc::default().with_key("CHTE", 4);
        let reply = handle(&io, &HelperRequest::ReadKey { key: "CHTE".to_string() });
        let reading = reply.reading.expect("reading payload");
        assert_eq!(reading.stage, diag::KeyReadStage::Ok.code());
        assert_eq!(reading.data_size, 4);

        let reply = handle(&io, &HelperRequest::ReadKey { key: "no".to_string() });
        assert_eq!(reply.status, HelperStatus::InvalidKey.code());
    }

    #[test]
    fn diagnose_reply_carries_the_stages() {
        let io = FakeSmc::default().with_key("BCLM", 1);
        let reply = handle(&io, &HelperRequest::DiagnoseChargeLimit { percent: 80 });
        assert_eq!(reply.status, HelperStatus::Ok.code());
        let diagnostic = reply.diagnostic.expect("diagnostic payload");
        assert_eq!(diagnostic.stage, diag::DiagnoseStage::Ok.code());
        assert_eq!(io.writes(), [("BCLM".to_string(), vec![80])]);
    }
}
