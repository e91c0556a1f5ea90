use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the in-process SMC transport and the privileged
/// helper. The helper maps these onto numeric wire statuses
/// ([`crate::proto::HelperStatus`]); callers never need to know which side of
/// the privilege boundary a failure came from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("operation requires elevated privileges")]
    PermissionDenied,
    #[error("the SMC service is unreachable")]
    SmcUnavailable,
    #[error("SMC key names are exactly four ASCII characters")]
    InvalidKey,
    #[error("SMC key does not exist or reports no data")]
    KeyNotFound,
    #[error("SMC key size or type does not match its definition")]
    TypeMismatch,
    #[error("SMC write failed")]
    WriteFailed,
    #[error("SMC read failed")]
    ReadFailed,
    #[error("battery controller unavailable")]
    ControllerUnavailable,
    #[error("charge control is not available on this machine")]
    Unsupported,
    #[error("unable to read the current power source state")]
    PowerSourceUnavailable,
    #[error("{0}")]
    Unknown(String),
}
