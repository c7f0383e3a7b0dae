use remain::sorted;
use thiserror::Error;

/// Adapter-facing failures (§7, the "Transport" error kind). The runtime
/// never panics translating one of these into a channel's
/// `(status, severity, message)` triple.
#[sorted]
#[derive(Error, Debug, Clone)]
pub enum PvError {
    #[error("channel already connected")]
    AlreadyConnected,
    #[error("pv name {0:?} could not be resolved")]
    BadName(String),
    #[error("no such subscription")]
    NoSuchSubscription,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("adapter does not support this request type")]
    Unsupported,
}

pub type PvResult<T> = Result<T, PvError>;
