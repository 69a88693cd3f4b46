use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Ranging sensor timeout: no echo")]
    SensorTimeout,

    #[error("Ambient sensor returned an invalid reading")]
    SensorInvalidReading,

    #[error("Network unavailable")]
    NetworkUnavailable,

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Collector responded with status {0}")]
    TransportStatus(u16),

    #[error("Time sync failed: {0}")]
    TimeSync(String),

    #[error("JSON decoding error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors caused by the remote side or the link, as opposed to local hardware.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Error::NetworkUnavailable
                | Error::Transport(_)
                | Error::TransportStatus(_)
                | Error::TimeSync(_)
        )
    }
}
