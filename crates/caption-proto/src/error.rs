use thiserror::Error;

/// Failures on the encoder link.  None of these end the daemon; transport
/// errors lead to a reconnect, the rest are only reported.
#[derive(Debug, Error)]
pub enum CaptionError {
    #[error("no host configured")]
    MissingHost,
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("encoder reported an error")]
    DeviceError,
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("link closed")]
    LinkClosed,
}
