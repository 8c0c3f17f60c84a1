use thiserror::Error;

/// Error taxonomy shared by every transport.
///
/// The hybrid orchestrator dispatches on these variants: any local-channel
/// error is recoverable via cloud fallback, while a cloud-channel error is
/// terminal for that call.
#[derive(Error, Debug)]
pub enum Error {
    /// Device unreachable or authentication failed. Fatal until reconnect.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Malformed frame, CRC mismatch, device exception or decode failure.
    #[error("read error: {0}")]
    ReadError(String),

    /// Write rejected by the device.
    #[error("write error: {0}")]
    WriteError(String),

    /// No response by the per-request deadline.
    #[error("timeout: {0}")]
    TimeoutError(String),
}

impl Error {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    pub fn read(msg: impl Into<String>) -> Self {
        Self::ReadError(msg.into())
    }

    pub fn write(msg: impl Into<String>) -> Self {
        Self::WriteError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::TimeoutError(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::ConnectionError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
