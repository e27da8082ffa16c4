use thiserror::Error;

/// A generic boxed error type.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// A convenient Result alias returning `AnyError`.
pub type AnyResult<T> = std::result::Result<T, AnyError>;

/// Pipeline error kinds.
///
/// `Transport` and `Format` are fatal to a play session; `Unsupported` is
/// returned to the caller without terminating playback (a seek on a live
/// stream); `Unplayable` lets a command surface skip a track instead of
/// failing on it.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O failure or unexpected HTTP status.
    #[error("transport: {0}")]
    Transport(String),

    /// Unexpected EBML structure or a missing required element.
    #[error("format: {0}")]
    Format(String),

    /// The player script did not match the known obfuscation shapes.
    #[error("cipher: {0}")]
    Cipher(String),

    /// The operation is valid but not available for this resource.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The watch-page structure was not recognized or no audio track exists.
    #[error("unplayable: {0}")]
    Unplayable(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}
