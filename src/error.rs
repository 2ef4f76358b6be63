use std::fmt;
use std::io;

/// Crate-local error type for ambient, non-protocol failures: configuration loading, process
/// spawn I/O before a [`crate::process::ChildProcess`] exists, and encoding failures.
///
/// This is distinct from [`crate::reply_code::ReplyCode`], which carries the SFTP helper
/// protocol's own status values. An ambient `Io` failure while talking to an already-alive helper
/// is translated into `ReplyCode::ERROR | ReplyCode::DISCONNECTED` at the `ControlSocket`
/// boundary rather than propagated as a `ControlError`; see DESIGN.md.
#[derive(Debug)]
pub enum ControlError {
    Io(io::Error),
    Config(String),
    Encoding(String),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ControlError::Io(e) => write!(f, "i/o error: {}", e),
            ControlError::Config(msg) => write!(f, "configuration error: {}", msg),
            ControlError::Encoding(msg) => write!(f, "encoding error: {}", msg),
        }
    }
}

impl std::error::Error for ControlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ControlError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ControlError {
    fn from(e: io::Error) -> Self {
        ControlError::Io(e)
    }
}

pub type ControlResult<T> = Result<T, ControlError>;
