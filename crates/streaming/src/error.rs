//! Transport-level errors.

use crate::codec::MAX_FRAME_LEN;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),
}

impl StreamingError {
    /// Fold into the shared taxonomy, blaming `addr` for I/O failures.
    pub fn into_core(self, addr: &str) -> corelib::Error {
        match self {
            StreamingError::Io(e) => corelib::Error::RemoteUnreachable {
                addr: addr.to_string(),
                reason: e.to_string(),
            },
            other => corelib::Error::Malformed(other.to_string()),
        }
    }
}
