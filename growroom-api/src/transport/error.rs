use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Envelope serialization failed
    Serialization(String),
    /// Frame is not a valid envelope
    Deserialization(String),
    /// Frame exceeds size limit
    FrameTooLarge(usize),
    /// Channel to the backend is gone
    Closed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
            Self::Deserialization(e) => write!(f, "Deserialization error: {}", e),
            Self::FrameTooLarge(size) => write!(f, "Frame too large: {} bytes", size),
            Self::Closed => write!(f, "Channel closed"),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = core::result::Result<T, TransportError>;
