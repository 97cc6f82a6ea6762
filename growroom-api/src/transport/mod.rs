mod codec;
mod error;

pub use codec::{decode, encode};
pub use error::{Result, TransportError};

/// Frames larger than this are rejected before parsing (1MB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
