pub mod message;
pub mod models;
pub mod transport;

pub use message::{Envelope, events};
pub use models::{ControlType, Sector};
