pub mod client;
pub mod command;
pub mod connection;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod notes;
pub mod notify;
pub mod settings;
pub mod storage;
pub mod store;
pub mod sync;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use client::Client;
pub use connection::{ConnectionState, Transport};
pub use error::{ClientError, Result};
