//! Socket protocol for remote monitoring and control of jobs.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{ClientConfig, RemoteClient};
pub use protocol::{MessageReader, MessageType, NetworkMessage, DEFAULT_PORT};
pub use server::StatusServer;
