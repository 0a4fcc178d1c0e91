//! Target server and the driver's connection to it.

pub mod client;
pub mod framing;
pub mod server;

// Public API - used by main.rs
pub use client::TargetClient;
pub use server::TargetServer;
