//! WebSocket gateway for the avatar chat pipeline.
//!
//! Hosts the per-user WebSocket endpoint, the connection registry, and the
//! HTTP monitoring surface (health, stats, voices, system info).

pub mod connection;
pub mod server;
pub mod state;

pub use server::{router, start_gateway};
pub use state::{ConnectionManager, GatewayState, SessionHandle, SessionMeta};
