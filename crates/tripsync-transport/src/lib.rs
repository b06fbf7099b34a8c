//! tripsync transport layer
//!
//! The hub side ([`CollabServer`]) accepts WebSocket connections, routes
//! frames into the session registry and fans bus events back out. The
//! client side ([`ConnectionManager`]) owns one supervised connection
//! with heartbeat and exponential-backoff reconnect.

pub mod backoff;
pub mod client;
pub mod error;
pub mod fault;
pub mod handler;
pub mod server;

pub use backoff::ReconnectPolicy;
pub use client::{ClientConfig, ClientEvent, ConnectionManager, ConnectionState, Heartbeat};
pub use error::TransportError;
pub use fault::{FaultBudget, FaultConfig};
pub use handler::{ConnectionHandler, Outcome};
pub use server::{CollabServer, DEFAULT_HEARTBEAT};
