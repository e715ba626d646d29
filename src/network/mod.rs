//! Client-facing networking: listeners, transports, and the
//! per-connection driver.

pub mod connection;
pub mod gateway;
pub mod tls;
pub mod transport;
pub mod websocket;

pub use gateway::Gateway;
