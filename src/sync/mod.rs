//! Server-to-server federation: TS6 handshake, burst, topology, routing,
//! netsplit handling, and reconnection.

pub mod burst;
pub mod handshake;
pub mod link;
pub mod manager;
pub mod protocol;
pub mod split;
pub mod topology;
