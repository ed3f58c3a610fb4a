//! WebSocket ingress: handshake, inbound protocol, liveness.

pub mod events;
pub mod handler;
pub mod liveness;
pub mod server;
pub mod session;
pub mod subscription;
