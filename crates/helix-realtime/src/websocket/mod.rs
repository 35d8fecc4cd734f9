//! WebSocket transport: handshake gateway, inbound dispatch, and the
//! per-connection read/write loops.

pub mod gateway;
pub mod handler;
pub mod session;
