//! Client WebSocket surface

pub mod handler;
pub mod protocol;
