//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::hud::HudState;
use crate::game::{MatchResult, PeerCommand};
use crate::lobby::Slot;
use crate::net::NetMessage;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Take a seat in the lobby, using the name given on connect
    Join,

    /// Start a match with the current seating (master only)
    StartMatch,

    /// Input for the actor this client controls
    Command { command: PeerCommand },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Give up the seat
    Leave,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { client_id: Uuid, server_time: u64 },

    /// Seat assigned to this client
    Joined { slot: Slot },

    /// Another client took or left a seat
    SeatingChanged { seats: Vec<Slot> },

    MatchStarted { roster: Vec<Slot> },

    /// Control is back with the lobby
    MatchEnded {
        scores: Vec<u32>,
        result: Option<MatchResult>,
    },

    /// Peer traffic routed during one host tick
    Net { tick: u64, messages: Vec<NetMessage> },

    /// Latest HUD values for this client's actor
    Hud { hud: HudState },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
