//! Replication primitives and the in-process peer transport

pub mod loopback;
pub mod message;
pub mod ownership;
pub mod replicated;

pub use loopback::{Endpoint, LoopbackNetwork};
pub use message::{NetEvent, NetMessage, Outbox, SyncUpdate, Target};
pub use ownership::{NetObject, OwnershipTable};
pub use replicated::{Authority, Replicated, ReplicationError, Versioned};
