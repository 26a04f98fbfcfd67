//! In-process transport connecting every peer replica hosted by a session

use std::collections::VecDeque;

use tracing::trace;

use crate::game::ActorId;

use super::message::NetMessage;

/// Something that can receive peer traffic
pub trait Endpoint {
    fn endpoint_id(&self) -> ActorId;
    fn receive(&mut self, msg: &NetMessage);
}

/// Queues messages submitted during one step and hands them to the
/// addressed endpoints on the next `deliver`. Messages a peer emits while
/// handling a delivery wait for the following step, so nothing a peer sends
/// is observed within the tick that produced it.
#[derive(Debug, Default)]
pub struct LoopbackNetwork {
    in_flight: VecDeque<NetMessage>,
    delivered: u64,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&mut self, messages: impl IntoIterator<Item = NetMessage>) {
        self.in_flight.extend(messages);
    }

    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Deliver everything queued so far. Returns the delivered batch in order.
    pub fn deliver<'a, E>(&mut self, endpoints: impl IntoIterator<Item = &'a mut E>) -> Vec<NetMessage>
    where
        E: Endpoint + 'a,
    {
        let batch: Vec<NetMessage> = self.in_flight.drain(..).collect();
        if batch.is_empty() {
            return batch;
        }

        for endpoint in endpoints {
            let id = endpoint.endpoint_id();
            for msg in batch.iter().filter(|m| m.is_for(id)) {
                trace!(receiver = %id, sender = %msg.sender(), "Delivering peer message");
                endpoint.receive(msg);
            }
        }

        self.delivered += batch.len() as u64;
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::TeamId;
    use crate::net::message::{NetEvent, Target};

    struct Recorder {
        id: ActorId,
        seen: Vec<NetMessage>,
    }

    impl Endpoint for Recorder {
        fn endpoint_id(&self) -> ActorId {
            self.id
        }

        fn receive(&mut self, msg: &NetMessage) {
            self.seen.push(msg.clone());
        }
    }

    #[test]
    fn test_routes_by_target() {
        let mut net = LoopbackNetwork::new();
        let mut peers = vec![
            Recorder { id: ActorId(1), seen: Vec::new() },
            Recorder { id: ActorId(2), seen: Vec::new() },
        ];

        net.submit([
            NetMessage::Event {
                from: ActorId(1),
                target: Target::All,
                event: NetEvent::MatchEnding { scores: vec![0, 0] },
            },
            NetMessage::Event {
                from: ActorId(1),
                target: Target::Others,
                event: NetEvent::FlagCaptured { stand: TeamId(0) },
            },
        ]);
        assert_eq!(net.pending(), 2);

        let batch = net.deliver(peers.iter_mut());
        assert_eq!(batch.len(), 2);
        assert_eq!(peers[0].seen.len(), 1);
        assert_eq!(peers[1].seen.len(), 2);
        assert_eq!(net.pending(), 0);
        assert_eq!(net.delivered(), 2);
    }
}
