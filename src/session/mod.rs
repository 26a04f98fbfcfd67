//! Host loop running every peer replica of one arena.
//!
//! Each seated client drives one `Peer`. The session owns all of them, steps
//! them at `SIMULATION_TPS`, routes their traffic through the loopback
//! network and publishes a status snapshot for the HTTP surface.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::game::arena::Arena;
use crate::game::flag::FlagState;
use crate::game::hud::SharedHud;
use crate::game::{ActorId, Hand, Holder, MatchPhase, MatchResult, Peer, PeerCommand, TeamId};
use crate::lobby::{Lobby, LobbyError, SlotTable};
use crate::net::{LoopbackNetwork, NetMessage, NetObject};
use crate::util::time::{tick_delta, SIMULATION_TPS, STATUS_TPS, TICK_DURATION_MICROS};
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Input to the session task
#[derive(Debug)]
pub enum SessionInput {
    /// A socket opened; `outbound` carries messages for that client only
    Connect {
        client: Uuid,
        name: String,
        outbound: mpsc::Sender<ServerMsg>,
    },
    Client { client: Uuid, msg: ClientMsg },
    Disconnect { client: Uuid },
}

/// Lobby callback handed to every peer. The request is picked up after the
/// current step so no peer is reset from inside another peer's tick.
#[derive(Debug, Default)]
struct SessionLobby {
    end_requested: AtomicBool,
}

impl Lobby for SessionLobby {
    fn end_session(&self) {
        self.end_requested.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerStatus {
    pub actor: ActorId,
    pub name: String,
    pub team: TeamId,
    pub health: f32,
    pub alive: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlagStatus {
    pub team: TeamId,
    pub state: FlagState,
    pub holder: Option<Holder>,
}

/// Read-only view of the session, as seen by the master peer
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub tick: u64,
    pub phase: MatchPhase,
    pub scores: Vec<u32>,
    pub countdown: u32,
    pub result: Option<MatchResult>,
    pub players: Vec<PlayerStatus>,
    pub flags: Vec<FlagStatus>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            tick: 0,
            phase: MatchPhase::Idle,
            scores: Vec::new(),
            countdown: 0,
            result: None,
            players: Vec::new(),
            flags: Vec::new(),
        }
    }
}

/// Handle for talking to a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub input_tx: mpsc::Sender<SessionInput>,
    pub feed_tx: broadcast::Sender<ServerMsg>,
    status: Arc<RwLock<SessionStatus>>,
}

impl SessionHandle {
    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }

    /// Shared wire feed: seating, match boundaries and peer traffic
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.feed_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.input_tx.is_closed()
    }
}

struct ClientSeat {
    name: String,
    outbound: mpsc::Sender<ServerMsg>,
    hud: SharedHud,
    actor: Option<ActorId>,
}

pub struct ArenaSession {
    arena: Arc<Arena>,
    seed: u64,
    lobby: Arc<SessionLobby>,
    slots: SlotTable,
    clients: HashMap<Uuid, ClientSeat>,
    peers: BTreeMap<ActorId, Peer>,
    net: LoopbackNetwork,
    in_match: bool,
    tick: u64,
    input_rx: mpsc::Receiver<SessionInput>,
    feed_tx: broadcast::Sender<ServerMsg>,
    status: Arc<RwLock<SessionStatus>>,
}

impl ArenaSession {
    pub fn new(config: &Config) -> (Self, SessionHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (feed_tx, _) = broadcast::channel(64);
        let status = Arc::new(RwLock::new(SessionStatus::default()));
        let seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());

        let session = Self {
            arena: Arena::from_config(config),
            seed,
            lobby: Arc::new(SessionLobby::default()),
            slots: SlotTable::new(config.game.max_players, config.game.num_teams),
            clients: HashMap::new(),
            peers: BTreeMap::new(),
            net: LoopbackNetwork::new(),
            in_match: false,
            tick: 0,
            input_rx,
            feed_tx: feed_tx.clone(),
            status: status.clone(),
        };

        let handle = SessionHandle {
            input_tx,
            feed_tx,
            status,
        };

        (session, handle)
    }

    /// Run the host loop until every handle is dropped
    pub async fn run(mut self) {
        info!(
            seed = self.seed,
            weapons = self.arena.weapons.len(),
            teams = self.arena.num_teams(),
            "Arena session started"
        );

        let mut tick_interval = interval(Duration::from_micros(TICK_DURATION_MICROS));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let status_every = u64::from((SIMULATION_TPS / STATUS_TPS).max(1));

        loop {
            tick_interval.tick().await;

            if !self.process_inputs() {
                info!("All session handles dropped, stopping");
                break;
            }

            self.step(tick_delta());

            if self.tick % status_every == 0 {
                self.publish_status();
            }
        }
    }

    /// Drain queued inputs. Returns false once every sender is gone.
    fn process_inputs(&mut self) -> bool {
        loop {
            match self.input_rx.try_recv() {
                Ok(input) => self.handle_input(input),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    pub fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Connect {
                client,
                name,
                outbound,
            } => {
                info!(client_id = %client, name = %name, "Client connected");
                self.clients.insert(
                    client,
                    ClientSeat {
                        name,
                        outbound,
                        hud: SharedHud::new(),
                        actor: None,
                    },
                );
            }
            SessionInput::Client { client, msg } => match msg {
                ClientMsg::Join => self.join(client),
                ClientMsg::StartMatch => self.start_match(client),
                ClientMsg::Command { command } => self.command(client, command),
                ClientMsg::Ping { t } => self.send(client, ServerMsg::Pong { t }),
                ClientMsg::Leave => self.leave(client),
            },
            SessionInput::Disconnect { client } => {
                self.leave(client);
                if self.clients.remove(&client).is_some() {
                    info!(client_id = %client, "Client disconnected");
                }
            }
        }
    }

    fn send(&self, client: Uuid, msg: ServerMsg) {
        let Some(seat) = self.clients.get(&client) else {
            return;
        };
        if seat.outbound.try_send(msg).is_err() {
            debug!(client_id = %client, "Client outbound full or closed, message dropped");
        }
    }

    fn seat_actor(&self, client: Uuid) -> Option<ActorId> {
        self.clients.get(&client).and_then(|seat| seat.actor)
    }

    fn join(&mut self, client: Uuid) {
        let Some(seat) = self.clients.get(&client) else {
            warn!(client_id = %client, "Join from unknown client");
            return;
        };
        if let Some(actor) = seat.actor {
            self.send(client, ServerMsg::error("already_seated", format!("Already seated as {}", actor)));
            return;
        }
        if self.in_match {
            self.send(client, ServerMsg::error("join_rejected", LobbyError::MatchRunning.to_string()));
            return;
        }
        let name = seat.name.clone();
        let hud = seat.hud.clone();

        let slot = match self.slots.join(name) {
            Ok(slot) => slot,
            Err(e) => {
                warn!(client_id = %client, error = %e, "Join rejected");
                self.send(client, ServerMsg::error("join_rejected", e.to_string()));
                return;
            }
        };

        let peer = Peer::new(slot.actor, self.arena.clone(), self.lobby.clone(), Arc::new(hud), self.seed);
        self.peers.insert(slot.actor, peer);
        if let Some(seat) = self.clients.get_mut(&client) {
            seat.actor = Some(slot.actor);
        }

        info!(client_id = %client, actor = %slot.actor, team = %slot.team, slot = slot.index, "Player seated");
        self.send(client, ServerMsg::Joined { slot });
        self.announce_seating();
    }

    fn announce_seating(&self) {
        let _ = self.feed_tx.send(ServerMsg::SeatingChanged {
            seats: self.slots.roster().slots().to_vec(),
        });
    }

    fn start_match(&mut self, client: Uuid) {
        let Some(actor) = self.seat_actor(client) else {
            self.send(client, ServerMsg::error("not_seated", "Join before starting a match"));
            return;
        };
        if self.in_match {
            self.send(client, ServerMsg::error("start_rejected", LobbyError::MatchRunning.to_string()));
            return;
        }
        let roster = Arc::new(self.slots.roster());
        if roster.master() != Some(actor) {
            self.send(client, ServerMsg::error("start_rejected", LobbyError::NotMaster.to_string()));
            return;
        }

        self.lobby.end_requested.store(false, Ordering::SeqCst);
        for peer in self.peers.values_mut() {
            peer.on_match_start(roster.clone());
        }
        self.in_match = true;

        info!(master = %actor, players = roster.len(), "Match started");
        let _ = self.feed_tx.send(ServerMsg::MatchStarted {
            roster: roster.slots().to_vec(),
        });
    }

    fn command(&mut self, client: Uuid, command: PeerCommand) {
        let Some(actor) = self.seat_actor(client) else {
            self.send(client, ServerMsg::error("not_seated", "Join before sending commands"));
            return;
        };
        let Some(peer) = self.peers.get_mut(&actor) else {
            warn!(actor = %actor, "Seated actor has no peer");
            return;
        };
        if let Err(e) = peer.handle_command(command) {
            debug!(actor = %actor, error = %e, "Command rejected");
            self.send(client, ServerMsg::error("command_rejected", e.to_string()));
        }
    }

    fn leave(&mut self, client: Uuid) {
        let Some(actor) = self.clients.get_mut(&client).and_then(|seat| seat.actor.take()) else {
            return;
        };
        if let Err(e) = self.slots.leave(actor) {
            warn!(actor = %actor, error = %e, "Leave for a seat that was already free");
        }

        if let Some(mut peer) = self.peers.remove(&actor) {
            if self.in_match {
                let _ = peer.handle_command(PeerCommand::Drop { hand: Hand::Left });
                let _ = peer.handle_command(PeerCommand::Drop { hand: Hand::Right });
                let mut outgoing = peer.drain_outbox();
                outgoing.extend(self.handover(&peer));
                self.net.submit(outgoing);
            }
        }

        info!(client_id = %client, actor = %actor, "Player left");
        self.announce_seating();

        if self.in_match && self.peers.is_empty() {
            self.end_match();
        }
    }

    /// Transfers for everything the leaving peer owned, sent on its behalf
    /// to the new master seat
    fn handover(&self, peer: &Peer) -> Vec<NetMessage> {
        let Some(new_owner) = self.slots.roster().master() else {
            return Vec::new();
        };
        let leaving = peer.local();

        std::iter::once(NetObject::Match)
            .chain(peer.weapons().iter().map(|w| NetObject::Weapon(w.id())))
            .chain(peer.flags().iter().map(|f| NetObject::Flag(f.team())))
            .filter(|object| peer.ownership().is_owner(leaving, *object))
            .map(|object| {
                debug!(object = ?object, from = %leaving, to = %new_owner, "Handing over ownership");
                NetMessage::Ownership {
                    from: leaving,
                    object,
                    owner: new_owner,
                }
            })
            .collect()
    }

    /// One host tick: step every replica, then route what they sent
    pub fn step(&mut self, dt: f32) {
        self.tick += 1;

        for peer in self.peers.values_mut() {
            peer.tick(dt);
        }
        for peer in self.peers.values_mut() {
            self.net.submit(peer.drain_outbox());
        }

        let batch = self.net.deliver(self.peers.values_mut());
        if !batch.is_empty() {
            let _ = self.feed_tx.send(ServerMsg::Net {
                tick: self.tick,
                messages: batch,
            });
        }

        if self.lobby.end_requested.swap(false, Ordering::SeqCst) {
            self.end_match();
        }
    }

    fn master_peer(&self) -> Option<&Peer> {
        self.slots.roster().master().and_then(|actor| self.peers.get(&actor))
    }

    fn end_match(&mut self) {
        if !self.in_match {
            return;
        }
        let (scores, result) = self
            .master_peer()
            .map(|peer| (peer.game().scores().to_vec(), peer.game().result()))
            .unwrap_or_default();

        for peer in self.peers.values_mut() {
            peer.on_match_end();
            peer.drain_outbox();
        }
        // traffic of the finished match is dropped
        self.net = LoopbackNetwork::new();
        self.in_match = false;

        info!(scores = ?scores, result = ?result, "Match over, back to lobby");
        let _ = self.feed_tx.send(ServerMsg::MatchEnded { scores, result });
    }

    pub fn in_match(&self) -> bool {
        self.in_match
    }

    pub fn peer(&self, actor: ActorId) -> Option<&Peer> {
        self.peers.get(&actor)
    }

    /// Refresh the shared status and push every seated client its HUD
    pub fn publish_status(&mut self) {
        let roster = self.slots.roster();
        let status = match self.master_peer() {
            Some(peer) => SessionStatus {
                tick: self.tick,
                phase: peer.phase(),
                scores: peer.game().scores().to_vec(),
                countdown: peer.game().countdown_secs(),
                result: peer.game().result(),
                players: roster
                    .slots()
                    .iter()
                    .map(|slot| {
                        let actor = peer.actor(slot.actor);
                        PlayerStatus {
                            actor: slot.actor,
                            name: slot.name.clone(),
                            team: slot.team,
                            health: actor.map_or(0.0, |a| a.health()),
                            alive: actor.is_some_and(|a| a.is_alive()),
                        }
                    })
                    .collect(),
                flags: peer
                    .flags()
                    .iter()
                    .map(|f| FlagStatus {
                        team: f.team(),
                        state: f.state(),
                        holder: f.holder(),
                    })
                    .collect(),
            },
            None => SessionStatus {
                tick: self.tick,
                ..SessionStatus::default()
            },
        };
        *self.status.write() = status;

        for seat in self.clients.values() {
            if seat.actor.is_some() {
                let _ = seat.outbound.try_send(ServerMsg::Hud { hud: seat.hud.take() });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use tokio_test::assert_ok;

    fn config() -> Config {
        let mut config = Config::default();
        config.seed = Some(11);
        config.game.game_length = 0.5;
        config.game.end_game_delay = 0.2;
        config
    }

    fn connect(session: &mut ArenaSession, name: &str) -> (Uuid, mpsc::Receiver<ServerMsg>) {
        let client = Uuid::new_v4();
        let (outbound, rx) = mpsc::channel(64);
        session.handle_input(SessionInput::Connect {
            client,
            name: name.to_string(),
            outbound,
        });
        (client, rx)
    }

    fn send(session: &mut ArenaSession, client: Uuid, msg: ClientMsg) {
        session.handle_input(SessionInput::Client { client, msg });
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMsg>) -> Vec<ServerMsg> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn seated(rx: &mut mpsc::Receiver<ServerMsg>) -> ActorId {
        drain(rx)
            .into_iter()
            .find_map(|msg| match msg {
                ServerMsg::Joined { slot } => Some(slot.actor),
                _ => None,
            })
            .unwrap()
    }

    fn has_error(rx: &mut mpsc::Receiver<ServerMsg>, code: &str) -> bool {
        drain(rx)
            .iter()
            .any(|msg| matches!(msg, ServerMsg::Error { code: c, .. } if c == code))
    }

    #[test]
    fn test_only_master_starts_match() {
        let (mut session, handle) = ArenaSession::new(&config());
        let (a, mut a_rx) = connect(&mut session, "alice");
        let (b, mut b_rx) = connect(&mut session, "bob");
        send(&mut session, a, ClientMsg::Join);
        send(&mut session, b, ClientMsg::Join);
        let alice = seated(&mut a_rx);
        let bob = seated(&mut b_rx);

        send(&mut session, b, ClientMsg::StartMatch);
        assert!(has_error(&mut b_rx, "start_rejected"));
        assert!(!session.in_match());

        send(&mut session, a, ClientMsg::StartMatch);
        assert!(session.in_match());
        session.step(tick_delta());
        session.publish_status();

        let status = handle.status();
        assert_eq!(status.phase, MatchPhase::Running);
        assert_eq!(status.players.len(), 2);
        assert!(status.players.iter().all(|p| p.alive));
        assert_eq!(session.peer(bob).unwrap().phase(), MatchPhase::Running);
        assert_eq!(session.peer(alice).unwrap().game().scores(), &[0, 0]);

        let hud = drain(&mut b_rx)
            .into_iter()
            .find_map(|msg| match msg {
                ServerMsg::Hud { hud } => Some(hud),
                _ => None,
            })
            .unwrap();
        assert_eq!(hud.health, 1.0);
    }

    #[test]
    fn test_join_closed_during_match() {
        let (mut session, _handle) = ArenaSession::new(&config());
        let (a, mut a_rx) = connect(&mut session, "alice");
        send(&mut session, a, ClientMsg::Join);
        seated(&mut a_rx);
        send(&mut session, a, ClientMsg::StartMatch);

        let (late, mut late_rx) = connect(&mut session, "late");
        send(&mut session, late, ClientMsg::Join);
        assert!(has_error(&mut late_rx, "join_rejected"));
    }

    #[test]
    fn test_commands_reach_the_clients_peer() {
        let (mut session, _handle) = ArenaSession::new(&config());
        let (a, mut a_rx) = connect(&mut session, "alice");
        send(&mut session, a, ClientMsg::Join);
        let alice = seated(&mut a_rx);

        let target = Vec3::new(1.0, 0.0, 2.0);
        // nothing held yet
        send(
            &mut session,
            a,
            ClientMsg::Command {
                command: PeerCommand::Drop { hand: Hand::Left },
            },
        );
        assert!(has_error(&mut a_rx, "command_rejected"));

        send(&mut session, a, ClientMsg::StartMatch);
        send(
            &mut session,
            a,
            ClientMsg::Command {
                command: PeerCommand::Move { position: target },
            },
        );
        assert!(!has_error(&mut a_rx, "command_rejected"));
        assert_eq!(session.peer(alice).unwrap().actor(alice).unwrap().position(), target);
    }

    #[test]
    fn test_time_up_returns_to_lobby() {
        let (mut session, handle) = ArenaSession::new(&config());
        let mut feed = handle.subscribe();
        let (a, mut a_rx) = connect(&mut session, "alice");
        let (b, mut b_rx) = connect(&mut session, "bob");
        send(&mut session, a, ClientMsg::Join);
        send(&mut session, b, ClientMsg::Join);
        let bob = seated(&mut b_rx);
        seated(&mut a_rx);
        send(&mut session, a, ClientMsg::StartMatch);

        // 0.5 s of match, 0.2 s of result screen, a few ticks of slack
        for _ in 0..30 {
            session.step(tick_delta());
            if !session.in_match() {
                break;
            }
        }
        assert!(!session.in_match());
        assert_eq!(session.peer(bob).unwrap().phase(), MatchPhase::Idle);

        let mut ended = None;
        while let Ok(msg) = feed.try_recv() {
            if let ServerMsg::MatchEnded { scores, result } = msg {
                ended = Some((scores, result));
            }
        }
        assert_eq!(ended, Some((vec![0, 0], Some(MatchResult::Draw))));

        // a new match can start from the lobby
        send(&mut session, a, ClientMsg::StartMatch);
        assert!(session.in_match());
    }

    #[test]
    fn test_master_leaving_hands_over_match() {
        let (mut session, _handle) = ArenaSession::new(&config());
        let (a, mut a_rx) = connect(&mut session, "alice");
        let (b, mut b_rx) = connect(&mut session, "bob");
        send(&mut session, a, ClientMsg::Join);
        send(&mut session, b, ClientMsg::Join);
        seated(&mut a_rx);
        let bob = seated(&mut b_rx);
        send(&mut session, a, ClientMsg::StartMatch);
        session.step(tick_delta());

        session.handle_input(SessionInput::Disconnect { client: a });
        session.step(tick_delta());

        let peer = session.peer(bob).unwrap();
        assert!(peer.ownership().is_owner(bob, NetObject::Match));
        assert!(session.in_match());

        // the new owner runs the clock out
        for _ in 0..30 {
            session.step(tick_delta());
        }
        assert!(!session.in_match());
    }

    #[test]
    fn test_master_leaving_during_ending_still_returns_to_lobby() {
        let (mut session, _handle) = ArenaSession::new(&config());
        let (a, mut a_rx) = connect(&mut session, "alice");
        let (b, mut b_rx) = connect(&mut session, "bob");
        send(&mut session, a, ClientMsg::Join);
        send(&mut session, b, ClientMsg::Join);
        seated(&mut a_rx);
        let bob = seated(&mut b_rx);
        send(&mut session, a, ClientMsg::StartMatch);

        for _ in 0..60 {
            session.step(tick_delta());
            if session.peer(bob).is_some_and(|p| p.phase() == MatchPhase::Ending) {
                break;
            }
        }
        assert_eq!(session.peer(bob).unwrap().phase(), MatchPhase::Ending);

        session.handle_input(SessionInput::Disconnect { client: a });
        for _ in 0..30 {
            session.step(tick_delta());
        }
        assert!(!session.in_match());
    }

    #[tokio::test]
    async fn test_run_loop_serves_clients_until_handles_drop() {
        let (session, handle) = ArenaSession::new(&config());
        let task = tokio::spawn(session.run());

        let client = Uuid::new_v4();
        let (outbound, mut rx) = mpsc::channel(64);
        assert_ok!(
            handle
                .input_tx
                .send(SessionInput::Connect {
                    client,
                    name: "alice".to_string(),
                    outbound,
                })
                .await
        );
        assert_ok!(
            handle
                .input_tx
                .send(SessionInput::Client {
                    client,
                    msg: ClientMsg::Ping { t: 42 },
                })
                .await
        );

        let reply = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(matches!(reply, Ok(Some(ServerMsg::Pong { t: 42 }))));
        assert!(handle.is_running());

        drop(handle);
        assert_ok!(tokio::time::timeout(Duration::from_secs(2), task).await);
    }
}
