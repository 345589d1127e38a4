//! Server network layer: join signaling, per-client data channels and the
//! authoritative loop.
//!
//! One public UDP socket accepts join requests. Every accepted client gets
//! its own responder channel on a fresh socket; a forwarder task pumps its
//! decoded messages into the loop's inbox. The loop itself owns the game
//! and runs three cadences: simulation steps, snapshot broadcasts and a
//! liveness sweep.

use crate::game::Game;
use log::{debug, info, warn};
use shared::channel::{Channel, Role};
use shared::codec::Codec;
use shared::map::MapGeometry;
use shared::signaling::{JoinReply, SignalMessage};
use shared::{Message, NetError, Snapshot, BROADCAST_INTERVAL, STEP_INTERVAL};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::interval;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

enum ClientEvent {
    Message(u32, Message),
    Closed(u32),
}

struct JoinOutcome {
    player_id: u32,
    addr: SocketAddr,
    generation: u64,
    result: Result<Channel, NetError>,
}

struct ClientConn {
    channel: Arc<Channel>,
    addr: SocketAddr,
    last_seen: Instant,
}

pub struct Server {
    socket: Arc<UdpSocket>,
    codec: Arc<Codec>,
    map: MapGeometry,
    game: Game,
    game_duration: Duration,
    // Bumped on every game reset so joins admitted to an earlier match can
    // be told apart from ones belonging to the current game.
    generation: u64,
    connections: HashMap<u32, ClientConn>,
    pending_joins: HashSet<SocketAddr>,
}

impl Server {
    pub async fn bind(addr: &str, map: MapGeometry) -> Result<Self, NetError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("server listening on {}", socket.local_addr()?);

        let game = Game::new(map.clone());
        Ok(Server {
            socket,
            codec: Arc::new(Codec::with_static_schema()),
            map,
            game,
            game_duration: shared::GAME_DURATION,
            generation: 0,
            connections: HashMap::new(),
            pending_joins: HashSet::new(),
        })
    }

    /// Overrides the match length for every game this server hosts.
    pub fn with_game_duration(mut self, duration: Duration) -> Self {
        self.game_duration = duration;
        self.game = Game::with_duration(self.map.clone(), duration);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.socket.local_addr()?)
    }

    /// Runs the authoritative loop until the task is dropped.
    pub async fn run(mut self) -> Result<(), NetError> {
        let (joined_tx, mut joined_rx) = mpsc::unbounded_channel::<JoinOutcome>();
        let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel::<ClientEvent>();

        let mut step_interval = interval(STEP_INTERVAL);
        let mut broadcast_interval = interval(BROADCAST_INTERVAL);
        let mut sweep_interval = interval(SWEEP_INTERVAL);
        let mut last_step = Instant::now();

        let mut buf = [0u8; 512];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => self.handle_signaling(&buf[..len], from, &joined_tx),
                    Err(e) => warn!("public socket receive error: {}", e),
                },

                Some(outcome) = joined_rx.recv() => {
                    self.register_join(outcome, &inbox_tx);
                }

                Some(event) = inbox_rx.recv() => match event {
                    ClientEvent::Message(player_id, Message::Input(packet)) => {
                        if let Some(conn) = self.connections.get_mut(&player_id) {
                            conn.last_seen = Instant::now();
                        }
                        self.game.apply_input(Instant::now(), player_id, &packet);
                    }
                    ClientEvent::Message(player_id, other) => {
                        debug!("ignoring unexpected message from {}: {:?}", player_id, other);
                    }
                    ClientEvent::Closed(player_id) => {
                        self.drop_client(player_id);
                    }
                },

                _ = step_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_step).as_secs_f32();
                    last_step = now;

                    self.game.tick(now, dt);
                    if self.game.finished(now) {
                        self.end_game().await;
                    }
                }

                _ = broadcast_interval.tick() => {
                    self.broadcast_snapshots(Instant::now());
                }

                _ = sweep_interval.tick() => {
                    self.sweep_stale(Instant::now());
                }
            }
        }
    }

    fn handle_signaling(
        &mut self,
        datagram: &[u8],
        from: SocketAddr,
        joined_tx: &mpsc::UnboundedSender<JoinOutcome>,
    ) {
        match bincode::deserialize::<SignalMessage>(datagram) {
            Ok(SignalMessage::Join) => {
                // The client retries joins until acked; one open attempt per
                // endpoint at a time is enough.
                if !self.pending_joins.insert(from) {
                    return;
                }

                // A known endpoint joining again replaces its old player.
                let rejoin = self
                    .connections
                    .iter()
                    .find(|(_, conn)| conn.addr == from)
                    .map(|(id, _)| *id);
                if let Some(old_id) = rejoin {
                    info!("re-join from {}, replacing player {}", from, old_id);
                    self.drop_client(old_id);
                }

                let (player_id, team) = self.game.add_player(Instant::now());
                self.game.start(Instant::now());
                debug!("join from {}, allocated player {} on {}", from, player_id, team.name());

                let reply = JoinReply::new(Arc::clone(&self.socket), from, player_id);
                let codec = Arc::clone(&self.codec);
                let joined_tx = joined_tx.clone();
                let generation = self.generation;
                tokio::spawn(async move {
                    let result = Channel::open(&reply, Role::Responder, codec).await;
                    let _ = joined_tx.send(JoinOutcome {
                        player_id,
                        addr: from,
                        generation,
                        result,
                    });
                });
            }
            Ok(other) => debug!("ignoring signaling message from {}: {:?}", from, other),
            Err(_) => debug!("undecodable signaling datagram from {}", from),
        }
    }

    fn register_join(
        &mut self,
        outcome: JoinOutcome,
        inbox_tx: &mpsc::UnboundedSender<ClientEvent>,
    ) {
        self.pending_joins.remove(&outcome.addr);

        // A handshake finishing after its match ended belongs to a game that
        // no longer exists; its player id may already be reused.
        if outcome.generation != self.generation {
            debug!(
                "discarding join from {} finished after its game ended",
                outcome.addr
            );
            if let Ok(channel) = outcome.result {
                channel.close();
            }
            return;
        }

        let mut channel = match outcome.result {
            Ok(channel) => channel,
            Err(e) => {
                warn!("join from {} failed: {}", outcome.addr, e);
                self.game.remove_player(outcome.player_id);
                return;
            }
        };

        let player_id = outcome.player_id;
        let mut incoming = match channel.take_incoming() {
            Some(incoming) => incoming,
            None => {
                self.game.remove_player(player_id);
                return;
            }
        };

        let inbox_tx = inbox_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = incoming.recv().await {
                if inbox_tx.send(ClientEvent::Message(player_id, msg)).is_err() {
                    return;
                }
            }
            let _ = inbox_tx.send(ClientEvent::Closed(player_id));
        });

        info!("player {} connected from {}", player_id, outcome.addr);
        self.connections.insert(
            player_id,
            ClientConn {
                channel: Arc::new(channel),
                addr: outcome.addr,
                last_seen: Instant::now(),
            },
        );
    }

    /// Serializes the world once and fans per-client snapshots out on
    /// spawned tasks so one slow peer cannot stall the loop.
    fn broadcast_snapshots(&self, now: Instant) {
        if self.connections.is_empty() {
            return;
        }

        let world = self.game.serialize(now);
        for (player_id, conn) in &self.connections {
            let snapshot = Message::Snapshot(Snapshot {
                last_acked_packet_id: self.game.last_acked(*player_id),
                world: world.clone(),
            });

            let channel = Arc::clone(&conn.channel);
            tokio::spawn(async move {
                let _ = channel.send(&snapshot).await;
            });
        }
    }

    async fn end_game(&mut self) {
        let scores = self.game.scores();
        info!("game over: {:?}", scores);

        for conn in self.connections.values() {
            let _ = conn
                .channel
                .send(&Message::GameEnd {
                    scores: scores.clone(),
                })
                .await;
            conn.channel.close();
        }
        self.connections.clear();
        self.pending_joins.clear();

        // The next join starts a fresh match.
        self.generation += 1;
        self.game = Game::with_duration(self.map.clone(), self.game_duration);
    }

    fn sweep_stale(&mut self, now: Instant) {
        let stale: Vec<u32> = self
            .connections
            .iter()
            .filter(|(_, conn)| now.duration_since(conn.last_seen) > CLIENT_TIMEOUT)
            .map(|(id, _)| *id)
            .collect();

        for player_id in stale {
            warn!("player {} timed out", player_id);
            self.drop_client(player_id);
        }
    }

    fn drop_client(&mut self, player_id: u32) {
        if let Some(conn) = self.connections.remove(&player_id) {
            conn.channel.close();
        }
        self.game.remove_player(player_id);
    }
}
