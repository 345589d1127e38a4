//! Client session: joins a server, pumps input out and snapshots in.

use crate::input::InputSource;
use crate::reconcile::Reconciler;
use log::{debug, info, warn};
use shared::channel::{Channel, Role};
use shared::codec::Codec;
use shared::map::MapGeometry;
use shared::signaling::JoinRequest;
use shared::{Message, NetError, Team, WorldState, STEP_INTERVAL};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::interval;

/// What the presentation layer consumes: freshly predicted or reconciled
/// frames while the game runs, then the final standings.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    Update(WorldState),
    End(HashMap<Team, u32>),
}

pub struct Client {
    player_id: u32,
    channel: Channel,
    reconciler: Reconciler,
}

impl Client {
    /// Joins the server at `server` and establishes the data channel. Fails
    /// with [`NetError::ConnectionTimeout`] when the server stays silent.
    pub async fn join(server: SocketAddr, map: &MapGeometry) -> Result<Self, NetError> {
        let request = JoinRequest::new(server);
        let channel = Channel::open(
            &request,
            Role::Initiator,
            Arc::new(Codec::with_static_schema()),
        )
        .await?;

        let player_id = request
            .player_id()
            .ok_or_else(|| NetError::MalformedMessage("join ack carried no player id".into()))?;
        info!("joined {} as player {}", server, player_id);

        Ok(Self {
            player_id,
            channel,
            reconciler: Reconciler::new(player_id, map),
        })
    }

    pub fn player_id(&self) -> u32 {
        self.player_id
    }

    /// Drives the session until the game ends or the channel dies. Input is
    /// sampled, sent and predicted at the simulation cadence; snapshots are
    /// reconciled as they arrive.
    pub async fn run<I: InputSource>(
        mut self,
        mut input: I,
        events: mpsc::UnboundedSender<GameEvent>,
    ) -> Result<(), NetError> {
        let mut input_interval = interval(STEP_INTERVAL);

        loop {
            tokio::select! {
                msg = self.channel.recv() => match msg {
                    Some(Message::Snapshot(snapshot)) => {
                        if let Some(state) = self.reconciler.apply_snapshot(snapshot).await? {
                            let _ = events.send(GameEvent::Update(state.clone()));
                        }
                    }
                    Some(Message::GameEnd { scores }) => {
                        info!("game over: {:?}", scores);
                        let _ = events.send(GameEvent::End(scores));
                        self.channel.close();
                        return Ok(());
                    }
                    Some(other) => debug!("ignoring unexpected message: {:?}", other),
                    None => {
                        warn!("data channel closed by transport");
                        return Ok(());
                    }
                },

                _ = input_interval.tick() => {
                    let now = Instant::now();
                    let frame = input.sample();
                    let packet = self
                        .reconciler
                        .capture_input(now, frame.velocity, frame.actions);
                    self.channel.send(&packet).await?;

                    if let Some(state) = self.reconciler.step_local(now) {
                        let _ = events.send(GameEvent::Update(state.clone()));
                    }
                }
            }
        }
    }
}
