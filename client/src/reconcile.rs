//! Client-side prediction and server reconciliation.
//!
//! The client runs two worlds. The display world is stepped every frame with
//! the player's live input so local movement never waits on the network. The
//! worker world, behind [`PhysicsHandle`], is used when a snapshot arrives:
//! it rewinds to the server's state, replays the inputs the server has not
//! seen yet, and the resulting predicted position is blended into the display
//! world instead of snapping to it.

use crate::handle::PhysicsHandle;
use crate::packet_log::{LoggedInput, PacketLog};
use log::debug;
use shared::engine::PhysicsWorld;
use shared::map::MapGeometry;
use shared::{
    InputActions, InputPacket, Message, NetError, Snapshot, Vec2, WorldState, BLEND_FACTOR,
    PLAYER_MAX_SPEED,
};
use std::time::Instant;

pub struct Reconciler {
    player_id: u32,
    handle: PhysicsHandle,
    log: PacketLog,
    display: PhysicsWorld,
    state: Option<WorldState>,
    latest_velocity: Vec2,
    next_packet_id: u32,
    world_time: Instant,
    blend_factor: f32,
}

impl Reconciler {
    pub fn new(player_id: u32, map: &MapGeometry) -> Self {
        Self {
            player_id,
            handle: PhysicsHandle::spawn(PhysicsWorld::with_walls(map.collision_rects())),
            log: PacketLog::new(),
            display: PhysicsWorld::with_walls(map.collision_rects()),
            state: None,
            latest_velocity: Vec2::ZERO,
            next_packet_id: 0,
            world_time: Instant::now(),
            blend_factor: BLEND_FACTOR,
        }
    }

    /// Turns one sampled input into a wire message, logging it for replay.
    pub fn capture_input(&mut self, now: Instant, velocity: Vec2, actions: InputActions) -> Message {
        let packet = InputPacket {
            packet_id: self.next_packet_id,
            velocity: velocity.clamp_unit(),
            actions,
        };
        self.next_packet_id += 1;
        self.latest_velocity = packet.velocity;

        self.log.append(LoggedInput {
            captured_at: now,
            packet: packet.clone(),
        });

        Message::Input(packet)
    }

    /// Advances the display world to `now` under the latest input and
    /// returns the state to present, or `None` before the first snapshot.
    pub fn step_local(&mut self, now: Instant) -> Option<&WorldState> {
        let dt = now.duration_since(self.world_time).as_secs_f32();
        self.world_time = now;

        self.state.as_ref()?;

        self.display
            .set_player_velocity(self.player_id, self.latest_velocity.scale(PLAYER_MAX_SPEED));
        self.display.step(dt);

        self.copy_display_into_state();
        self.state.as_ref()
    }

    /// Reconciles one server snapshot into the display world.
    ///
    /// Acked inputs are pruned first, keeping the acknowledged entry as the
    /// replay time anchor. If the physics worker is still chewing on an
    /// earlier snapshot the whole snapshot is dropped: snapshots arrive
    /// faster than a slow worker can process them, and replaying data that
    /// keeps getting older is worse than skipping ahead.
    pub async fn apply_snapshot(&mut self, snapshot: Snapshot) -> Result<Option<&WorldState>, NetError> {
        self.log.prune_up_to(snapshot.last_acked_packet_id);

        if self.handle.busy() {
            debug!("physics worker busy, dropping snapshot");
            return Ok(None);
        }

        let player_id = self.player_id;
        let remote = snapshot.world.clone();
        let replay: Vec<LoggedInput> = self.log.entries().cloned().collect();

        let predicted = self
            .handle
            .batch(move |world| {
                world.set_world_state(&remote);

                // The acknowledged input is already baked into the snapshot;
                // it only anchors the replay clock for the inputs after it.
                if let Some((anchor, rest)) = replay.split_first() {
                    let mut rewind_timer = anchor.captured_at;

                    for entry in rest {
                        world.step(
                            entry
                                .captured_at
                                .duration_since(rewind_timer)
                                .as_secs_f32(),
                        );
                        world.set_player_velocity(
                            player_id,
                            entry.packet.velocity.scale(PLAYER_MAX_SPEED),
                        );
                        rewind_timer = entry.captured_at;
                    }
                }

                world.get_player_state(player_id)
            })
            .await?;

        let previously_shown = self
            .state
            .as_ref()
            .and_then(|s| s.player(self.player_id))
            .cloned();

        self.display.set_world_state(&snapshot.world);

        // Blend what was on screen with where the server should be by now.
        // Snapping straight to the prediction makes every correction visible.
        if let (Some(shown), Some(predicted)) = (previously_shown, predicted) {
            let mut local = predicted;
            local.pos = shown.pos.lerp(local.pos, self.blend_factor);
            local.vel = self.latest_velocity.scale(PLAYER_MAX_SPEED);
            self.display.replace_player(local);
        }

        self.state = Some(snapshot.world);
        self.copy_display_into_state();
        Ok(self.state.as_ref())
    }

    /// Latest presentable state, if any snapshot has arrived yet.
    pub fn state(&self) -> Option<&WorldState> {
        self.state.as_ref()
    }

    pub fn player_id(&self) -> u32 {
        self.player_id
    }

    fn copy_display_into_state(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.players = self.display.players();
            state.bombs = self.display.bombs();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{PlayerState, Snapshot, Team, PLAYER_RADIUS};
    use std::collections::HashMap;
    use std::time::Duration;

    const LOCAL_ID: u32 = 1;

    fn open_map() -> MapGeometry {
        MapGeometry::new(1000.0, 1000.0, vec![], [
            (Team::Green, Vec2::ZERO),
            (Team::Blue, Vec2::ZERO),
            (Team::Red, Vec2::ZERO),
            (Team::Yellow, Vec2::ZERO),
        ])
    }

    fn world_with_local_player(pos: Vec2, vel: Vec2) -> WorldState {
        WorldState {
            players: vec![PlayerState {
                id: LOCAL_ID,
                team: Team::Green,
                pos,
                vel,
                radius: PLAYER_RADIUS,
            }],
            bombs: vec![],
            splashes: vec![],
            remaining_time_ms: 60_000,
            scores: HashMap::new(),
        }
    }

    fn logged(reconciler: &mut Reconciler, at: Instant, velocity: Vec2) -> u32 {
        let msg = reconciler.capture_input(at, velocity, InputActions::default());
        match msg {
            Message::Input(packet) => packet.packet_id,
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_capture_input_clamps_and_numbers_packets() {
        let mut reconciler = Reconciler::new(LOCAL_ID, &open_map());
        let now = Instant::now();

        let first = reconciler.capture_input(now, Vec2::new(3.0, 4.0), InputActions::default());
        let second = reconciler.capture_input(now, Vec2::new(0.5, 0.0), InputActions::default());

        match (first, second) {
            (Message::Input(a), Message::Input(b)) => {
                assert_eq!(a.packet_id, 0);
                assert_eq!(b.packet_id, 1);
                assert_approx_eq!(a.velocity.length(), 1.0, 1e-6);
                assert_approx_eq!(b.velocity.x, 0.5, 1e-6);
            }
            other => panic!("unexpected messages {:?}", other),
        }
        assert_eq!(reconciler.log.len(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_replay_predicts_unacked_movement() {
        let mut reconciler = Reconciler::new(LOCAL_ID, &open_map());
        let t0 = Instant::now();

        // Acked anchor, then 125 ms of full-speed rightward input the
        // server has not seen.
        let anchor = logged(&mut reconciler, t0, Vec2::new(1.0, 0.0));
        logged(
            &mut reconciler,
            t0 + Duration::from_millis(125),
            Vec2::ZERO,
        );

        // The server carries the acked input's velocity in its snapshot.
        let server_view = world_with_local_player(Vec2::ZERO, Vec2::new(PLAYER_MAX_SPEED, 0.0));

        let state = reconciler
            .apply_snapshot(Snapshot {
                last_acked_packet_id: anchor,
                world: server_view.clone(),
            })
            .await
            .unwrap()
            .expect("snapshot applied");

        // Prediction says 16 units right; first snapshot has nothing shown
        // yet to blend against, so the displayed player is pure snapshot.
        let shown = state.player(LOCAL_ID).unwrap();
        assert_approx_eq!(shown.pos.x, 0.0, 1e-4);

        // The second snapshot blends shown (0) with predicted (16) 50/50.
        let state = reconciler
            .apply_snapshot(Snapshot {
                last_acked_packet_id: anchor,
                world: server_view,
            })
            .await
            .unwrap()
            .expect("snapshot applied");
        let shown = state.player(LOCAL_ID).unwrap();
        assert_approx_eq!(shown.pos.x, 8.0, 1e-3);
        assert_approx_eq!(shown.pos.y, 0.0, 1e-3);
    }

    #[tokio::test]
    async fn test_busy_worker_drops_snapshot_but_prunes_log() {
        let mut reconciler = Reconciler::new(LOCAL_ID, &open_map());
        let t0 = Instant::now();

        for i in 0..3 {
            logged(
                &mut reconciler,
                t0 + Duration::from_millis(16 * i),
                Vec2::new(1.0, 0.0),
            );
        }

        // Jam the worker so the next snapshot hits backpressure.
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let jam = reconciler.handle.batch(move |_| {
            release_rx.recv().unwrap();
        });

        let applied = reconciler
            .apply_snapshot(Snapshot {
                last_acked_packet_id: 1,
                world: world_with_local_player(Vec2::new(50.0, 50.0), Vec2::ZERO),
            })
            .await
            .unwrap();

        assert!(applied.is_none());
        assert!(reconciler.state().is_none());
        // The ack is still honored: entries 1 and 2 remain, 0 is gone.
        assert_eq!(reconciler.log.len(), 2);

        release_tx.send(()).unwrap();
        jam.await.unwrap();
    }

    #[tokio::test]
    async fn test_step_local_moves_player_under_held_input() {
        let mut reconciler = Reconciler::new(LOCAL_ID, &open_map());
        let t0 = Instant::now();

        logged(&mut reconciler, t0, Vec2::new(0.0, 1.0));
        reconciler
            .apply_snapshot(Snapshot {
                last_acked_packet_id: 0,
                world: world_with_local_player(Vec2::ZERO, Vec2::ZERO),
            })
            .await
            .unwrap();

        reconciler.world_time = t0;
        let state = reconciler
            .step_local(t0 + Duration::from_millis(250))
            .expect("state after snapshot");

        let shown = state.player(LOCAL_ID).unwrap();
        assert_approx_eq!(shown.pos.y, 32.0, 1e-3);
    }

    #[tokio::test]
    async fn test_step_local_before_first_snapshot_is_none() {
        let mut reconciler = Reconciler::new(LOCAL_ID, &open_map());
        assert!(reconciler.step_local(Instant::now()).is_none());
    }
}
