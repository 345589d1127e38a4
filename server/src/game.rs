//! Authoritative game state: teams, bombs, splashes and the match clock.

use crate::score::PaintGrid;
use log::info;
use rand::Rng;
use shared::engine::PhysicsWorld;
use shared::map::MapGeometry;
use shared::{
    BombState, InputPacket, PlayerState, SplashEvent, Team, Vec2, WorldState, BOMB_FUSE,
    BOMB_RADIUS, BOMB_RESTOCK_PER_SEC, GAME_DURATION, MAX_BOMBS, PLAYER_MAX_SPEED, PLAYER_RADIUS,
    SPLASH_RADIUS,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct PlayerEntry {
    team: Team,
    last_packet_id: u32,
    bombs_left: u32,
    placing: bool,
    next_restock: Instant,
}

struct Fuse {
    bomb_id: u32,
    team: Team,
    due: Instant,
}

pub struct Game {
    map: MapGeometry,
    world: PhysicsWorld,
    players: HashMap<u32, PlayerEntry>,
    fuses: Vec<Fuse>,
    splashes: Vec<SplashEvent>,
    paint: PaintGrid,
    started_at: Option<Instant>,
    duration: Duration,
    next_player_id: u32,
    next_bomb_id: u32,
    next_splash_id: u32,
}

impl Game {
    pub fn new(map: MapGeometry) -> Self {
        Self::with_duration(map, GAME_DURATION)
    }

    pub fn with_duration(map: MapGeometry, duration: Duration) -> Self {
        let world = PhysicsWorld::with_walls(map.collision_rects());
        let paint = PaintGrid::new(&map);

        Self {
            map,
            world,
            players: HashMap::new(),
            fuses: Vec::new(),
            splashes: Vec::new(),
            paint,
            started_at: None,
            duration,
            next_player_id: 1,
            next_bomb_id: 1,
            next_splash_id: 1,
        }
    }

    /// Starts the match clock. Idempotent; the clock runs from the first call.
    pub fn start(&mut self, now: Instant) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
            info!("game started, {} seconds on the clock", self.duration.as_secs());
        }
    }

    pub fn finished(&self, now: Instant) -> bool {
        match self.started_at {
            Some(started) => now.duration_since(started) >= self.duration,
            None => false,
        }
    }

    /// Adds a player to the least occupied team and spawns them at that
    /// team's start position. First team in declaration order wins ties.
    pub fn add_player(&mut self, now: Instant) -> (u32, Team) {
        let team = *Team::ALL
            .iter()
            .min_by_key(|team| self.team_size(**team))
            .unwrap();

        let id = self.next_player_id;
        self.next_player_id += 1;

        self.players.insert(
            id,
            PlayerEntry {
                team,
                last_packet_id: 0,
                bombs_left: MAX_BOMBS,
                placing: false,
                next_restock: now + restock_interval(),
            },
        );
        self.world.add_player(PlayerState {
            id,
            team,
            pos: self.map.start_position(team),
            vel: Vec2::ZERO,
            radius: PLAYER_RADIUS,
        });

        info!("player {} joined team {}", id, team.name());
        (id, team)
    }

    /// Unknown ids are tolerated; disconnect races make them routine.
    pub fn remove_player(&mut self, id: u32) {
        if self.players.remove(&id).is_some() {
            self.world.remove_player(id);
            info!("player {} left", id);
        }
    }

    fn team_size(&self, team: Team) -> usize {
        self.players.values().filter(|p| p.team == team).count()
    }

    /// Applies one input packet: records the ack, drives the player's
    /// velocity and edge-detects the bomb action. The newest packet always
    /// wins the ack, even if an older one arrives after it; the client
    /// treats an unknown ack as a no-op.
    pub fn apply_input(&mut self, now: Instant, player_id: u32, packet: &InputPacket) {
        let Some(entry) = self.players.get_mut(&player_id) else {
            return;
        };

        entry.last_packet_id = packet.packet_id;

        self.world.set_player_velocity(
            player_id,
            packet.velocity.clamp_unit().scale(PLAYER_MAX_SPEED),
        );

        // A held button places exactly one bomb until released.
        if packet.actions.place_bomb && !entry.placing {
            entry.placing = true;
            if entry.bombs_left >= 1 {
                entry.bombs_left -= 1;
                let team = entry.team;
                self.place_bomb(now, player_id, team);
            }
        }
        if !packet.actions.place_bomb {
            if let Some(entry) = self.players.get_mut(&player_id) {
                entry.placing = false;
            }
        }
    }

    /// Drops the bomb trailing behind the player, opposite their motion, so
    /// it never blocks the direction they are running in.
    fn place_bomb(&mut self, now: Instant, player_id: u32, team: Team) {
        let Some(player) = self.world.get_player_state(player_id) else {
            return;
        };

        let id = self.next_bomb_id;
        self.next_bomb_id += 1;

        self.world.add_bomb(BombState {
            id,
            team,
            pos: Vec2::new(
                player.pos.x - (player.vel.x / PLAYER_MAX_SPEED) * BOMB_RADIUS,
                player.pos.y - (player.vel.y / PLAYER_MAX_SPEED) * BOMB_RADIUS,
            ),
        });
        self.fuses.push(Fuse {
            bomb_id: id,
            team,
            due: now + BOMB_FUSE,
        });
    }

    /// One simulation tick: restock bombs, step physics, detonate due fuses.
    pub fn tick(&mut self, now: Instant, dt: f32) {
        for entry in self.players.values_mut() {
            while entry.next_restock <= now {
                if entry.bombs_left < MAX_BOMBS {
                    entry.bombs_left += 1;
                }
                entry.next_restock += restock_interval();
            }
        }

        self.world.step(dt);
        self.detonate_due(now);
    }

    fn detonate_due(&mut self, now: Instant) {
        let mut due = Vec::new();
        self.fuses.retain(|fuse| {
            if fuse.due <= now {
                due.push((fuse.bomb_id, fuse.team));
                false
            } else {
                true
            }
        });

        for (bomb_id, team) in due {
            // The owner leaving does not defuse the bomb; the fuse carries
            // the team.
            let Some(bomb) = self.world.get_bomb_state(bomb_id) else {
                continue;
            };
            self.world.remove_bomb(bomb_id);

            let splash = SplashEvent {
                id: self.next_splash_id,
                team,
                pos: Vec2::new(bomb.pos.x.round(), bomb.pos.y.round()),
                rot: rand::thread_rng().gen_range(0..4) as f32 * std::f32::consts::FRAC_PI_2,
            };
            self.next_splash_id += 1;

            self.paint.paint_splash(splash.pos, SPLASH_RADIUS, team);
            self.splashes.push(splash);
        }
    }

    pub fn last_acked(&self, player_id: u32) -> u32 {
        self.players
            .get(&player_id)
            .map(|p| p.last_packet_id)
            .unwrap_or(0)
    }

    pub fn scores(&self) -> HashMap<Team, u32> {
        self.paint.coverage()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Projects the full state clients render and reconcile against.
    pub fn serialize(&self, now: Instant) -> WorldState {
        let remaining = match self.started_at {
            Some(started) => self
                .duration
                .saturating_sub(now.duration_since(started))
                .as_millis() as u32,
            None => self.duration.as_millis() as u32,
        };

        WorldState {
            players: self.world.players(),
            bombs: self.world.bombs(),
            splashes: self.splashes.clone(),
            remaining_time_ms: remaining,
            scores: self.scores(),
        }
    }
}

fn restock_interval() -> Duration {
    Duration::from_secs(1) / BOMB_RESTOCK_PER_SEC
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::InputActions;

    fn input(packet_id: u32, velocity: Vec2, place_bomb: bool) -> InputPacket {
        InputPacket {
            packet_id,
            velocity,
            actions: InputActions { place_bomb },
        }
    }

    fn game() -> Game {
        Game::new(MapGeometry::default_arena())
    }

    #[test]
    fn test_players_balance_across_teams() {
        let mut game = game();
        let now = Instant::now();

        let teams: Vec<Team> = (0..4).map(|_| game.add_player(now).1).collect();
        assert_eq!(teams, vec![Team::Green, Team::Blue, Team::Red, Team::Yellow]);

        // Fifth player wraps to the first team again.
        assert_eq!(game.add_player(now).1, Team::Green);
    }

    #[test]
    fn test_leaving_frees_a_team_slot() {
        let mut game = game();
        let now = Instant::now();

        let (green_id, _) = game.add_player(now);
        game.add_player(now);
        game.add_player(now);
        game.remove_player(green_id);

        assert_eq!(game.add_player(now).1, Team::Green);
    }

    #[test]
    fn test_input_moves_player_and_acks_packet() {
        let mut game = game();
        let now = Instant::now();
        let (id, team) = game.add_player(now);
        let spawn = game.map.start_position(team);

        game.apply_input(now, id, &input(41, Vec2::new(1.0, 0.0), false));
        game.tick(now, 0.25);

        let state = game.world.get_player_state(id).unwrap();
        assert!((state.pos.x - (spawn.x + 32.0)).abs() < 1e-3);
        assert_eq!(game.last_acked(id), 41);
    }

    #[test]
    fn test_ack_overwrites_unconditionally() {
        let mut game = game();
        let now = Instant::now();
        let (id, _) = game.add_player(now);

        game.apply_input(now, id, &input(10, Vec2::ZERO, false));
        game.apply_input(now, id, &input(7, Vec2::ZERO, false));
        assert_eq!(game.last_acked(id), 7);
    }

    #[test]
    fn test_held_button_places_one_bomb() {
        let mut game = game();
        let now = Instant::now();
        let (id, _) = game.add_player(now);

        for packet_id in 0..10 {
            game.apply_input(now, id, &input(packet_id, Vec2::ZERO, true));
        }
        assert_eq!(game.serialize(now).bombs.len(), 1);

        // Release and press again: one more.
        game.apply_input(now, id, &input(10, Vec2::ZERO, false));
        game.apply_input(now, id, &input(11, Vec2::ZERO, true));
        assert_eq!(game.serialize(now).bombs.len(), 2);
    }

    #[test]
    fn test_bomb_budget_and_restock() {
        let mut game = game();
        let now = Instant::now();
        let (id, _) = game.add_player(now);

        // Tap through more presses than the budget allows.
        for packet_id in 0..(MAX_BOMBS * 2) {
            game.apply_input(now, id, &input(packet_id * 2, Vec2::ZERO, true));
            game.apply_input(now, id, &input(packet_id * 2 + 1, Vec2::ZERO, false));
        }
        assert_eq!(game.serialize(now).bombs.len(), MAX_BOMBS as usize);

        // One second later two bombs restocked.
        let later = now + Duration::from_secs(1);
        game.tick(later, 0.016);
        game.apply_input(later, id, &input(100, Vec2::ZERO, true));
        game.apply_input(later, id, &input(101, Vec2::ZERO, false));
        game.apply_input(later, id, &input(102, Vec2::ZERO, true));
        game.apply_input(later, id, &input(103, Vec2::ZERO, false));
        game.apply_input(later, id, &input(104, Vec2::ZERO, true));
        assert_eq!(game.serialize(later).bombs.len(), MAX_BOMBS as usize + 2);
    }

    #[test]
    fn test_bomb_spawns_trailing_moving_player() {
        let mut game = game();
        let now = Instant::now();
        let (id, _) = game.add_player(now);

        // Running right at full speed; the bomb lands one radius behind.
        game.apply_input(now, id, &input(0, Vec2::new(1.0, 0.0), true));
        let player = game.world.get_player_state(id).unwrap();
        let bomb = &game.serialize(now).bombs[0];
        assert!((bomb.pos.x - (player.pos.x - BOMB_RADIUS)).abs() < 1e-3);
        assert!((bomb.pos.y - player.pos.y).abs() < 1e-3);
    }

    #[test]
    fn test_bomb_detonates_once_after_fuse() {
        let mut game = game();
        let now = Instant::now();
        let (id, team) = game.add_player(now);

        game.apply_input(now, id, &input(0, Vec2::ZERO, true));
        assert_eq!(game.serialize(now).bombs.len(), 1);

        // Just before the fuse: still armed.
        let almost = now + BOMB_FUSE - Duration::from_millis(10);
        game.tick(almost, 0.016);
        assert!(game.serialize(almost).splashes.is_empty());

        let after = now + BOMB_FUSE;
        game.tick(after, 0.016);
        let state = game.serialize(after);
        assert!(state.bombs.is_empty());
        assert_eq!(state.splashes.len(), 1);
        assert_eq!(state.splashes[0].team, team);
        assert!(state.scores[&team] > 0);

        // Further ticks add nothing.
        game.tick(after + Duration::from_secs(1), 0.016);
        assert_eq!(game.serialize(after).splashes.len(), 1);
    }

    #[test]
    fn test_splash_outlives_its_owner() {
        let mut game = game();
        let now = Instant::now();
        let (id, team) = game.add_player(now);

        game.apply_input(now, id, &input(0, Vec2::ZERO, true));
        game.remove_player(id);

        let after = now + BOMB_FUSE;
        game.tick(after, 0.016);
        let state = game.serialize(after);
        assert_eq!(state.splashes.len(), 1);
        assert_eq!(state.splashes[0].team, team);
    }

    #[test]
    fn test_splash_rotation_is_a_quarter_turn() {
        let mut game = game();
        let now = Instant::now();
        let (id, _) = game.add_player(now);

        game.apply_input(now, id, &input(0, Vec2::ZERO, true));
        game.tick(now + BOMB_FUSE, 0.016);

        let rot = game.serialize(now).splashes[0].rot;
        let quarter = std::f32::consts::FRAC_PI_2;
        let steps = rot / quarter;
        assert!((steps - steps.round()).abs() < 1e-5);
        assert!((0.0..4.0).contains(&steps));
    }

    #[test]
    fn test_match_clock_runs_down_and_finishes() {
        let mut game = Game::with_duration(MapGeometry::default_arena(), Duration::from_secs(10));
        let now = Instant::now();

        assert!(!game.finished(now));
        game.start(now);
        assert_eq!(game.serialize(now).remaining_time_ms, 10_000);

        let later = now + Duration::from_secs(4);
        assert_eq!(game.serialize(later).remaining_time_ms, 6_000);
        assert!(!game.finished(later));

        let over = now + Duration::from_secs(11);
        assert!(game.finished(over));
        assert_eq!(game.serialize(over).remaining_time_ms, 0);
    }
}
