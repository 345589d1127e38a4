//! The stepping black box: a minimal kinematic world for players, bombs and
//! static walls.
//!
//! Both sides run the same integration so client replays match the server.
//! Bodies live in id-ordered maps, so stepping and state projection are
//! fully deterministic for a given sequence of operations.

use crate::map::Rect;
use crate::{BombState, PlayerState, Vec2, WorldState};
use std::collections::BTreeMap;

pub struct PhysicsWorld {
    walls: Vec<Rect>,
    players: BTreeMap<u32, PlayerState>,
    bombs: BTreeMap<u32, BombState>,
}

impl PhysicsWorld {
    pub fn new() -> Self {
        Self {
            walls: Vec::new(),
            players: BTreeMap::new(),
            bombs: BTreeMap::new(),
        }
    }

    pub fn with_walls(walls: &[Rect]) -> Self {
        let mut world = Self::new();
        for wall in walls {
            world.add_wall(*wall);
        }
        world
    }

    pub fn add_wall(&mut self, wall: Rect) {
        self.walls.push(wall);
    }

    pub fn add_player(&mut self, player: PlayerState) {
        self.players.insert(player.id, player);
    }

    /// Missing ids are benign no-ops throughout; a snapshot can remove a
    /// body out from under any caller.
    pub fn remove_player(&mut self, id: u32) {
        self.players.remove(&id);
    }

    pub fn replace_player(&mut self, player: PlayerState) {
        self.players.insert(player.id, player);
    }

    pub fn set_player_velocity(&mut self, id: u32, vel: Vec2) {
        if let Some(player) = self.players.get_mut(&id) {
            player.vel = vel;
        }
    }

    pub fn get_player_state(&self, id: u32) -> Option<PlayerState> {
        self.players.get(&id).cloned()
    }

    pub fn add_bomb(&mut self, bomb: BombState) {
        self.bombs.insert(bomb.id, bomb);
    }

    pub fn remove_bomb(&mut self, id: u32) {
        self.bombs.remove(&id);
    }

    pub fn get_bomb_state(&self, id: u32) -> Option<BombState> {
        self.bombs.get(&id).cloned()
    }

    /// Advances every player by `dt` seconds and resolves wall and
    /// player-player overlap. Bombs are static once placed.
    pub fn step(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }

        for player in self.players.values_mut() {
            player.pos.x += player.vel.x * dt;
            player.pos.y += player.vel.y * dt;

            for wall in &self.walls {
                push_circle_out_of_rect(&mut player.pos, player.radius, wall);
            }
        }

        self.separate_players();
    }

    fn separate_players(&mut self) {
        let ids: Vec<u32> = self.players.keys().cloned().collect();

        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let (mut a, mut b) = match (
                    self.players.get(&ids[i]).cloned(),
                    self.players.get(&ids[j]).cloned(),
                ) {
                    (Some(a), Some(b)) => (a, b),
                    _ => continue,
                };

                let dx = b.pos.x - a.pos.x;
                let dy = b.pos.y - a.pos.y;
                let distance = (dx * dx + dy * dy).sqrt();
                let min_distance = a.radius + b.radius;

                if distance >= min_distance {
                    continue;
                }

                if distance < 0.001 {
                    // Coincident centers get an arbitrary but deterministic split.
                    a.pos.x -= a.radius;
                    b.pos.x += b.radius;
                } else {
                    let nx = dx / distance;
                    let ny = dy / distance;
                    let separation = (min_distance - distance) / 2.0;

                    a.pos.x -= nx * separation;
                    a.pos.y -= ny * separation;
                    b.pos.x += nx * separation;
                    b.pos.y += ny * separation;
                }

                self.players.insert(a.id, a);
                self.players.insert(b.id, b);
            }
        }
    }

    /// Replaces every player and bomb with the given state. Walls persist;
    /// they belong to the map, not to any snapshot.
    pub fn set_world_state(&mut self, state: &WorldState) {
        self.players.clear();
        self.bombs.clear();

        for player in &state.players {
            self.players.insert(player.id, player.clone());
        }
        for bomb in &state.bombs {
            self.bombs.insert(bomb.id, bomb.clone());
        }
    }

    pub fn players(&self) -> Vec<PlayerState> {
        self.players.values().cloned().collect()
    }

    pub fn bombs(&self) -> Vec<BombState> {
        self.bombs.values().cloned().collect()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}

fn push_circle_out_of_rect(pos: &mut Vec2, radius: f32, rect: &Rect) {
    let closest_x = pos.x.clamp(rect.x, rect.x + rect.w);
    let closest_y = pos.y.clamp(rect.y, rect.y + rect.h);

    let dx = pos.x - closest_x;
    let dy = pos.y - closest_y;
    let dist_sq = dx * dx + dy * dy;

    if dist_sq >= radius * radius {
        return;
    }

    if dist_sq > 1e-9 {
        // Center outside the rect: push along the contact normal.
        let dist = dist_sq.sqrt();
        pos.x = closest_x + dx / dist * radius;
        pos.y = closest_y + dy / dist * radius;
        return;
    }

    // Center inside the rect: exit through the nearest face.
    let left = pos.x - rect.x;
    let right = rect.x + rect.w - pos.x;
    let top = pos.y - rect.y;
    let bottom = rect.y + rect.h - pos.y;

    let min = left.min(right).min(top).min(bottom);
    if min == left {
        pos.x = rect.x - radius;
    } else if min == right {
        pos.x = rect.x + rect.w + radius;
    } else if min == top {
        pos.y = rect.y - radius;
    } else {
        pos.y = rect.y + rect.h + radius;
    }
}
