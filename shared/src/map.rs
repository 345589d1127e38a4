//! Map geometry provider interface.
//!
//! Map-format parsing lives elsewhere; the simulation only consumes the
//! extracted collision rectangles and per-team start positions. Both peers
//! must agree on the geometry the same way they agree on the wire schema.

use crate::{Team, Vec2};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }
}

#[derive(Debug, Clone)]
pub struct MapGeometry {
    pub width: f32,
    pub height: f32,
    walls: Vec<Rect>,
    start_positions: [(Team, Vec2); 4],
}

impl MapGeometry {
    pub fn new(width: f32, height: f32, walls: Vec<Rect>, start_positions: [(Team, Vec2); 4]) -> Self {
        Self {
            width,
            height,
            walls,
            start_positions,
        }
    }

    /// The built-in arena: a 20x20-tile square (16 px tiles) with border
    /// walls, a center block, and one spawn per corner.
    pub fn default_arena() -> Self {
        let size = 20.0 * 16.0;
        let walls = vec![
            Rect::new(0.0, 0.0, size, 16.0),
            Rect::new(0.0, size - 16.0, size, 16.0),
            Rect::new(0.0, 16.0, 16.0, size - 32.0),
            Rect::new(size - 16.0, 16.0, 16.0, size - 32.0),
            Rect::new(size / 2.0 - 16.0, size / 2.0 - 16.0, 32.0, 32.0),
        ];

        let margin = 40.0;
        let start_positions = [
            (Team::Green, Vec2::new(margin, margin)),
            (Team::Blue, Vec2::new(size - margin, margin)),
            (Team::Red, Vec2::new(margin, size - margin)),
            (Team::Yellow, Vec2::new(size - margin, size - margin)),
        ];

        Self::new(size, size, walls, start_positions)
    }

    pub fn collision_rects(&self) -> &[Rect] {
        &self.walls
    }

    pub fn start_position(&self, team: Team) -> Vec2 {
        self.start_positions
            .iter()
            .find(|(t, _)| *t == team)
            .map(|(_, pos)| *pos)
            .unwrap_or(Vec2::new(self.width / 2.0, self.height / 2.0))
    }
}
