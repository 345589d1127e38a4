//! Territory scoring.
//!
//! Every splash paints a disc of its team's color onto the arena floor;
//! later splashes paint over earlier ones, and walls never take paint. A
//! team's score is the number of floor cells currently carrying its color.

use shared::map::MapGeometry;
use shared::{Team, Vec2};
use std::collections::HashMap;

/// One cell per world unit.
pub struct PaintGrid {
    width: usize,
    height: usize,
    blocked: Vec<bool>,
    paint: Vec<Option<Team>>,
}

impl PaintGrid {
    pub fn new(map: &MapGeometry) -> Self {
        let width = map.width.ceil() as usize;
        let height = map.height.ceil() as usize;

        let mut blocked = vec![false; width * height];
        for rect in map.collision_rects() {
            let x0 = rect.x.max(0.0) as usize;
            let y0 = rect.y.max(0.0) as usize;
            let x1 = ((rect.x + rect.w).ceil() as usize).min(width);
            let y1 = ((rect.y + rect.h).ceil() as usize).min(height);

            for y in y0..y1 {
                for x in x0..x1 {
                    blocked[y * width + x] = true;
                }
            }
        }

        Self {
            width,
            height,
            blocked,
            paint: vec![None; width * height],
        }
    }

    /// Paints a filled disc, overwriting any earlier paint under it.
    pub fn paint_splash(&mut self, pos: Vec2, radius: f32, team: Team) {
        let x0 = ((pos.x - radius).floor().max(0.0)) as usize;
        let y0 = ((pos.y - radius).floor().max(0.0)) as usize;
        let x1 = (((pos.x + radius).ceil() as isize).max(0) as usize).min(self.width);
        let y1 = (((pos.y + radius).ceil() as isize).max(0) as usize).min(self.height);

        let radius_sq = radius * radius;
        for y in y0..y1 {
            for x in x0..x1 {
                let dx = x as f32 + 0.5 - pos.x;
                let dy = y as f32 + 0.5 - pos.y;
                if dx * dx + dy * dy > radius_sq {
                    continue;
                }

                let idx = y * self.width + x;
                if !self.blocked[idx] {
                    self.paint[idx] = Some(team);
                }
            }
        }
    }

    /// Painted cell count per team. Teams with no paint report zero.
    pub fn coverage(&self) -> HashMap<Team, u32> {
        let mut scores: HashMap<Team, u32> = Team::ALL.iter().map(|t| (*t, 0)).collect();
        for cell in self.paint.iter().flatten() {
            *scores.get_mut(cell).unwrap() += 1;
        }
        scores
    }
}
