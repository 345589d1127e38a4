//! Input sampling.
//!
//! The netcode polls an [`InputSource`] at the send cadence; where the
//! samples come from (keyboard, gamepad, a bot) is not its business.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{InputActions, Vec2};

/// One polled input frame: a direction inside the unit disc plus the
/// actions held during this frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputFrame {
    pub velocity: Vec2,
    pub actions: InputActions,
}

pub trait InputSource {
    fn sample(&mut self) -> InputFrame;
}

/// A bot that wanders the arena, holding each direction for a while and
/// occasionally dropping a bomb. Useful for load tests and demos.
pub struct WanderInput {
    rng: StdRng,
    current: Vec2,
    frames_left: u32,
}

impl WanderInput {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            current: Vec2::ZERO,
            frames_left: 0,
        }
    }
}

impl Default for WanderInput {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSource for WanderInput {
    fn sample(&mut self) -> InputFrame {
        if self.frames_left == 0 {
            let angle: f32 = self.rng.gen_range(0.0..std::f32::consts::TAU);
            self.current = Vec2::new(angle.cos(), angle.sin());
            // Hold the direction for 0.5 to 2 seconds at 60 Hz.
            self.frames_left = self.rng.gen_range(30..120);
        }
        self.frames_left -= 1;

        InputFrame {
            velocity: self.current,
            actions: InputActions {
                place_bomb: self.rng.gen_bool(0.01),
            },
        }
    }
}
