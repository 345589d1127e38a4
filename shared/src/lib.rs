use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub mod channel;
pub mod codec;
pub mod engine;
pub mod map;
pub mod signaling;

/// Maximum player speed in world units per second (8 tiles * 16 px).
pub const PLAYER_MAX_SPEED: f32 = 128.0;
pub const PLAYER_RADIUS: f32 = 5.0;
pub const BOMB_RADIUS: f32 = 5.0;
pub const SPLASH_RADIUS: f32 = 24.0;
pub const BOMB_FUSE: Duration = Duration::from_secs(4);
pub const MAX_BOMBS: u32 = 6;
pub const BOMB_RESTOCK_PER_SEC: u32 = 2;
pub const GAME_DURATION: Duration = Duration::from_secs(120);

/// Authoritative simulation cadence (60 Hz).
pub const STEP_INTERVAL: Duration = Duration::from_millis(16);
/// Snapshot broadcast cadence (30 Hz), deliberately slower than the step.
pub const BROADCAST_INTERVAL: Duration = Duration::from_millis(33);

/// How much of the predicted position wins over the currently displayed one
/// when a snapshot is reconciled. 0.0 = fully smoothed but positionally
/// stale, 1.0 = fully correct but visibly jumpy.
pub const BLEND_FACTOR: f32 = 0.5;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Error taxonomy for the netcode core. Transport-level loss is absorbed
/// locally and never reaches this type; only failures a caller can act on
/// are represented.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("connection handshake timed out")]
    ConnectionTimeout,
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("message schema unavailable: {0}")]
    SchemaUnavailable(String),
    #[error("physics worker terminated")]
    WorkerGone,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f32 {
        self.x.hypot(self.y)
    }

    /// Clamps the vector into the unit disc. Vectors already inside are
    /// returned unchanged so analog input keeps its magnitude.
    pub fn clamp_unit(&self) -> Vec2 {
        let len = self.length();
        if len <= 1.0 {
            *self
        } else {
            Vec2::new(self.x / len, self.y / len)
        }
    }

    pub fn scale(&self, factor: f32) -> Vec2 {
        Vec2::new(self.x * factor, self.y * factor)
    }

    pub fn lerp(&self, other: Vec2, t: f32) -> Vec2 {
        Vec2::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }
}

/// The four fixed teams. Balancing and scoring iterate `Team::ALL` so the
/// order here is the tie-break order for joins.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Team {
    Green,
    Blue,
    Red,
    Yellow,
}

impl Team {
    pub const ALL: [Team; 4] = [Team::Green, Team::Blue, Team::Red, Team::Yellow];

    pub fn name(&self) -> &'static str {
        match self {
            Team::Green => "green",
            Team::Blue => "blue",
            Team::Red => "red",
            Team::Yellow => "yellow",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerState {
    pub id: u32,
    pub team: Team,
    pub pos: Vec2,
    pub vel: Vec2,
    pub radius: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BombState {
    pub id: u32,
    pub team: Team,
    pub pos: Vec2,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SplashEvent {
    pub id: u32,
    pub team: Team,
    pub pos: Vec2,
    pub rot: f32,
}

/// Read-only projection of the physics world plus the game bookkeeping a
/// client needs to render one frame.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct WorldState {
    pub players: Vec<PlayerState>,
    pub bombs: Vec<BombState>,
    pub splashes: Vec<SplashEvent>,
    pub remaining_time_ms: u32,
    pub scores: HashMap<Team, u32>,
}

impl WorldState {
    pub fn player(&self, id: u32) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct InputActions {
    pub place_bomb: bool,
}

/// One tick of local input. Immutable after creation; the capture time lives
/// in the client's packet log, not on the wire.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InputPacket {
    pub packet_id: u32,
    pub velocity: Vec2,
    pub actions: InputActions,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Snapshot {
    pub last_acked_packet_id: u32,
    pub world: WorldState,
}

/// Wire envelope. The enum discriminant is the message kind.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Message {
    Input(InputPacket),
    Snapshot(Snapshot),
    GameEnd { scores: HashMap<Team, u32> },
}
