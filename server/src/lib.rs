//! Authoritative game server.
//!
//! The server owns the canonical simulation. Clients only ever send inputs;
//! the server steps the world at a fixed cadence, broadcasts snapshots at a
//! slower one, and every snapshot names the last input packet it has folded
//! in so clients can reconcile their predictions against it.

pub mod game;
pub mod network;
pub mod score;
