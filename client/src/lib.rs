//! Game client: prediction, reconciliation and the session loop.
//!
//! The flow is intentionally small. [`network::Client`] owns the data
//! channel and an input/step cadence; every tick it samples an
//! [`input::InputSource`], sends the packet, and advances the locally
//! predicted world. Incoming snapshots go through [`reconcile::Reconciler`],
//! which rewinds the worker-side physics world to the server's state,
//! replays unacknowledged inputs and blends the result into what is shown.
//! Rendering is out of scope; consumers drain [`network::GameEvent`]s.

pub mod handle;
pub mod input;
pub mod network;
pub mod packet_log;
pub mod reconcile;
