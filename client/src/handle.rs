//! Asynchronous, serialized access to a physics world.
//!
//! The world lives on its own dedicated thread; callers submit closures
//! through an ordered task queue, so no two operations against the same
//! world ever run concurrently even when issued concurrently. `batch`
//! submits one closure that runs atomically with respect to every other
//! caller, which is what reconciliation needs for its rewind-and-replay.

use log::warn;
use shared::engine::PhysicsWorld;
use shared::map::Rect;
use shared::{BombState, NetError, PlayerState, Vec2, WorldState};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type Task<W> = Box<dyn FnOnce(&mut W) + Send>;

/// Decrements the in-flight count when dropped, so the count clears on the
/// unwind path of a panicking task as well.
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct PhysicsHandle<W = PhysicsWorld> {
    tasks: mpsc::UnboundedSender<Task<W>>,
    in_flight: Arc<AtomicUsize>,
}

impl<W: Send + 'static> PhysicsHandle<W> {
    /// Moves `world` onto a fresh worker thread and returns its handle.
    pub fn spawn(world: W) -> Self {
        let (tasks, mut rx) = mpsc::unbounded_channel::<Task<W>>();
        let in_flight = Arc::new(AtomicUsize::new(0));

        std::thread::spawn(move || {
            let mut world = world;
            while let Some(task) = rx.blocking_recv() {
                // A panicking task is fatal to that task only; later tasks
                // still run against whatever state resulted.
                if catch_unwind(AssertUnwindSafe(|| task(&mut world))).is_err() {
                    warn!("physics task panicked, continuing with current world state");
                }
            }
        });

        Self { tasks, in_flight }
    }

    /// True while any submitted task has not yet finished. A batch stacked
    /// behind other work keeps this true until that batch itself completes.
    pub fn busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Runs `f` against the world as one atomic task and resolves with its
    /// result once the queue reaches it. The task is enqueued immediately,
    /// before the returned future is first polled, so `busy` reflects it
    /// right away.
    pub fn batch<T, F>(&self, f: F) -> impl Future<Output = Result<T, NetError>>
    where
        F: FnOnce(&mut W) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let counter = Arc::clone(&self.in_flight);

        let submitted = self.tasks.send(Box::new(move |world: &mut W| {
            // The count must clear before the result is delivered; a caller
            // that saw its batch resolve must never read a stale busy flag.
            let in_flight = InFlightGuard(counter);
            let result = f(world);
            drop(in_flight);
            let _ = tx.send(result);
        }));
        if submitted.is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        async move {
            if submitted.is_err() {
                return Err(NetError::WorkerGone);
            }
            rx.await.map_err(|_| NetError::WorkerGone)
        }
    }
}

/// Single-operation conveniences; each is a batch of one.
impl PhysicsHandle<PhysicsWorld> {
    pub async fn set_world_state(&self, state: WorldState) -> Result<(), NetError> {
        self.batch(move |w| w.set_world_state(&state)).await
    }

    pub async fn step(&self, dt: f32) -> Result<(), NetError> {
        self.batch(move |w| w.step(dt)).await
    }

    pub async fn set_player_velocity(&self, id: u32, vel: Vec2) -> Result<(), NetError> {
        self.batch(move |w| w.set_player_velocity(id, vel)).await
    }

    pub async fn get_player_state(&self, id: u32) -> Result<Option<PlayerState>, NetError> {
        self.batch(move |w| w.get_player_state(id)).await
    }

    pub async fn add_wall(&self, wall: Rect) -> Result<(), NetError> {
        self.batch(move |w| w.add_wall(wall)).await
    }

    pub async fn add_player(&self, player: PlayerState) -> Result<(), NetError> {
        self.batch(move |w| w.add_player(player)).await
    }

    pub async fn remove_player(&self, id: u32) -> Result<(), NetError> {
        self.batch(move |w| w.remove_player(id)).await
    }

    pub async fn add_bomb(&self, bomb: BombState) -> Result<(), NetError> {
        self.batch(move |w| w.add_bomb(bomb)).await
    }

    pub async fn remove_bomb(&self, id: u32) -> Result<(), NetError> {
        self.batch(move |w| w.remove_bomb(id)).await
    }
}
