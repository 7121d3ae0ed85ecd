//! Session lifecycle.
//!
//! A [`Session`] is a reusable arena slot. Each time the pool opens it for a
//! new connection the slot gets a fresh generation, a bounded queue and a
//! worker task on the pool's runtime that owns all per-connection state. Producers only
//! ever talk to the worker through a [`SessionHandle`]; the handle carries
//! the generation it was issued for so a stale handle can never feed a later
//! connection that reuses the same slot.
//!
//! Closing runs on the worker and is guarded by the slot's lifecycle mutex,
//! so termination, idle timeout and flush requests racing each other close a
//! generation exactly once.

mod clock;
mod half;
mod pool;
mod rtt;
mod worker;

pub use clock::CaptureClock;
pub use half::{ConnectionHalf, Direction, RateDelta};
pub use pool::{PoolStats, SessionPool};
pub use rtt::RttStats;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, Sender};
use tokio::task::JoinHandle;

use crate::cache::SequenceCache;
use crate::flow::FlowIdentity;
use crate::segment::{Segment, Timestamp};

use clock::{from_nanos, to_nanos};
use worker::{Worker, WorkerContext};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,
    #[error("session handle refers to a previous connection")]
    Stale,
    #[error("failed to start session runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Why a session was finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Both directions saw FIN or RST.
    Finish,
    /// No activity within the idle timeout.
    Timeout,
    /// Closed by an explicit flush.
    Flush,
}

impl CloseReason {
    pub fn label(self) -> &'static str {
        match self {
            CloseReason::Finish => "FINISH",
            CloseReason::Timeout => "TIMEOUT FINISH",
            CloseReason::Flush => "FLUSH",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Diagnostics view of an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub key: FlowIdentity,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
}

pub(crate) enum Envelope {
    Segment(Box<Segment>),
    Close(CloseReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Allocated,
    Open,
    Closed,
}

struct Lifecycle {
    phase: Phase,
    generation: u64,
    key: Option<FlowIdentity>,
    first_seen: Option<Timestamp>,
    queue: Option<Sender<Envelope>>,
    worker: Option<JoinHandle<()>>,
}

/// One reusable session slot.
pub struct Session {
    slot: usize,
    lifecycle: Mutex<Lifecycle>,
    last_seen_nanos: AtomicI64,
    cache: SequenceCache,
}

impl Session {
    pub(crate) fn new(slot: usize, cache: SequenceCache) -> Self {
        Self {
            slot,
            lifecycle: Mutex::new(Lifecycle {
                phase: Phase::Allocated,
                generation: 0,
                key: None,
                first_seen: None,
                queue: None,
                worker: None,
            }),
            last_seen_nanos: AtomicI64::new(i64::MIN),
            cache,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn is_open(&self) -> bool {
        self.lifecycle.lock().phase == Phase::Open
    }

    pub fn last_seen(&self) -> Timestamp {
        from_nanos(self.last_seen_nanos.load(Ordering::Acquire))
    }

    pub(crate) fn touch(&self, seen: Timestamp) {
        self.last_seen_nanos
            .fetch_max(to_nanos(seen), Ordering::AcqRel);
    }

    pub(crate) fn cache(&self) -> &SequenceCache {
        &self.cache
    }

    /// Start a new lifecycle under `key` and spawn its worker on `runtime`.
    pub(crate) fn open(
        self: &Arc<Self>,
        key: FlowIdentity,
        now: Timestamp,
        generation: u64,
        ctx: WorkerContext,
        runtime: &Handle,
    ) -> SessionHandle {
        let mut lifecycle = self.lifecycle.lock();
        // The previous worker already released this slot and is exiting.
        lifecycle.worker = None;

        self.cache.reset();
        self.last_seen_nanos.store(to_nanos(now), Ordering::Release);

        let (queue, inbox) = mpsc::channel(ctx.config.queue_capacity);
        let worker = Worker::new(Arc::clone(self), key, now, generation, ctx);
        let handle = runtime.spawn(worker.run(inbox));

        lifecycle.phase = Phase::Open;
        lifecycle.generation = generation;
        lifecycle.key = Some(key);
        lifecycle.first_seen = Some(now);
        lifecycle.queue = Some(queue);
        lifecycle.worker = Some(handle);

        SessionHandle {
            session: Arc::clone(self),
            generation,
            key,
        }
    }

    /// Mark `generation` closed. Only the first caller gets `true`.
    pub(crate) fn begin_close(&self, generation: u64) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.phase != Phase::Open || lifecycle.generation != generation {
            return false;
        }
        lifecycle.phase = Phase::Closed;
        lifecycle.queue = None;
        true
    }

    pub(crate) fn handle(self: &Arc<Self>) -> Option<SessionHandle> {
        let lifecycle = self.lifecycle.lock();
        if lifecycle.phase != Phase::Open {
            return None;
        }
        Some(SessionHandle {
            session: Arc::clone(self),
            generation: lifecycle.generation,
            key: lifecycle.key?,
        })
    }

    pub(crate) fn info(&self) -> Option<SessionInfo> {
        let lifecycle = self.lifecycle.lock();
        if lifecycle.phase != Phase::Open {
            return None;
        }
        Some(SessionInfo {
            key: lifecycle.key?,
            first_seen: lifecycle.first_seen?,
            last_seen: self.last_seen(),
        })
    }

    /// Take the worker of `generation` so the caller can wait for it.
    pub(crate) fn take_worker(&self, generation: u64) -> Option<JoinHandle<()>> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.generation != generation {
            return None;
        }
        lifecycle.worker.take()
    }

    pub(crate) fn request_close(
        &self,
        generation: u64,
        reason: CloseReason,
    ) -> Result<(), SessionError> {
        let queue = self.sender(generation)?;
        queue
            .blocking_send(Envelope::Close(reason))
            .map_err(|_| SessionError::Closed)
    }

    fn sender(&self, generation: u64) -> Result<Sender<Envelope>, SessionError> {
        let lifecycle = self.lifecycle.lock();
        if lifecycle.generation != generation {
            return Err(SessionError::Stale);
        }
        lifecycle.queue.clone().ok_or(SessionError::Closed)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = self.lifecycle.lock();
        f.debug_struct("Session")
            .field("slot", &self.slot)
            .field("phase", &lifecycle.phase)
            .field("generation", &lifecycle.generation)
            .field("key", &lifecycle.key)
            .finish()
    }
}

/// Producer-side handle to one lifecycle of a session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: Arc<Session>,
    generation: u64,
    key: FlowIdentity,
}

impl SessionHandle {
    pub fn key(&self) -> FlowIdentity {
        self.key
    }

    pub fn slot(&self) -> usize {
        self.session.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Queue a segment for the worker, blocking while the queue is full.
    ///
    /// # Panics
    /// Panics when called from inside an asynchronous execution context.
    pub fn enqueue(&self, segment: Segment) -> Result<(), SessionError> {
        let queue = self.session.sender(self.generation)?;
        queue
            .blocking_send(Envelope::Segment(Box::new(segment)))
            .map_err(|_| SessionError::Closed)
    }

    /// Ask the worker to close this lifecycle. Closing twice is harmless.
    pub fn request_close(&self, reason: CloseReason) -> Result<(), SessionError> {
        self.session.request_close(self.generation, reason)
    }
}
