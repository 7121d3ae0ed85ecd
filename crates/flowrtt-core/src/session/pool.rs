use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info, trace};
use parking_lot::RwLock;
use tokio::runtime::{Builder, Runtime};

use super::clock::CaptureClock;
use super::worker::WorkerContext;
use super::{CloseReason, Session, SessionError, SessionHandle, SessionInfo};
use crate::cache::SequenceCache;
use crate::classify::Classifier;
use crate::config::TrackerConfig;
use crate::flow::FlowIdentity;
use crate::segment::Timestamp;
use crate::telemetry::{InterfaceStats, TelemetrySink};

const STATS_EVERY: u64 = 0x8000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub slots: usize,
    pub free: usize,
    pub active: usize,
    /// Sessions opened since the pool was created.
    pub allocations: u64,
}

struct Arena {
    active: HashMap<FlowIdentity, usize>,
    slots: Vec<Arc<Session>>,
    /// Generation currently open in each slot.
    in_use: Vec<Option<u64>>,
    free: Vec<usize>,
    generation: u64,
}

impl Arena {
    fn lookup(&self, key: &FlowIdentity) -> Option<usize> {
        self.active
            .get(key)
            .or_else(|| self.active.get(&key.reverse()))
            .copied()
    }

    fn grow(&mut self, config: &TrackerConfig) {
        let before = self.slots.len();
        let added = if before == 0 {
            config.initial_pool_capacity
        } else {
            before
        };
        for slot in before..before + added {
            self.slots.push(Arc::new(Session::new(
                slot,
                SequenceCache::new(config.rtt_max_age()),
            )));
            self.in_use.push(None);
        }
        self.free.extend((before..before + added).rev());
        info!("session pool grew from {} to {} slots", before, self.slots.len());
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            slots: self.slots.len(),
            free: self.free.len(),
            active: self.active.len(),
            allocations: self.generation,
        }
    }
}

pub(crate) struct PoolShared {
    arena: RwLock<Arena>,
    config: Arc<TrackerConfig>,
    classifier: Arc<Classifier>,
    telemetry: Arc<dyn TelemetrySink>,
    stats: Arc<InterfaceStats>,
    clock: Arc<CaptureClock>,
}

impl PoolShared {
    /// Return a closed session's slot. Only the first release of a given
    /// generation has any effect.
    pub(crate) fn release(&self, slot: usize, key: FlowIdentity, generation: u64) {
        let mut arena = self.arena.write();
        if arena.in_use.get(slot).copied().flatten() != Some(generation) {
            debug!("ignoring release of slot {} generation {}", slot, generation);
            return;
        }
        for k in [key, key.reverse()] {
            if arena.active.get(&k) == Some(&slot) {
                arena.active.remove(&k);
            }
        }
        arena.in_use[slot] = None;
        arena.free.push(slot);
    }
}

/// Maps flow identities to live sessions and recycles closed ones.
///
/// Session workers are tasks on a runtime owned by the pool. Cloning is
/// cheap; clones share the same arena and runtime.
#[derive(Clone)]
pub struct SessionPool {
    shared: Arc<PoolShared>,
    runtime: Arc<Runtime>,
}

impl SessionPool {
    pub fn new(
        config: TrackerConfig,
        classifier: Arc<Classifier>,
        telemetry: Arc<dyn TelemetrySink>,
        stats: Arc<InterfaceStats>,
    ) -> Result<Self, SessionError> {
        let mut builder = Builder::new_multi_thread();
        builder.thread_name("flowrtt-session").enable_time();
        if config.worker_threads > 0 {
            builder.worker_threads(config.worker_threads);
        }
        let runtime = builder.build()?;

        Ok(Self {
            runtime: Arc::new(runtime),
            shared: Arc::new(PoolShared {
                arena: RwLock::new(Arena {
                    active: HashMap::new(),
                    slots: Vec::new(),
                    in_use: Vec::new(),
                    free: Vec::new(),
                    generation: 0,
                }),
                config: Arc::new(config),
                classifier,
                telemetry,
                stats,
                clock: Arc::new(CaptureClock::new()),
            }),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.shared.config
    }

    pub fn clock(&self) -> &CaptureClock {
        &self.shared.clock
    }

    /// Find the session for `key` (in either direction) or open one.
    ///
    /// A new session is only opened for an initial SYN that is not also a
    /// termination; every other miss returns `None`.
    pub fn resolve(
        &self,
        key: FlowIdentity,
        is_initial_syn: bool,
        is_termination: bool,
        now: Timestamp,
    ) -> Option<SessionHandle> {
        self.shared.clock.observe(now);

        {
            let arena = self.shared.arena.read();
            if let Some(slot) = arena.lookup(&key) {
                return open_handle(&arena.slots[slot], &key);
            }
        }

        if !is_initial_syn || is_termination {
            trace!("no session for {}, dropped", key);
            return None;
        }

        let mut arena = self.shared.arena.write();
        if let Some(slot) = arena.lookup(&key) {
            return open_handle(&arena.slots[slot], &key);
        }

        if arena.free.is_empty() {
            arena.grow(&self.shared.config);
        }
        let slot = arena.free.pop()?;
        arena.generation += 1;
        let generation = arena.generation;
        if generation % STATS_EVERY == 0 {
            let stats = arena.stats();
            info!(
                "session pool: {} allocations, {} slots, {} free, {} active",
                generation, stats.slots, stats.free, stats.active
            );
        }

        let session = Arc::clone(&arena.slots[slot]);
        let handle = session.open(
            key,
            now,
            generation,
            self.worker_context(),
            self.runtime.handle(),
        );
        arena.active.insert(key, slot);
        arena.in_use[slot] = Some(generation);
        Some(handle)
    }

    /// Close every session whose last activity precedes `cutoff` and wait
    /// for their workers. Returns the number of workers joined.
    pub fn flush_older_than(&self, cutoff: Timestamp) -> usize {
        self.flush_where(|session| session.last_seen() < cutoff)
    }

    /// Close every open session and wait for their workers.
    pub fn flush_all(&self) -> usize {
        self.flush_where(|_| true)
    }

    /// Sessions already closing but not yet released are joined too, so
    /// their summaries are delivered before this returns.
    ///
    /// Blocks the calling thread; must not be called from async code.
    fn flush_where(&self, selected: impl Fn(&Session) -> bool) -> usize {
        let targets: Vec<(Arc<Session>, u64)> = {
            let arena = self.shared.arena.read();
            arena
                .active
                .values()
                .filter_map(|&slot| {
                    let generation = arena.in_use[slot]?;
                    let session = &arena.slots[slot];
                    selected(session).then(|| (Arc::clone(session), generation))
                })
                .collect()
        };

        let mut workers = Vec::with_capacity(targets.len());
        for (session, generation) in &targets {
            if let Err(err) = session.request_close(*generation, CloseReason::Flush) {
                debug!("flush of slot {} skipped: {}", session.slot(), err);
            }
            if let Some(worker) = session.take_worker(*generation) {
                workers.push(worker);
            }
        }

        let closed = workers.len();
        self.runtime.block_on(async move {
            for worker in workers {
                if let Err(err) = worker.await {
                    error!("session worker failed during flush: {}", err);
                }
            }
        });
        closed
    }

    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        let arena = self.shared.arena.read();
        arena
            .active
            .values()
            .filter_map(|&slot| arena.slots[slot].info())
            .collect()
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.arena.read().stats()
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            pool: Arc::downgrade(&self.shared),
            config: Arc::clone(&self.shared.config),
            classifier: Arc::clone(&self.shared.classifier),
            telemetry: Arc::clone(&self.shared.telemetry),
            stats: Arc::clone(&self.shared.stats),
            clock: Arc::clone(&self.shared.clock),
        }
    }
}

/// A slot still mapped to `key` may already be closing; its segments are
/// dropped until the worker releases it.
fn open_handle(session: &Arc<Session>, key: &FlowIdentity) -> Option<SessionHandle> {
    let handle = session.handle();
    if handle.is_none() {
        debug!("session for {} is closing, segment dropped", key);
    }
    handle
}

#[cfg(test)]
mod tests {
    use super::SessionPool;
    use crate::classify::Classifier;
    use crate::config::TrackerConfig;
    use crate::flow::FlowIdentity;
    use crate::segment::{Segment, TcpFlags};
    use crate::seq::Sequence;
    use crate::session::CloseReason;
    use crate::telemetry::{CollectingSink, InterfaceStats};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::{Arc, Barrier};
    use std::time::{Duration, Instant};
    use time::OffsetDateTime;

    fn pool(sink: Arc<CollectingSink>) -> SessionPool {
        let config = TrackerConfig {
            initial_pool_capacity: 2,
            ..TrackerConfig::default()
        };
        SessionPool::new(
            config,
            Arc::new(Classifier::new()),
            sink,
            Arc::new(InterfaceStats::new()),
        )
        .unwrap()
    }

    fn flow(port: u16) -> FlowIdentity {
        FlowIdentity::from_endpoints(
            "10.0.0.1".parse().unwrap(),
            port,
            "10.0.0.2".parse().unwrap(),
            80,
        )
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn lookup_is_reverse_insensitive() {
        let pool = pool(Arc::new(CollectingSink::new()));
        let now = OffsetDateTime::UNIX_EPOCH;
        let created = pool.resolve(flow(1000), true, false, now).unwrap();
        let reverse = pool.resolve(flow(1000).reverse(), false, false, now).unwrap();
        assert_eq!(created.slot(), reverse.slot());
        assert_eq!(created.generation(), reverse.generation());
        assert_eq!(reverse.key(), flow(1000));
        assert_eq!(pool.stats().active, 1);
    }

    #[test]
    fn non_syn_miss_creates_nothing() {
        let pool = pool(Arc::new(CollectingSink::new()));
        let now = OffsetDateTime::UNIX_EPOCH;
        assert!(pool.resolve(flow(1000), false, false, now).is_none());
        assert!(pool.resolve(flow(1000), true, true, now).is_none());
        assert_eq!(pool.stats().slots, 0);
    }

    #[test]
    fn arena_doubles_when_exhausted() {
        let pool = pool(Arc::new(CollectingSink::new()));
        let now = OffsetDateTime::UNIX_EPOCH;
        for port in 0..3 {
            pool.resolve(flow(port), true, false, now).unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.slots, 4);
        assert_eq!(stats.active, 3);
        assert_eq!(stats.free, 1);
    }

    #[test]
    fn double_close_releases_once() {
        let sink = Arc::new(CollectingSink::new());
        let pool = pool(sink.clone());
        let now = OffsetDateTime::UNIX_EPOCH;
        let handle = pool.resolve(flow(1000), true, false, now).unwrap();

        let _ = handle.request_close(CloseReason::Flush);
        let _ = handle.request_close(CloseReason::Timeout);
        assert!(wait_for(|| pool.stats().active == 0));
        assert!(wait_for(|| sink.sessions().len() == 1));

        let stats = pool.stats();
        assert_eq!(stats.free, stats.slots);
        assert_eq!(sink.sessions()[0].close_reason, CloseReason::Flush);
        let segment = Segment {
            flow: flow(1000),
            flags: TcpFlags::default(),
            seq: Sequence::new(0),
            ack: Sequence::new(0),
            payload: Vec::new(),
            seen: now,
        };
        assert!(handle.enqueue(segment).is_err());
    }

    #[test]
    fn released_slot_is_reused_with_new_generation() {
        let pool = pool(Arc::new(CollectingSink::new()));
        let now = OffsetDateTime::UNIX_EPOCH;
        let first = pool.resolve(flow(1000), true, false, now).unwrap();
        assert_eq!(pool.flush_older_than(now + time::Duration::seconds(1)), 1);

        let second = pool.resolve(flow(2000), true, false, now).unwrap();
        assert_eq!(second.slot(), first.slot());
        assert!(second.generation() > first.generation());
        assert!(first.request_close(CloseReason::Flush).is_err());
        assert!(pool.resolve(flow(1000), false, false, now).is_none());
    }

    #[test]
    fn lookups_do_not_count_as_allocations() {
        let pool = pool(Arc::new(CollectingSink::new()));
        let now = OffsetDateTime::UNIX_EPOCH;
        pool.resolve(flow(1000), true, false, now).unwrap();
        for _ in 0..5 {
            pool.resolve(flow(1000).reverse(), false, false, now).unwrap();
        }
        assert!(pool.resolve(flow(2000), false, false, now).is_none());
        assert_eq!(pool.stats().allocations, 1);

        pool.resolve(flow(3000), true, false, now).unwrap();
        assert_eq!(pool.stats().allocations, 2);
        pool.flush_all();
    }

    #[test]
    fn racing_syns_from_both_ends_share_one_session() {
        const THREADS: usize = 8;
        const ROUNDS: u16 = 50;
        let pool = pool(Arc::new(CollectingSink::new()));
        let now = OffsetDateTime::UNIX_EPOCH;

        for round in 0..ROUNDS {
            let key = flow(10_000 + round);
            let barrier = Arc::new(Barrier::new(THREADS));
            let workers: Vec<_> = (0..THREADS)
                .map(|i| {
                    let pool = pool.clone();
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        let key = if i % 2 == 0 { key } else { key.reverse() };
                        barrier.wait();
                        let handle = pool.resolve(key, true, false, now).unwrap();
                        (handle.slot(), handle.generation())
                    })
                })
                .collect();
            let seen: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
            assert!(seen.iter().all(|entry| *entry == seen[0]), "round {round}: {seen:?}");
            assert_eq!(pool.stats().active, usize::from(round) + 1);
        }
        assert_eq!(pool.stats().allocations, u64::from(ROUNDS));
        assert_eq!(pool.flush_all(), usize::from(ROUNDS));
    }

    #[test]
    fn tens_of_thousands_of_open_sessions_are_flushed() {
        const SESSIONS: u32 = 60_000;
        let sink = Arc::new(CollectingSink::new());
        let pool = SessionPool::new(
            TrackerConfig::default(),
            Arc::new(Classifier::new()),
            sink.clone(),
            Arc::new(InterfaceStats::new()),
        )
        .unwrap();
        let now = OffsetDateTime::UNIX_EPOCH;
        let server = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        for i in 0..SESSIONS {
            let client = IpAddr::V4(Ipv4Addr::from(0x0a01_0000 + (i >> 8)));
            let key = FlowIdentity::from_endpoints(client, 1024 + (i & 0xff) as u16, server, 80);
            assert!(pool.resolve(key, true, false, now).is_some(), "session {i}");
        }
        assert_eq!(pool.stats().active, SESSIONS as usize);

        assert_eq!(pool.flush_all(), SESSIONS as usize);
        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.free, stats.slots);
        assert_eq!(sink.sessions().len(), SESSIONS as usize);
    }

    #[test]
    fn syn_for_closing_session_opens_nothing() {
        let pool = pool(Arc::new(CollectingSink::new()));
        let now = OffsetDateTime::UNIX_EPOCH;
        let handle = pool.resolve(flow(1000), true, false, now).unwrap();
        assert!(handle.session().begin_close(handle.generation()));

        assert!(pool.resolve(flow(1000), true, false, now).is_none());
        assert!(pool.resolve(flow(1000).reverse(), false, false, now).is_none());
        let stats = pool.stats();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.allocations, 1);
    }
}
