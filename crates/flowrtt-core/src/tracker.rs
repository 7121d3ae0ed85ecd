use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{Level, debug, log_enabled, trace, warn};

use crate::classify::Classifier;
use crate::config::TrackerConfig;
use crate::segment::{Segment, Timestamp};
use crate::dump::{self, CaptureDump};
use crate::session::{PoolStats, SessionError, SessionInfo, SessionPool};
use crate::telemetry::{InterfaceStats, TelemetrySink};

/// Segment intake for one capture interface.
///
/// # Examples
/// ```
/// use std::sync::Arc;
///
/// use flowrtt_core::{Classifier, CollectingSink, Tracker, TrackerConfig};
///
/// let sink = Arc::new(CollectingSink::new());
/// let tracker = Tracker::new(
///     "eth0",
///     TrackerConfig::default(),
///     Arc::new(Classifier::with_defaults()),
///     sink.clone(),
/// )
/// .unwrap();
/// assert!(tracker.active_sessions().is_empty());
/// tracker.flush_all();
/// assert!(sink.sessions().is_empty());
/// ```
pub struct Tracker {
    iface: String,
    stats: Arc<InterfaceStats>,
    pool: SessionPool,
    dump: Option<Arc<CaptureDump>>,
}

impl Tracker {
    pub fn new(
        iface: impl Into<String>,
        config: TrackerConfig,
        classifier: Arc<Classifier>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, SessionError> {
        let stats = Arc::new(InterfaceStats::new());
        let pool = SessionPool::new(config, classifier, telemetry, Arc::clone(&stats))?;
        Ok(Self {
            iface: iface.into(),
            stats,
            pool,
            dump: None,
        })
    }

    pub fn iface(&self) -> &str {
        &self.iface
    }

    pub fn stats(&self) -> &Arc<InterfaceStats> {
        &self.stats
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    /// Record every assembled segment in `dump`.
    pub fn set_dump(&mut self, dump: Arc<CaptureDump>) {
        self.dump = Some(dump);
    }

    /// Route one segment to its session, opening one on an initial SYN.
    ///
    /// Blocks while the session's queue is full, so it must not be called
    /// from async code.
    pub fn assemble(&self, segment: Segment) {
        if log_enabled!(Level::Trace) {
            trace!("[{}] {}", self.iface, dump::describe(&segment));
        }
        if let Some(capture) = &self.dump {
            if let Err(err) = capture.record(&segment) {
                warn!("[{}] capture dump failed: {}", self.iface, err);
            }
        }

        let is_initial_syn = segment.flags.is_initial_syn();
        let is_termination = segment.flags.is_termination();
        let Some(handle) =
            self.pool
                .resolve(segment.flow, is_initial_syn, is_termination, segment.seen)
        else {
            return;
        };
        if let Err(err) = handle.enqueue(segment) {
            debug!("[{}] enqueue to {} failed: {}", self.iface, handle.key(), err);
        }
    }

    /// Close sessions idle since before `cutoff`; returns the time spent.
    pub fn flush_older_than(&self, cutoff: Timestamp) -> Duration {
        let started = Instant::now();
        let closed = self.pool.flush_older_than(cutoff);
        let elapsed = started.elapsed();
        debug!("[{}] flushed {} sessions in {:?}", self.iface, closed, elapsed);
        elapsed
    }

    /// Close every open session; returns the time spent.
    pub fn flush_all(&self) -> Duration {
        let started = Instant::now();
        let closed = self.pool.flush_all();
        let elapsed = started.elapsed();
        debug!("[{}] flushed all {} sessions in {:?}", self.iface, closed, elapsed);
        elapsed
    }

    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        self.pool.active_sessions()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}
