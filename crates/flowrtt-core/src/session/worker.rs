use std::collections::HashMap;
use std::sync::{Arc, Weak};

use log::{debug, warn};
use tokio::sync::mpsc::Receiver;
use tokio::time::{Instant, MissedTickBehavior};

use super::clock::CaptureClock;
use super::half::{ConnectionHalf, Direction, HalfContext};
use super::pool::PoolShared;
use super::rtt::RttStats;
use super::{CloseReason, Envelope, Session};
use crate::classify::{AppRequest, ClassificationEvent, Classifier, Exchange};
use crate::config::TrackerConfig;
use crate::flow::FlowIdentity;
use crate::segment::{Segment, Timestamp};
use crate::telemetry::{InterfaceStats, TelemetrySink};
use crate::{DirectionSummary, SessionSummary};

/// Shared collaborators handed to every worker by its pool.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub pool: Weak<PoolShared>,
    pub config: Arc<TrackerConfig>,
    pub classifier: Arc<Classifier>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub stats: Arc<InterfaceStats>,
    pub clock: Arc<CaptureClock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Classification {
    Unknown,
    /// A request was decoded; its response is still pending.
    RequestPending(String),
    Classified(String),
}

impl Classification {
    fn protocol(&self) -> Option<&str> {
        match self {
            Classification::Unknown => None,
            Classification::RequestPending(name) | Classification::Classified(name) => Some(name),
        }
    }
}

/// Exclusive owner of one session lifecycle's state.
pub(crate) struct Worker {
    session: Arc<Session>,
    generation: u64,
    key: FlowIdentity,
    ctx: WorkerContext,
    halves: [ConnectionHalf; 2],
    routes: HashMap<FlowIdentity, Direction>,
    first_seen: Timestamp,
    last_seen: Timestamp,
    rtt: RttStats,
    classification: Classification,
    inspected: u32,
    pending_request: Option<AppRequest>,
    exchanges: u64,
}

impl Worker {
    pub(crate) fn new(
        session: Arc<Session>,
        key: FlowIdentity,
        now: Timestamp,
        generation: u64,
        ctx: WorkerContext,
    ) -> Self {
        let routes = HashMap::from([
            (key, Direction::ClientToServer),
            (key.reverse(), Direction::ServerToClient),
        ]);
        Self {
            session,
            generation,
            key,
            ctx,
            halves: [
                ConnectionHalf::new(Direction::ClientToServer, key),
                ConnectionHalf::new(Direction::ServerToClient, key.reverse()),
            ],
            routes,
            first_seen: now,
            last_seen: now,
            rtt: RttStats::default(),
            classification: Classification::Unknown,
            inspected: 0,
            pending_request: None,
            exchanges: 0,
        }
    }

    pub(crate) async fn run(mut self, mut inbox: Receiver<Envelope>) {
        debug!("created the bidirectional session {} at {}", self.key, self.first_seen);
        let period = self.ctx.config.idle_check_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                envelope = inbox.recv() => match envelope {
                    Some(Envelope::Segment(segment)) => {
                        if self.process(*segment) {
                            break CloseReason::Finish;
                        }
                    }
                    Some(Envelope::Close(reason)) => break reason,
                    None => break CloseReason::Flush,
                },
                _ = ticker.tick() => {
                    if self.tick() {
                        break CloseReason::Timeout;
                    }
                }
            }
        };

        self.close(reason);
    }

    /// Returns `true` when the session must finish after this segment.
    fn process(&mut self, segment: Segment) -> bool {
        let Some(&direction) = self.routes.get(&segment.flow) else {
            warn!("session {} has no route for {}, dropped", self.key, segment.flow);
            return false;
        };

        self.session.touch(segment.seen);
        if self.last_seen < segment.seen {
            self.last_seen = segment.seen;
        }

        let mirror_waiting_close = self.halves[direction.mirror().index()].is_waiting_close();
        let step = self.halves[direction.index()].handle(
            &segment,
            HalfContext {
                cache: self.session.cache(),
                rtt: &mut self.rtt,
                stats: &self.ctx.stats,
                mirror_waiting_close,
            },
        );

        if step.inspect {
            self.inspect(&segment.payload, segment.seen);
        }
        step.finish
    }

    fn inspect(&mut self, payload: &[u8], seen: Timestamp) {
        let target = match &self.classification {
            Classification::Unknown if self.inspected <= self.ctx.config.max_inspected_segments => {
                None
            }
            Classification::Unknown => return,
            Classification::RequestPending(name) => Some(name.clone()),
            Classification::Classified(name) if self.ctx.classifier.refines(name) => {
                Some(name.clone())
            }
            Classification::Classified(_) => return,
        };
        self.inspected += 1;

        let mut decoded = None;
        let emit = |name: &str, event: ClassificationEvent| {
            decoded = Some((name.to_string(), event));
        };
        match target {
            None => self.ctx.classifier.classify(payload, seen, emit),
            Some(name) => self.ctx.classifier.classify_with(&name, payload, seen, emit),
        };

        if let Some((name, event)) = decoded {
            self.on_event(name, event);
        }
    }

    fn on_event(&mut self, name: String, event: ClassificationEvent) {
        match event {
            ClassificationEvent::Unknown => {}
            ClassificationEvent::Request(request) => {
                self.pending_request = Some(request);
                if self.classification == Classification::Unknown {
                    self.classification = Classification::RequestPending(name);
                }
            }
            ClassificationEvent::Response(response) => {
                let Some(request) = self.pending_request.take() else {
                    return;
                };
                let exchange = Exchange::compose(request, &response);
                self.ctx.telemetry.exchange(&self.key, &exchange);
                self.exchanges += 1;
                self.classification = Classification::Classified(name);
                self.inspected = 0;
            }
        }
    }

    /// Periodic maintenance. Returns `true` when the session went idle.
    fn tick(&mut self) -> bool {
        for half in &mut self.halves {
            let delta = half.take_rate_delta();
            debug!(
                "[{}] {} B/P[{}/{}] total B/P[{}/{}]",
                self.key,
                half.direction(),
                delta.bytes,
                delta.packets,
                half.bytes(),
                half.packets()
            );
        }

        let Some(now) = self.ctx.clock.now() else {
            return false;
        };
        let purged = self.session.cache().purge(now);
        if purged > 0 {
            debug!("[{}] purged {} expired cache entries", self.key, purged);
        }
        is_idle(self.last_seen, now, self.ctx.config.idle_timeout())
    }

    fn close(mut self, reason: CloseReason) {
        if !self.session.begin_close(self.generation) {
            return;
        }

        self.routes.clear();
        for half in &mut self.halves {
            half.close();
        }
        self.session.cache().remove_all();

        let summary = self.summary(reason);
        debug!("closing session {} ({})", self.key, reason);
        self.ctx.telemetry.session_closed(&summary);

        if let Some(pool) = self.ctx.pool.upgrade() {
            pool.release(self.session.slot(), self.key, self.generation);
        }
    }

    fn summary(&self, reason: CloseReason) -> SessionSummary {
        let [forward, backward] = &self.halves;
        SessionSummary {
            client: self.key.src_endpoint(),
            server: self.key.dst_endpoint(),
            close_reason: reason,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            duration_us: (self.last_seen - self.first_seen).whole_microseconds() as i64,
            forward: DirectionSummary {
                bytes: forward.bytes(),
                packets: forward.packets(),
            },
            backward: DirectionSummary {
                bytes: backward.bytes(),
                packets: backward.packets(),
            },
            rtt: self.rtt.summary(),
            protocol: self.classification.protocol().map(str::to_string),
            exchanges: self.exchanges,
        }
    }
}

/// `false` when the timeout reaches past the representable range.
fn is_idle(last_seen: Timestamp, now: Timestamp, idle_timeout: time::Duration) -> bool {
    now.checked_sub(idle_timeout)
        .is_some_and(|cutoff| last_seen < cutoff)
}
