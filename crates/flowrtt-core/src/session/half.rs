use std::fmt;

use log::{debug, error, warn};

use super::rtt::RttStats;
use crate::cache::{CacheKey, SequenceCache};
use crate::flow::FlowIdentity;
use crate::segment::Segment;
use crate::telemetry::InterfaceStats;

/// Direction of a half relative to the session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToServer = 0,
    ServerToClient = 1,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::ClientToServer, Direction::ServerToClient];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn mirror(self) -> Self {
        match self {
            Direction::ClientToServer => Direction::ServerToClient,
            Direction::ServerToClient => Direction::ClientToServer,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToServer => f.write_str("c2s"),
            Direction::ServerToClient => f.write_str("s2c"),
        }
    }
}

/// Per-segment collaborators a half needs from its session.
pub(crate) struct HalfContext<'a> {
    pub cache: &'a SequenceCache,
    pub rtt: &'a mut RttStats,
    pub stats: &'a InterfaceStats,
    pub mirror_waiting_close: bool,
}

/// What the session must do after a half handled a segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct HalfStep {
    /// Both directions have now seen FIN or RST.
    pub finish: bool,
    /// The payload should be offered to the classifier.
    pub inspect: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateDelta {
    pub bytes: u64,
    pub packets: u64,
}

/// One direction of a session.
#[derive(Debug, Clone)]
pub struct ConnectionHalf {
    direction: Direction,
    key: FlowIdentity,
    closed: bool,
    waiting_close: bool,
    bytes: u64,
    packets: u64,
    prev_bytes: u64,
    prev_packets: u64,
}

impl ConnectionHalf {
    pub fn new(direction: Direction, key: FlowIdentity) -> Self {
        Self {
            direction,
            key,
            closed: false,
            waiting_close: false,
            bytes: 0,
            packets: 0,
            prev_bytes: 0,
            prev_packets: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn key(&self) -> FlowIdentity {
        self.key
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn is_waiting_close(&self) -> bool {
        self.waiting_close
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Counter increase since the previous call.
    pub fn take_rate_delta(&mut self) -> RateDelta {
        let delta = RateDelta {
            bytes: self.bytes - self.prev_bytes,
            packets: self.packets - self.prev_packets,
        };
        self.prev_bytes = self.bytes;
        self.prev_packets = self.packets;
        delta
    }

    pub(crate) fn handle(&mut self, segment: &Segment, ctx: HalfContext<'_>) -> HalfStep {
        if self.closed {
            warn!(
                "conn {} is closed, seq:{}, ack:{}, len:{}",
                self.key,
                segment.seq,
                segment.ack,
                segment.payload.len()
            );
            return HalfStep::default();
        }

        let mut step = HalfStep::default();
        if segment.flags.is_termination() {
            self.waiting_close = true;
            step.finish = ctx.mirror_waiting_close;
        }

        let len = segment.payload.len() as u64;
        self.bytes += len;
        self.packets += 1;

        match self.direction {
            Direction::ClientToServer => {
                ctx.stats.add_tx(len);
                let key = CacheKey::new(self.key, segment.next_seq());
                if let Err(err) = ctx.cache.push(key, segment.seen) {
                    error!("conn {} cache push {} failed: {}", self.key, key, err);
                    return step;
                }
            }
            Direction::ServerToClient => {
                ctx.stats.add_rx(len);
                let key = CacheKey::new(self.key.reverse(), segment.ack);
                match ctx.cache.pull(key) {
                    Err(err) => {
                        error!("conn {} cache pull {} failed: {}", self.key, key, err);
                        return step;
                    }
                    Ok(Some(sent)) => {
                        let rtt = segment.seen - sent;
                        if !ctx.rtt.record(rtt) {
                            debug!("conn {} dropped negative rtt {} for {}", self.key, rtt, key);
                        }
                    }
                    Ok(None) => {}
                }
            }
        }

        step.inspect = !segment.payload.is_empty();
        step
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionHalf, Direction, HalfContext};
    use crate::cache::SequenceCache;
    use crate::flow::FlowIdentity;
    use crate::segment::{Segment, TcpFlags};
    use crate::seq::Sequence;
    use crate::session::rtt::RttStats;
    use crate::telemetry::InterfaceStats;
    use time::{Duration, OffsetDateTime};

    fn client() -> FlowIdentity {
        FlowIdentity::from_endpoints(
            "10.0.0.1".parse().unwrap(),
            40000,
            "10.0.0.2".parse().unwrap(),
            80,
        )
    }

    fn segment(
        flow: FlowIdentity,
        flags: TcpFlags,
        seq: u32,
        ack: u32,
        payload: &[u8],
        ms: i64,
    ) -> Segment {
        Segment {
            flow,
            flags,
            seq: Sequence::new(seq),
            ack: Sequence::new(ack),
            payload: payload.to_vec(),
            seen: OffsetDateTime::UNIX_EPOCH + Duration::milliseconds(ms),
        }
    }

    struct Fixture {
        cache: SequenceCache,
        rtt: RttStats,
        stats: InterfaceStats,
        c2s: ConnectionHalf,
        s2c: ConnectionHalf,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                cache: SequenceCache::new(None),
                rtt: RttStats::default(),
                stats: InterfaceStats::new(),
                c2s: ConnectionHalf::new(Direction::ClientToServer, client()),
                s2c: ConnectionHalf::new(Direction::ServerToClient, client().reverse()),
            }
        }

        fn send(&mut self, direction: Direction, segment: &Segment) -> super::HalfStep {
            let (half, mirror) = match direction {
                Direction::ClientToServer => (&mut self.c2s, &self.s2c),
                Direction::ServerToClient => (&mut self.s2c, &self.c2s),
            };
            half.handle(
                segment,
                HalfContext {
                    cache: &self.cache,
                    rtt: &mut self.rtt,
                    stats: &self.stats,
                    mirror_waiting_close: mirror.is_waiting_close(),
                },
            )
        }
    }

    #[test]
    fn control_segment_ack_samples_rtt() {
        let mut fx = Fixture::new();
        fx.send(
            Direction::ClientToServer,
            &segment(client(), TcpFlags::default(), 100, 0, &[], 0),
        );
        fx.send(
            Direction::ServerToClient,
            &segment(client().reverse(), TcpFlags::default(), 500, 101, &[], 7),
        );
        assert_eq!(fx.rtt.count(), 1);
        assert_eq!(fx.rtt.first(), Some(Duration::milliseconds(7)));
    }

    #[test]
    fn negative_rtt_is_discarded() {
        let mut fx = Fixture::new();
        fx.send(
            Direction::ClientToServer,
            &segment(client(), TcpFlags::default(), 100, 0, &[], 50),
        );
        fx.send(
            Direction::ServerToClient,
            &segment(client().reverse(), TcpFlags::default(), 500, 101, &[], 10),
        );
        assert_eq!(fx.rtt.count(), 0);
    }

    #[test]
    fn counters_and_interface_stats() {
        let mut fx = Fixture::new();
        let step = fx.send(
            Direction::ClientToServer,
            &segment(client(), TcpFlags::default(), 1, 0, &[7u8; 10], 0),
        );
        assert!(step.inspect);
        assert_eq!(fx.c2s.bytes(), 10);
        assert_eq!(fx.c2s.packets(), 1);
        assert_eq!(fx.stats.snapshot().tx_bytes, 10);

        let delta = fx.c2s.take_rate_delta();
        assert_eq!(delta.bytes, 10);
        assert_eq!(fx.c2s.take_rate_delta().bytes, 0);
    }

    #[test]
    fn both_terminations_finish() {
        let mut fx = Fixture::new();
        let fin = TcpFlags {
            fin: true,
            ack: true,
            ..TcpFlags::default()
        };
        let first = fx.send(
            Direction::ClientToServer,
            &segment(client(), fin, 10, 0, &[], 0),
        );
        assert!(!first.finish);
        let second = fx.send(
            Direction::ServerToClient,
            &segment(client().reverse(), fin, 20, 11, &[], 1),
        );
        assert!(second.finish);
    }

    #[test]
    fn closed_cache_skips_rtt_but_keeps_counters() {
        let mut fx = Fixture::new();
        fx.cache.remove_all();
        let step = fx.send(
            Direction::ClientToServer,
            &segment(client(), TcpFlags::default(), 1, 0, b"data", 0),
        );
        assert!(!step.inspect);
        assert_eq!(fx.c2s.packets(), 1);
    }

    #[test]
    fn closed_half_drops_segment() {
        let mut fx = Fixture::new();
        fx.c2s.close();
        fx.send(
            Direction::ClientToServer,
            &segment(client(), TcpFlags::default(), 1, 0, b"data", 0),
        );
        assert_eq!(fx.c2s.packets(), 0);
        assert_eq!(fx.stats.snapshot().tx_packets, 0);
    }
}
