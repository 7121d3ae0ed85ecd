//! flowrtt core library: passive TCP session tracking.
//!
//! Decoded TCP segments enter through a [`Tracker`], whose [`SessionPool`]
//! maps each connection (in either direction) to a session slot. Every open
//! session owns a worker task that serializes its segments, splits them
//! into client and server halves, samples round-trip times through a
//! per-session [`SequenceCache`] and offers early payloads to a
//! [`Classifier`] until the application protocol is known. Finished
//! sessions are reported through a [`TelemetrySink`].
//!
//! Capture decoding (`source`, `analysis::tcp`) and protocol parsers
//! (`protocols`, layout/reader/parser) are collaborators around the engine;
//! parsers are side-effect free and all file I/O stays in `source`.
//!
//! Invariants:
//! - At most one live session exists per connection, whichever direction
//!   was seen first.
//! - A session closes exactly once and its slot returns to the pool once.
//! - Report outputs are deterministic for a given capture.
//!
//! # Examples
//! ```no_run
//! use std::path::Path;
//!
//! use flowrtt_core::{TrackerConfig, analyze_pcap_file};
//!
//! let report = analyze_pcap_file(Path::new("capture.pcapng"), &TrackerConfig::default())?;
//! println!("sessions: {}", report.sessions.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use serde::{Deserialize, Serialize};

pub mod analysis;
pub mod cache;
pub mod classify;
pub mod config;
pub mod dump;
pub mod flow;
pub mod protocols;
pub mod segment;
pub mod seq;
pub mod session;
pub mod source;
pub mod telemetry;
mod tracker;

pub use analysis::{
    AnalysisError, analyze_pcap_file, analyze_pcap_file_with_dump, analyze_source,
    analyze_source_with_dump,
};
pub use cache::{CacheError, CacheKey, SequenceCache};
pub use classify::{
    AppRequest, AppResponse, ClassificationEvent, Classifier, ClassifierError, DecodeError,
    Decoder, Exchange,
};
pub use config::{ConfigError, TrackerConfig};
pub use dump::CaptureDump;
pub use flow::{FlowIdentity, NetFlow, TransportFlow};
pub use segment::{Segment, TcpFlags, Timestamp};
pub use seq::Sequence;
pub use session::{
    CloseReason, ConnectionHalf, Direction, PoolStats, Session, SessionError, SessionHandle,
    SessionInfo, SessionPool,
};
pub use source::{PacketEvent, PacketSource, PcapFileSource, SourceError};
pub use telemetry::{
    CollectingSink, FanoutSink, InterfaceCounters, InterfaceStats, LogSink, TelemetrySink,
    ThroughputDelta, ThroughputReporter,
};
pub use tracker::Tracker;

/// Current report schema version.
pub const REPORT_VERSION: u32 = 1;
/// Default timestamp used when no capture time is available.
pub const DEFAULT_GENERATED_AT: &str = "1970-01-01T00:00:00Z";

/// Analysis report with deterministic ordering.
///
/// # Examples
/// ```
/// use flowrtt_core::make_stub_report;
///
/// let report = make_stub_report("capture.pcapng", 123);
/// assert_eq!(report.report_version, flowrtt_core::REPORT_VERSION);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Report schema version (not the binary version).
    pub report_version: u32,
    pub tool: ToolInfo,
    /// RFC3339 timestamp representing the report generation time.
    pub generated_at: String,
    pub input: InputInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_summary: Option<CaptureSummary>,
    /// Finished sessions, by first-seen time then client and server.
    pub sessions: Vec<SessionSummary>,
    /// Request/response pairs, by request time then client.
    pub exchanges: Vec<ExchangeSummary>,
    /// Per-interface totals.
    pub throughput: Vec<ThroughputSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    /// Tool version (semver).
    pub version: String,
}

/// Input capture metadata embedded in reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputInfo {
    /// Input path as provided to the analyzer.
    pub path: String,
    /// Input size in bytes.
    pub bytes: u64,
}

/// Basic capture summary (timestamps may be absent).
///
/// # Examples
/// ```
/// use flowrtt_core::CaptureSummary;
///
/// let summary = CaptureSummary {
///     packets_total: 10,
///     tcp_segments: 8,
///     time_start: None,
///     time_end: None,
/// };
/// assert_eq!(summary.packets_total, 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSummary {
    /// Total packet count observed in the capture.
    pub packets_total: u64,
    /// Packets that decoded to a TCP segment.
    pub tcp_segments: u64,
    /// RFC3339 timestamp of the first packet (if known).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_start: Option<String>,
    /// RFC3339 timestamp of the last packet (if known).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_end: Option<String>,
}

/// Terminal summary of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Client endpoint (`ip:port`), the sender of the first SYN.
    pub client: String,
    pub server: String,
    pub close_reason: CloseReason,
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: Timestamp,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: Timestamp,
    pub duration_us: i64,
    /// Client to server.
    pub forward: DirectionSummary,
    /// Server to client.
    pub backward: DirectionSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt: Option<RttSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    pub exchanges: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionSummary {
    pub bytes: u64,
    pub packets: u64,
}

/// Round-trip statistics in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RttSummary {
    /// First sample of the session, normally the handshake.
    pub first_us: i64,
    pub min_us: i64,
    pub max_us: i64,
    pub avg_us: i64,
    pub samples: u64,
}

/// One request paired with its response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeSummary {
    pub client: String,
    pub server: String,
    pub protocol: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub target: String,
    pub status: u16,
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: Timestamp,
    pub latency_us: i64,
}

impl ExchangeSummary {
    pub fn from_exchange(flow: &FlowIdentity, exchange: &Exchange) -> Self {
        Self {
            client: flow.src_endpoint(),
            server: flow.dst_endpoint(),
            protocol: exchange.protocol.to_string(),
            method: exchange.method.clone(),
            host: exchange.host.clone(),
            target: exchange.target.clone(),
            status: exchange.status,
            requested_at: exchange.requested_at,
            latency_us: exchange.latency.whole_microseconds() as i64,
        }
    }
}

/// Byte and packet totals of one capture interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThroughputSummary {
    pub interface: String,
    #[serde(flatten)]
    pub totals: InterfaceCounters,
}

/// Build a stub report with base fields filled and empty aggregates.
///
/// # Examples
/// ```
/// use flowrtt_core::make_stub_report;
///
/// let report = make_stub_report("capture.pcapng", 123);
/// assert_eq!(report.report_version, flowrtt_core::REPORT_VERSION);
/// assert!(report.sessions.is_empty());
/// ```
pub fn make_stub_report(input_path: &str, input_bytes: u64) -> Report {
    Report {
        report_version: REPORT_VERSION,
        tool: ToolInfo {
            name: "flowrtt".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        generated_at: DEFAULT_GENERATED_AT.to_string(),
        input: InputInfo {
            path: input_path.to_string(),
            bytes: input_bytes,
        },
        capture_summary: None,
        sessions: vec![],
        exchanges: vec![],
        throughput: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    #[test]
    fn report_omits_optional_fields_when_none() {
        let mut report = make_stub_report("capture.pcapng", 1);
        report.capture_summary = Some(CaptureSummary {
            packets_total: 1,
            tcp_segments: 1,
            time_start: None,
            time_end: None,
        });
        report.sessions.push(SessionSummary {
            client: "10.0.0.1:1000".to_string(),
            server: "10.0.0.2:80".to_string(),
            close_reason: CloseReason::Flush,
            first_seen: OffsetDateTime::UNIX_EPOCH,
            last_seen: OffsetDateTime::UNIX_EPOCH,
            duration_us: 0,
            forward: DirectionSummary::default(),
            backward: DirectionSummary::default(),
            rtt: None,
            protocol: None,
            exchanges: 0,
        });

        let value = serde_json::to_value(&report).expect("report json");
        let capture = value.get("capture_summary").expect("capture_summary");
        assert!(capture.get("time_start").is_none());
        assert!(capture.get("time_end").is_none());

        let session = &value["sessions"][0];
        assert!(session.get("rtt").is_none());
        assert!(session.get("protocol").is_none());
        assert_eq!(session["close_reason"], "flush");
        assert_eq!(session["first_seen"], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn throughput_totals_are_flattened() {
        let summary = ThroughputSummary {
            interface: "eth0".to_string(),
            totals: InterfaceCounters {
                tx_bytes: 1,
                tx_packets: 2,
                rx_bytes: 3,
                rx_packets: 4,
            },
        };
        let value = serde_json::to_value(&summary).expect("throughput json");
        assert_eq!(value["interface"], "eth0");
        assert_eq!(value["rx_packets"], 4);
    }
}
