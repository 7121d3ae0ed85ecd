use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;

use crate::classify::Classifier;
use crate::config::TrackerConfig;
use crate::dump::CaptureDump;
use crate::segment::Timestamp;
use crate::session::SessionError;
use crate::source::{PacketEvent, PacketSource, PcapFileSource, SourceError};
use crate::telemetry::{CollectingSink, FanoutSink, LogSink, TelemetrySink, ThroughputReporter};
use crate::tracker::Tracker;
use crate::{CaptureSummary, DEFAULT_GENERATED_AT, Report, ThroughputSummary, make_stub_report};

pub mod tcp;

use tcp::parse_tcp_segment;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
    #[error("Session engine error: {0}")]
    Session(#[from] SessionError),
}

pub fn analyze_pcap_file(path: &Path, config: &TrackerConfig) -> Result<Report, AnalysisError> {
    let source = PcapFileSource::open(path)?;
    analyze_source(path, source, config)
}

/// Like [`analyze_pcap_file`], also writing every TCP segment to `dump`.
pub fn analyze_pcap_file_with_dump(
    path: &Path,
    config: &TrackerConfig,
    dump: Arc<CaptureDump>,
) -> Result<Report, AnalysisError> {
    let source = PcapFileSource::open(path)?;
    analyze_source_with_dump(path, source, config, Some(dump))
}

/// Run every packet of `source` through one tracker and build the report.
///
/// Sessions still open at end of input are flushed. Packets without a usable
/// timestamp reuse the previous packet's time. A capture cut inside a record
/// is analysed up to the last complete packet.
pub fn analyze_source<S: PacketSource>(
    path: &Path,
    source: S,
    config: &TrackerConfig,
) -> Result<Report, AnalysisError> {
    analyze_source_with_dump(path, source, config, None)
}

/// Like [`analyze_source`], also writing every TCP segment to `dump`.
pub fn analyze_source_with_dump<S: PacketSource>(
    path: &Path,
    mut source: S,
    config: &TrackerConfig,
    dump: Option<Arc<CaptureDump>>,
) -> Result<Report, AnalysisError> {
    let iface = interface_name(path);
    let collected = Arc::new(CollectingSink::new());
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(FanoutSink::new(vec![
        collected.clone() as Arc<dyn TelemetrySink>,
        Arc::new(LogSink),
    ]));
    let mut tracker = Tracker::new(
        iface.clone(),
        config.clone(),
        Arc::new(Classifier::with_defaults()),
        telemetry,
    )?;
    if let Some(dump) = &dump {
        tracker.set_dump(Arc::clone(dump));
    }
    let reporter = ThroughputReporter::spawn(
        iface.clone(),
        Arc::clone(tracker.stats()),
        config.throughput_interval(),
        Arc::new(LogSink),
    )?;

    let mut packets_total = 0u64;
    let mut tcp_segments = 0u64;
    let mut first_ts = None;
    let mut last_ts = None;
    let mut current = None;

    let outcome = (|| -> Result<(), AnalysisError> {
        loop {
            let PacketEvent { ts, linktype, data } = match source.next_packet() {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(SourceError::Truncated(context)) => {
                    warn!(
                        "[{}] capture truncated after {} packets ({})",
                        iface, packets_total, context
                    );
                    break;
                }
                Err(err) => return Err(err.into()),
            };
            packets_total += 1;
            update_ts_bounds(&mut first_ts, &mut last_ts, ts);
            if ts.is_some() {
                current = ts;
            }
            let seen = current.unwrap_or(Timestamp::UNIX_EPOCH);
            match parse_tcp_segment(linktype, &data, seen) {
                Ok(Some(segment)) => {
                    tcp_segments += 1;
                    tracker.assemble(segment);
                }
                Ok(None) => {}
                Err(err) => debug!("[{}] packet {} skipped: {}", iface, packets_total, err),
            }
        }
        Ok(())
    })();

    let elapsed = tracker.flush_all();
    debug!("[{}] end of input, final flush took {:?}", iface, elapsed);
    reporter.stop();
    if let Some(dump) = &dump {
        dump.flush()?;
    }
    outcome?;

    let pool = tracker.pool_stats();
    if pool.active > 0 {
        warn!("[{}] {} sessions still active after flush", iface, pool.active);
    }

    let mut report = make_stub_report(&path.display().to_string(), path.metadata()?.len());
    report.capture_summary = Some(CaptureSummary {
        packets_total,
        tcp_segments,
        time_start: ts_to_rfc3339(first_ts),
        time_end: ts_to_rfc3339(last_ts),
    });
    report.generated_at = report
        .capture_summary
        .as_ref()
        .and_then(|summary| summary.time_end.clone().or(summary.time_start.clone()))
        .unwrap_or_else(|| DEFAULT_GENERATED_AT.to_string());

    report.sessions = {
        let mut sessions = collected.sessions();
        sessions.sort_by(|a, b| {
            a.first_seen
                .cmp(&b.first_seen)
                .then_with(|| a.client.cmp(&b.client))
                .then_with(|| a.server.cmp(&b.server))
        });
        sessions
    };
    report.exchanges = {
        let mut exchanges = collected.exchanges();
        exchanges.sort_by(|a, b| {
            a.requested_at
                .cmp(&b.requested_at)
                .then_with(|| a.client.cmp(&b.client))
                .then_with(|| a.server.cmp(&b.server))
        });
        exchanges
    };
    report.throughput = vec![ThroughputSummary {
        interface: iface,
        totals: tracker.stats().snapshot(),
    }];
    Ok(report)
}

fn interface_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "capture".to_string())
}

fn update_ts_bounds(
    first: &mut Option<Timestamp>,
    last: &mut Option<Timestamp>,
    ts: Option<Timestamp>,
) {
    let Some(ts) = ts else {
        return;
    };
    if first.is_none_or(|existing| ts < existing) {
        *first = Some(ts);
    }
    if last.is_none_or(|existing| ts > existing) {
        *last = Some(ts);
    }
}

fn ts_to_rfc3339(ts: Option<Timestamp>) -> Option<String> {
    ts.and_then(|ts| ts.format(&Rfc3339).ok())
}
