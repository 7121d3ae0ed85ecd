//! Telemetry collaborators.
//!
//! The engine reports finished sessions, composed exchanges and periodic
//! interface counters through a [`TelemetrySink`]. Sinks never fail: a sink
//! that cannot deliver drops the record.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::classify::Exchange;
use crate::flow::FlowIdentity;
use crate::{ExchangeSummary, RttSummary, SessionSummary};

pub trait TelemetrySink: Send + Sync {
    fn session_closed(&self, summary: &SessionSummary);

    fn exchange(&self, _flow: &FlowIdentity, _exchange: &Exchange) {}

    fn throughput(&self, _delta: &ThroughputDelta) {}
}

/// Byte and packet totals for one capture interface.
///
/// `tx` is client to server, `rx` is server to client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceCounters {
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub rx_packets: u64,
}

impl InterfaceCounters {
    pub fn since(&self, earlier: &InterfaceCounters) -> InterfaceCounters {
        InterfaceCounters {
            tx_bytes: self.tx_bytes.saturating_sub(earlier.tx_bytes),
            tx_packets: self.tx_packets.saturating_sub(earlier.tx_packets),
            rx_bytes: self.rx_bytes.saturating_sub(earlier.rx_bytes),
            rx_packets: self.rx_packets.saturating_sub(earlier.rx_packets),
        }
    }
}

/// Lock-free counters shared by every session of one interface.
#[derive(Debug, Default)]
pub struct InterfaceStats {
    tx_bytes: AtomicU64,
    tx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    rx_packets: AtomicU64,
}

impl InterfaceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tx(&self, bytes: u64) {
        self.tx_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_rx(&self, bytes: u64) {
        self.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> InterfaceCounters {
        InterfaceCounters {
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
        }
    }
}

/// Counter increase over one reporting interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThroughputDelta {
    pub iface: String,
    pub increase: InterfaceCounters,
    pub interval: Duration,
}

/// Background thread emitting [`ThroughputDelta`]s for one interface.
pub struct ThroughputReporter {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl ThroughputReporter {
    pub fn spawn(
        iface: impl Into<String>,
        stats: Arc<InterfaceStats>,
        interval: Duration,
        sink: Arc<dyn TelemetrySink>,
    ) -> std::io::Result<Self> {
        let iface = iface.into();
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name(format!("{iface}-stat"))
            .spawn(move || {
                let mut previous = InterfaceCounters::default();
                loop {
                    let last = match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => false,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
                    };
                    let current = stats.snapshot();
                    sink.throughput(&ThroughputDelta {
                        iface: iface.clone(),
                        increase: current.since(&previous),
                        interval,
                    });
                    previous = current;
                    if last {
                        break;
                    }
                }
            })?;
        Ok(Self { stop, handle })
    }

    /// Stop the reporter after one final delta.
    pub fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            debug!("throughput reporter panicked");
        }
    }
}

/// Renders records as human-readable log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn session_closed(&self, summary: &SessionSummary) {
        info!("{}", render_session(summary));
    }

    fn exchange(&self, flow: &FlowIdentity, exchange: &Exchange) {
        info!(
            "[{}] {} {} {}{} {} {}",
            flow,
            exchange.protocol.to_uppercase(),
            exchange.method,
            exchange.host.as_deref().unwrap_or_default(),
            exchange.target,
            exchange.status,
            scaled_micros(exchange.latency.whole_microseconds() as i64),
        );
    }

    fn throughput(&self, delta: &ThroughputDelta) {
        info!(
            "[{} STAT] increase TxBytes[{}], TxPackets[{}], RxBytes[{}], RxPackets[{}]",
            delta.iface,
            precise_bytes(delta.increase.tx_bytes),
            delta.increase.tx_packets,
            precise_bytes(delta.increase.rx_bytes),
            delta.increase.rx_packets,
        );
    }
}

pub fn render_session(summary: &SessionSummary) -> String {
    format!(
        "[{}->{}] {} B/P[tx:{}/{}, rx:{}/{}] {}, Duration[{}]",
        summary.client,
        summary.server,
        summary.close_reason.label(),
        whole_bytes(summary.forward.bytes),
        summary.forward.packets,
        whole_bytes(summary.backward.bytes),
        summary.backward.packets,
        render_rtt(summary.rtt.as_ref()),
        scaled_micros(summary.duration_us),
    )
}

fn render_rtt(rtt: Option<&RttSummary>) -> String {
    match rtt {
        Some(rtt) => format!(
            "RTT[syn:{}/max:{}/min:{}/avg:{}|{}]",
            scaled_micros(rtt.first_us),
            scaled_micros(rtt.max_us),
            scaled_micros(rtt.min_us),
            scaled_micros(rtt.avg_us),
            rtt.samples
        ),
        None => "RTT[-1/-1/-1](µs)".to_string(),
    }
}

fn scaled_micros(us: i64) -> String {
    if us < 5_000 {
        format!("{us}(µs)")
    } else if us < 5_000_000 {
        format!("{}(ms)", us / 1_000)
    } else {
        format!("{}(s)", us / 1_000_000)
    }
}

fn whole_bytes(bytes: u64) -> String {
    if bytes > 5 * 1024 * 1024 {
        format!("{}MB", bytes / (1024 * 1024))
    } else if bytes > 5 * 1024 {
        format!("{}KB", bytes / 1024)
    } else {
        format!("{bytes}B")
    }
}

fn precise_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    if bytes < 5 * KB {
        format!("{bytes}B")
    } else if bytes < 5 * KB * KB {
        format!("{:.2}KB", bytes as f64 / KB as f64)
    } else if bytes < 5 * KB * KB * KB {
        format!("{:.2}MB", bytes as f64 / (KB * KB) as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / (KB * KB * KB) as f64)
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    sessions: Mutex<Vec<SessionSummary>>,
    exchanges: Mutex<Vec<ExchangeSummary>>,
    deltas: Mutex<Vec<ThroughputDelta>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.sessions.lock().clone()
    }

    pub fn exchanges(&self) -> Vec<ExchangeSummary> {
        self.exchanges.lock().clone()
    }

    pub fn deltas(&self) -> Vec<ThroughputDelta> {
        self.deltas.lock().clone()
    }
}

impl TelemetrySink for CollectingSink {
    fn session_closed(&self, summary: &SessionSummary) {
        self.sessions.lock().push(summary.clone());
    }

    fn exchange(&self, flow: &FlowIdentity, exchange: &Exchange) {
        self.exchanges
            .lock()
            .push(ExchangeSummary::from_exchange(flow, exchange));
    }

    fn throughput(&self, delta: &ThroughputDelta) {
        self.deltas.lock().push(delta.clone());
    }
}

/// Broadcasts every record to each inner sink in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.sinks.push(sink);
    }
}

impl TelemetrySink for FanoutSink {
    fn session_closed(&self, summary: &SessionSummary) {
        for sink in &self.sinks {
            sink.session_closed(summary);
        }
    }

    fn exchange(&self, flow: &FlowIdentity, exchange: &Exchange) {
        for sink in &self.sinks {
            sink.exchange(flow, exchange);
        }
    }

    fn throughput(&self, delta: &ThroughputDelta) {
        for sink in &self.sinks {
            sink.throughput(delta);
        }
    }
}
