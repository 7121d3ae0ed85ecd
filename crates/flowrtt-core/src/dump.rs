//! Per-segment capture dump.
//!
//! Every segment handed to a [`crate::Tracker`] is described on one line:
//! endpoints, capture time, payload length, sequence and acknowledgement
//! numbers and control flags. Verbose dumps add a hex view of the payload.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;
use time::format_description::well_known::Rfc3339;

use crate::segment::{Segment, TcpFlags};

const HEX_ROW: usize = 16;

/// Line-oriented segment log shared by the producers of one tracker.
pub struct CaptureDump {
    out: Mutex<Box<dyn Write + Send>>,
    payload: bool,
}

impl CaptureDump {
    /// `payload` adds a hex view of each segment's payload.
    pub fn new(out: impl Write + Send + 'static, payload: bool) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
            payload,
        }
    }

    pub fn create(path: &Path, payload: bool) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file), payload))
    }

    pub fn record(&self, segment: &Segment) -> io::Result<()> {
        let mut out = self.out.lock();
        writeln!(out, "{}", describe(segment))?;
        if self.payload {
            for line in hex_rows(&segment.payload) {
                writeln!(out, "    {}", line)?;
            }
        }
        Ok(())
    }

    pub fn flush(&self) -> io::Result<()> {
        self.out.lock().flush()
    }
}

/// One-line summary of `segment`.
///
/// # Examples
/// ```
/// use flowrtt_core::{FlowIdentity, Segment, Sequence, TcpFlags, Timestamp};
/// use flowrtt_core::dump::describe;
///
/// let segment = Segment {
///     flow: FlowIdentity::from_endpoints(
///         "10.0.0.1".parse().unwrap(),
///         40000,
///         "10.0.0.2".parse().unwrap(),
///         80,
///     ),
///     flags: TcpFlags { syn: true, ..TcpFlags::default() },
///     seq: Sequence::new(100),
///     ack: Sequence::new(0),
///     payload: Vec::new(),
///     seen: Timestamp::UNIX_EPOCH,
/// };
/// let line = describe(&segment);
/// assert!(line.starts_with("TCP  10.0.0.1:40000"));
/// assert!(line.ends_with("Flag[ SYN ]"));
/// ```
pub fn describe(segment: &Segment) -> String {
    let direction = format!(
        "{:<21} -> {:<21}",
        segment.flow.src_endpoint(),
        segment.flow.dst_endpoint()
    );
    let seen = segment
        .seen
        .format(&Rfc3339)
        .unwrap_or_else(|_| segment.seen.to_string());
    format!(
        "TCP  {:<46} Time[ {:<30} ] Len[ {:<4} ] Seq[ {:<10} ] Ack[ {:<10} ] Flag[ {} ]",
        direction,
        seen,
        segment.payload.len(),
        segment.seq,
        segment.ack,
        flag_names(&segment.flags)
    )
}

fn flag_names(flags: &TcpFlags) -> String {
    [
        (flags.syn, "SYN"),
        (flags.fin, "FIN"),
        (flags.rst, "RST"),
        (flags.psh, "PSH"),
        (flags.ack, "ACK"),
    ]
    .iter()
    .filter(|(set, _)| *set)
    .map(|(_, name)| *name)
    .collect::<Vec<_>>()
    .join(" ")
}

/// Offset, hex bytes and printable ASCII, sixteen bytes per row.
fn hex_rows(payload: &[u8]) -> impl Iterator<Item = String> + '_ {
    payload
        .chunks(HEX_ROW)
        .enumerate()
        .map(|(row, chunk)| {
            let hex = chunk
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" ");
            let ascii: String = chunk
                .iter()
                .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
                .collect();
            format!("{:04x}  {:<47}  {}", row * HEX_ROW, hex, ascii)
        })
}

#[cfg(test)]
mod tests {
    use super::{CaptureDump, describe, flag_names, hex_rows};
    use crate::flow::FlowIdentity;
    use crate::segment::{Segment, TcpFlags};
    use crate::seq::Sequence;
    use parking_lot::Mutex;
    use std::io::Write;
    use std::sync::Arc;
    use time::OffsetDateTime;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn segment(flags: TcpFlags, payload: &[u8]) -> Segment {
        Segment {
            flow: FlowIdentity::from_endpoints(
                "192.168.1.10".parse().unwrap(),
                51000,
                "192.168.1.20".parse().unwrap(),
                443,
            ),
            flags,
            seq: Sequence::new(4_000_000_000),
            ack: Sequence::new(17),
            payload: payload.to_vec(),
            seen: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn flags_are_listed_in_fixed_order() {
        let flags = TcpFlags {
            ack: true,
            fin: true,
            psh: true,
            ..TcpFlags::default()
        };
        assert_eq!(flag_names(&flags), "FIN PSH ACK");
        assert_eq!(flag_names(&TcpFlags::default()), "");
    }

    #[test]
    fn describe_reports_numbers_and_time() {
        let line = describe(&segment(TcpFlags::default(), b"hello"));
        assert!(line.contains("192.168.1.10:51000"));
        assert!(line.contains("-> 192.168.1.20:443"));
        assert!(line.contains("Time[ 1970-01-01T00:00:00Z"));
        assert!(line.contains("Len[ 5    ]"));
        assert!(line.contains("Seq[ 4000000000 ]"));
        assert!(line.contains("Ack[ 17         ]"));
    }

    #[test]
    fn hex_rows_wrap_at_sixteen_bytes() {
        let rows: Vec<_> = hex_rows(b"GET / HTTP/1.1\r\nHost: x\r\n").collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("0000  47 45 54 20"));
        assert!(rows[0].ends_with("GET / HTTP/1.1.."));
        assert!(rows[1].starts_with("0010  "));
    }

    #[test]
    fn payload_hex_only_in_verbose_dumps() {
        let plain = Shared::default();
        let dump = CaptureDump::new(plain.clone(), false);
        dump.record(&segment(TcpFlags::default(), b"abc")).unwrap();
        assert_eq!(plain.0.lock().iter().filter(|&&b| b == b'\n').count(), 1);

        let verbose = Shared::default();
        let dump = CaptureDump::new(verbose.clone(), true);
        dump.record(&segment(TcpFlags::default(), b"abc")).unwrap();
        let text = String::from_utf8(verbose.0.lock().clone()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("0000  61 62 63"));
    }
}
