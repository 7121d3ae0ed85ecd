use std::io::{Read, Seek, SeekFrom};

use pcap_parser::Linktype;
use time::OffsetDateTime;

use super::error::PcapSourceError;
use super::layout;
use crate::segment::Timestamp;

/// Link type and clock of one PCAPNG interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceClock {
    pub linktype: Linktype,
    pub units_per_sec: u64,
    pub offset_secs: i64,
}

impl Default for InterfaceClock {
    fn default() -> Self {
        Self {
            linktype: Linktype::ETHERNET,
            units_per_sec: layout::DEFAULT_UNITS_PER_SEC,
            offset_secs: 0,
        }
    }
}

/// Read the magic bytes and rewind the reader to the start.
///
/// # Examples
/// ```
/// use flowrtt_core::source::pcap::reader::read_magic_and_rewind;
/// use std::io::Cursor;
///
/// let bytes = [0x0a, 0x0d, 0x0d, 0x0a, 0x01];
/// let mut cursor = Cursor::new(bytes);
/// let magic = read_magic_and_rewind(&mut cursor).unwrap();
/// assert_eq!(magic, [0x0a, 0x0d, 0x0d, 0x0a]);
/// ```
///
/// # Errors
/// Returns `PcapSourceError` when the reader cannot be read or rewound.
pub fn read_magic_and_rewind<R: Read + Seek>(reader: &mut R) -> Result<[u8; 4], PcapSourceError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    reader.seek(SeekFrom::Start(0))?;
    Ok(magic)
}

pub fn is_pcapng_magic(magic: &[u8; 4]) -> bool {
    magic == &layout::PCAPNG_MAGIC
}

/// Resolve the clock for a given interface id, defaulting to Ethernet with
/// microsecond resolution.
pub fn clock_for_interface(interfaces: &[InterfaceClock], if_id: u32) -> InterfaceClock {
    interfaces
        .get(if_id as usize)
        .copied()
        .unwrap_or_default()
}

/// Decode the `if_tsresol` option into timestamp units per second.
///
/// Returns `None` when the resolution does not fit in 64 bits.
///
/// # Examples
/// ```
/// use flowrtt_core::source::pcap::reader::units_per_sec;
///
/// assert_eq!(units_per_sec(6), Some(1_000_000));
/// assert_eq!(units_per_sec(9), Some(1_000_000_000));
/// assert_eq!(units_per_sec(0x80 | 10), Some(1024));
/// ```
pub fn units_per_sec(tsresol: u8) -> Option<u64> {
    let exponent = u32::from(tsresol & layout::TSRESOL_EXPONENT_MASK);
    if tsresol & layout::TSRESOL_BINARY_FLAG != 0 {
        1u64.checked_shl(exponent)
    } else {
        10u64.checked_pow(exponent)
    }
}

/// Convert a legacy PCAP timestamp.
pub fn legacy_ts(ts_sec: u32, ts_frac: u32, nanosecond: bool) -> Option<Timestamp> {
    let frac = if nanosecond {
        i128::from(ts_frac)
    } else {
        i128::from(ts_frac) * layout::NANOS_PER_MICRO
    };
    let nanos = i128::from(ts_sec) * layout::NANOS_PER_SEC + frac;
    OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
}

/// Convert a PCAPNG high/low timestamp using the interface clock.
pub fn pcapng_ts(ts_high: u32, ts_low: u32, clock: &InterfaceClock) -> Option<Timestamp> {
    if clock.units_per_sec == 0 {
        return None;
    }
    let units = i128::from((u64::from(ts_high) << 32) | u64::from(ts_low));
    let units_per_sec = i128::from(clock.units_per_sec);
    let whole = units / units_per_sec;
    let frac = (units % units_per_sec) * layout::NANOS_PER_SEC / units_per_sec;
    let nanos = (whole + i128::from(clock.offset_secs)) * layout::NANOS_PER_SEC + frac;
    OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
}
