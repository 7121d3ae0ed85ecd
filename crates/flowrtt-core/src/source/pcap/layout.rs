pub const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];
pub const PCAP_READER_BUFFER_SIZE: usize = 65536;

/// Default `if_tsresol`: microseconds.
pub const DEFAULT_UNITS_PER_SEC: u64 = 1_000_000;
/// High bit of `if_tsresol` selects a power of two instead of ten.
pub const TSRESOL_BINARY_FLAG: u8 = 0x80;
pub const TSRESOL_EXPONENT_MASK: u8 = 0x7f;

pub const NANOS_PER_SEC: i128 = 1_000_000_000;
pub const NANOS_PER_MICRO: i128 = 1_000;
