/// Payloads must be longer than this to be considered at all.
pub const MIN_PAYLOAD_LEN: usize = 5;
pub const PREFIX_LEN: usize = 4;

/// Four-byte prefixes of request lines worth a full parse.
pub const REQUEST_PREFIXES: [&[u8; PREFIX_LEN]; 9] = [
    b"GET ", b"HEAD", b"POST", b"PUT ", b"DELE", b"OPTI", b"PATC", b"CONN", b"TRAC",
];
pub const RESPONSE_PREFIX: &[u8; PREFIX_LEN] = b"HTTP";

pub const VERSION_PREFIX: &str = "HTTP/";
pub const MAX_VERSION_COMPONENT: u32 = 1_000_000;
pub const STATUS_CODE_LEN: usize = 3;

pub const HOST_HEADER: &str = "host";
