pub mod pcap;

pub use pcap::PcapFileSource;

use pcap_parser::Linktype;
use thiserror::Error;

use crate::segment::Timestamp;

/// One captured frame. `ts` is `None` when the capture clock cannot be
/// represented.
#[derive(Debug, Clone)]
pub struct PacketEvent {
    pub ts: Option<Timestamp>,
    pub linktype: Linktype,
    pub data: Vec<u8>,
}

/// Pull-based supplier of captured frames; `Ok(None)` marks end of input.
pub trait PacketSource {
    fn next_packet(&mut self) -> Result<Option<PacketEvent>, SourceError>;
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The capture ends inside a record; packets read so far are valid.
    #[error("capture truncated: {0}")]
    Truncated(String),
    #[error("PCAP parse error: {0}")]
    Pcap(String),
}

impl From<pcap::error::PcapSourceError> for SourceError {
    fn from(value: pcap::error::PcapSourceError) -> Self {
        match value {
            pcap::error::PcapSourceError::Io(err) => SourceError::Io(err),
            pcap::error::PcapSourceError::Truncated { context } => {
                SourceError::Truncated(context.to_string())
            }
            pcap::error::PcapSourceError::Pcap { context, message } => {
                SourceError::Pcap(format!("{context}: {message}"))
            }
        }
    }
}
