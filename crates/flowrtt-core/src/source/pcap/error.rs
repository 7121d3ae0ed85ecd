use pcap_parser::PcapError;
use thiserror::Error;

/// Errors raised while reading a capture file.
#[derive(Debug, Error)]
pub enum PcapSourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The file ends inside a block or record.
    #[error("capture truncated ({context})")]
    Truncated { context: &'static str },
    #[error("PCAP parse error ({context}): {message}")]
    Pcap {
        context: &'static str,
        message: String,
    },
}

impl PcapSourceError {
    pub(crate) fn from_reader<I: std::fmt::Debug>(
        context: &'static str,
        err: PcapError<I>,
    ) -> Self {
        match err {
            PcapError::UnexpectedEof => PcapSourceError::Truncated { context },
            other => PcapSourceError::Pcap {
                context,
                message: other.to_string(),
            },
        }
    }
}
