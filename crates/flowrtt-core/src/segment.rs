use time::OffsetDateTime;

use crate::flow::FlowIdentity;
use crate::seq::Sequence;

/// Capture timestamp attached to every segment.
pub type Timestamp = OffsetDateTime;

/// TCP control bits relevant to session tracking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub psh: bool,
}

impl TcpFlags {
    /// First segment of an active open (SYN without ACK).
    pub fn is_initial_syn(&self) -> bool {
        self.syn && !self.ack
    }

    pub fn is_termination(&self) -> bool {
        self.fin || self.rst
    }
}

/// One decoded TCP segment handed to the tracker.
#[derive(Debug, Clone)]
pub struct Segment {
    pub flow: FlowIdentity,
    pub flags: TcpFlags,
    pub seq: Sequence,
    pub ack: Sequence,
    pub payload: Vec<u8>,
    pub seen: Timestamp,
}

impl Segment {
    /// Sequence number the peer is expected to acknowledge for this segment.
    ///
    /// Pure control segments advance the sequence space by one.
    pub fn next_seq(&self) -> Sequence {
        if self.payload.is_empty() {
            self.seq.add(1)
        } else {
            self.seq.add(self.payload.len())
        }
    }
}
