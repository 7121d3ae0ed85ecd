use std::net::IpAddr;

use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use pcap_parser::Linktype;

use super::error::TcpError;
use crate::flow::FlowIdentity;
use crate::segment::{Segment, TcpFlags, Timestamp};
use crate::seq::Sequence;

/// Parse a TCP segment from a link-layer frame.
///
/// Returns `Ok(None)` when the frame does not carry TCP or uses a link type
/// the tracker does not decode.
pub fn parse_tcp_segment(
    linktype: Linktype,
    data: &[u8],
    seen: Timestamp,
) -> Result<Option<Segment>, TcpError> {
    let sliced = match linktype {
        Linktype::ETHERNET => {
            SlicedPacket::from_ethernet(data).map_err(|e| TcpError::Slice(e.to_string()))?
        }
        Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => {
            SlicedPacket::from_ip(data).map_err(|e| TcpError::Slice(e.to_string()))?
        }
        _ => return Ok(None),
    };

    let net = sliced.net.ok_or(TcpError::MissingNetworkLayer)?;
    let tcp = match sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => tcp,
        _ => return Ok(None),
    };

    let (src_ip, dst_ip) = match net {
        NetSlice::Ipv4(ref ipv4) => (
            IpAddr::V4(ipv4.header().source_addr()),
            IpAddr::V4(ipv4.header().destination_addr()),
        ),
        NetSlice::Ipv6(ref ipv6) => (
            IpAddr::V6(ipv6.header().source_addr()),
            IpAddr::V6(ipv6.header().destination_addr()),
        ),
        #[allow(unreachable_patterns)]
        _ => return Ok(None),
    };

    Ok(Some(Segment {
        flow: FlowIdentity::from_endpoints(
            src_ip,
            tcp.source_port(),
            dst_ip,
            tcp.destination_port(),
        ),
        flags: TcpFlags {
            syn: tcp.syn(),
            ack: tcp.ack(),
            fin: tcp.fin(),
            rst: tcp.rst(),
            psh: tcp.psh(),
        },
        seq: Sequence::new(tcp.sequence_number()),
        ack: Sequence::new(tcp.acknowledgment_number()),
        payload: tcp.payload().to_vec(),
        seen,
    }))
}

#[cfg(test)]
mod tests {
    use super::parse_tcp_segment;
    use crate::analysis::tcp::error::TcpError;
    use etherparse::PacketBuilder;
    use pcap_parser::Linktype;
    use time::OffsetDateTime;

    #[test]
    fn parse_syn() {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4([192, 168, 0, 1], [192, 168, 0, 2], 64)
            .tcp(40000, 80, 1000, 64240)
            .syn();
        let mut packet = Vec::<u8>::with_capacity(builder.size(0));
        builder.write(&mut packet, &[]).unwrap();

        let parsed = parse_tcp_segment(Linktype::ETHERNET, &packet, OffsetDateTime::UNIX_EPOCH)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.flow.transport.src, 40000);
        assert_eq!(parsed.flow.transport.dst, 80);
        assert_eq!(parsed.seq.value(), 1000);
        assert!(parsed.flags.is_initial_syn());
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn parse_raw_ipv6_with_payload() {
        let builder = PacketBuilder::ipv6([0xfe; 16], [0xfd; 16], 64)
            .tcp(5000, 443, 7, 1024)
            .ack(99)
            .psh();
        let payload = b"hello";
        let mut packet = Vec::<u8>::with_capacity(builder.size(payload.len()));
        builder.write(&mut packet, payload).unwrap();

        let parsed = parse_tcp_segment(Linktype::RAW, &packet, OffsetDateTime::UNIX_EPOCH)
            .unwrap()
            .unwrap();
        assert!(parsed.flow.net.src.is_ipv6());
        assert_eq!(parsed.ack.value(), 99);
        assert!(parsed.flags.ack);
        assert!(parsed.flags.psh);
        assert_eq!(parsed.payload, payload);
    }

    #[test]
    fn parse_non_tcp() {
        let builder = PacketBuilder::ethernet2([1, 1, 1, 1, 1, 1], [2, 2, 2, 2, 2, 2])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .udp(1000, 1001);
        let payload = [0u8; 4];
        let mut packet = Vec::<u8>::with_capacity(builder.size(payload.len()));
        builder.write(&mut packet, &payload).unwrap();

        let parsed =
            parse_tcp_segment(Linktype::ETHERNET, &packet, OffsetDateTime::UNIX_EPOCH).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn unsupported_linktype_is_skipped() {
        let parsed =
            parse_tcp_segment(Linktype::NULL, &[0u8; 40], OffsetDateTime::UNIX_EPOCH).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn parse_slice_error() {
        let result = parse_tcp_segment(Linktype::ETHERNET, &[], OffsetDateTime::UNIX_EPOCH);
        assert!(matches!(result, Err(TcpError::Slice(_))));
    }
}
