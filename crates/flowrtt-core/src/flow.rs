use std::fmt;
use std::net::IpAddr;

/// Network-layer half of a flow identity (address pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetFlow {
    pub src: IpAddr,
    pub dst: IpAddr,
}

impl NetFlow {
    pub fn new(src: IpAddr, dst: IpAddr) -> Self {
        Self { src, dst }
    }

    pub fn reverse(self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

/// Transport-layer half of a flow identity (port pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportFlow {
    pub src: u16,
    pub dst: u16,
}

impl TransportFlow {
    pub fn new(src: u16, dst: u16) -> Self {
        Self { src, dst }
    }

    pub fn reverse(self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

/// Directional identity of one TCP connection as seen on the wire.
///
/// Both directions of a connection map to identities that differ only by
/// [`FlowIdentity::reverse`]; session lookups try both.
///
/// # Examples
/// ```
/// use flowrtt_core::FlowIdentity;
///
/// let flow = FlowIdentity::from_endpoints(
///     "10.0.0.1".parse().unwrap(),
///     40000,
///     "10.0.0.2".parse().unwrap(),
///     80,
/// );
/// assert_eq!(flow.reverse().reverse(), flow);
/// assert_eq!(flow.to_string(), "10.0.0.1:40000->10.0.0.2:80");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowIdentity {
    pub net: NetFlow,
    pub transport: TransportFlow,
}

impl FlowIdentity {
    pub fn new(net: NetFlow, transport: TransportFlow) -> Self {
        Self { net, transport }
    }

    pub fn from_endpoints(src_ip: IpAddr, src_port: u16, dst_ip: IpAddr, dst_port: u16) -> Self {
        Self {
            net: NetFlow::new(src_ip, dst_ip),
            transport: TransportFlow::new(src_port, dst_port),
        }
    }

    /// Swap source and destination on both layers.
    pub fn reverse(self) -> Self {
        Self {
            net: self.net.reverse(),
            transport: self.transport.reverse(),
        }
    }

    /// Source endpoint in `ip:port` form.
    pub fn src_endpoint(&self) -> String {
        format_endpoint(self.net.src, self.transport.src)
    }

    /// Destination endpoint in `ip:port` form.
    pub fn dst_endpoint(&self) -> String {
        format_endpoint(self.net.dst, self.transport.dst)
    }
}

impl fmt::Display for FlowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.src_endpoint(), self.dst_endpoint())
    }
}

pub(crate) fn format_endpoint(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(addr) => format!("{}:{}", addr, port),
        IpAddr::V6(addr) => format!("[{}]:{}", addr, port),
    }
}
