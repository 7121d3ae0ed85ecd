#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use etherparse::PacketBuilder;

pub const CLIENT: ([u8; 4], u16) = ([10, 0, 0, 1], 40000);
pub const SERVER: ([u8; 4], u16) = ([10, 0, 0, 2], 80);

pub const FIN: u8 = 0x01;
pub const SYN: u8 = 0x02;
pub const RST: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    ClientToServer,
    ServerToClient,
}

/// Ethernet/IPv4/TCP frame between `CLIENT` and `SERVER`.
pub fn tcp_frame(dir: Dir, seq: u32, ack: Option<u32>, flags: u8, payload: &[u8]) -> Vec<u8> {
    let (src, dst) = match dir {
        Dir::ClientToServer => (CLIENT, SERVER),
        Dir::ServerToClient => (SERVER, CLIENT),
    };
    let mut builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
        .ipv4(src.0, dst.0, 64)
        .tcp(src.1, dst.1, seq, 65535);
    if flags & SYN != 0 {
        builder = builder.syn();
    }
    if flags & FIN != 0 {
        builder = builder.fin();
    }
    if flags & RST != 0 {
        builder = builder.rst();
    }
    if let Some(ack) = ack {
        builder = builder.ack(ack);
    }
    let mut out = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut out, payload).expect("frame");
    out
}

pub fn temp_path(name: &str) -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    std::env::temp_dir().join(format!("flowrtt_{unique}_{name}"))
}

/// Legacy PCAP, little-endian, Ethernet. Each packet is `(sec, frac, frame)`.
pub fn write_pcap(path: &Path, nanosecond: bool, packets: &[(u32, u32, Vec<u8>)]) {
    let magic: u32 = if nanosecond { 0xa1b2_3c4d } else { 0xa1b2_c3d4 };
    let mut output = Vec::new();
    output.extend_from_slice(&magic.to_le_bytes());
    output.extend_from_slice(&2u16.to_le_bytes());
    output.extend_from_slice(&4u16.to_le_bytes());
    output.extend_from_slice(&0i32.to_le_bytes());
    output.extend_from_slice(&0u32.to_le_bytes());
    output.extend_from_slice(&65535u32.to_le_bytes());
    output.extend_from_slice(&1u32.to_le_bytes());
    for (sec, frac, data) in packets {
        output.extend_from_slice(&sec.to_le_bytes());
        output.extend_from_slice(&frac.to_le_bytes());
        output.extend_from_slice(&(data.len() as u32).to_le_bytes());
        output.extend_from_slice(&(data.len() as u32).to_le_bytes());
        output.extend_from_slice(data);
    }
    fs::write(path, output).expect("write pcap");
}

/// PCAPNG with one Ethernet interface. Timestamps are in interface units;
/// `tsresol` is written as the `if_tsresol` option when given.
pub fn write_pcapng(path: &Path, tsresol: Option<u8>, packets: &[(u64, Vec<u8>)]) {
    let mut output = Vec::new();
    output.extend_from_slice(&pcapng_block(0x0A0D_0D0A, &section_header_body()));
    output.extend_from_slice(&pcapng_block(1, &interface_desc_body(tsresol)));
    for (ts, data) in packets {
        output.extend_from_slice(&pcapng_block(6, &enhanced_packet_body(*ts, data)));
    }
    fs::write(path, output).expect("write pcapng");
}

fn pcapng_block(block_type: u32, body: &[u8]) -> Vec<u8> {
    let total_len = (8 + body.len() + 4) as u32;
    let mut block = Vec::with_capacity(total_len as usize);
    block.extend_from_slice(&block_type.to_be_bytes());
    block.extend_from_slice(&total_len.to_be_bytes());
    block.extend_from_slice(body);
    block.extend_from_slice(&total_len.to_be_bytes());
    block
}

fn section_header_body() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0x1A2B_3C4Du32.to_be_bytes());
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&(-1i64).to_be_bytes());
    body
}

fn interface_desc_body(tsresol: Option<u8>) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&65535u32.to_be_bytes());
    if let Some(tsresol) = tsresol {
        body.extend_from_slice(&9u16.to_be_bytes());
        body.extend_from_slice(&1u16.to_be_bytes());
        body.extend_from_slice(&[tsresol, 0, 0, 0]);
        body.extend_from_slice(&0u16.to_be_bytes());
        body.extend_from_slice(&0u16.to_be_bytes());
    }
    body
}

fn enhanced_packet_body(ts: u64, data: &[u8]) -> Vec<u8> {
    let ts_high = ((ts >> 32) & 0xFFFF_FFFF) as u32;
    let ts_low = (ts & 0xFFFF_FFFF) as u32;
    let cap_len = data.len() as u32;
    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_be_bytes());
    body.extend_from_slice(&ts_high.to_be_bytes());
    body.extend_from_slice(&ts_low.to_be_bytes());
    body.extend_from_slice(&cap_len.to_be_bytes());
    body.extend_from_slice(&cap_len.to_be_bytes());
    body.extend_from_slice(data);
    let pad_len = (4 - (data.len() % 4)) % 4;
    body.extend(std::iter::repeat_n(0u8, pad_len));
    body
}

/// SYN, SYN-ACK, ACK, one request/response pair, then FIN from both sides.
///
/// Returns `(micros since start, frame)` pairs; the handshake RTT is 10 ms
/// and the response arrives 28 ms after the request.
pub fn http_conversation() -> Vec<(u64, Vec<u8>)> {
    let request: &[u8] = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let response: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
    let req_end = 101 + request.len() as u32;
    let resp_end = 501 + response.len() as u32;
    vec![
        (0, tcp_frame(Dir::ClientToServer, 100, None, SYN, &[])),
        (10_000, tcp_frame(Dir::ServerToClient, 500, Some(101), SYN, &[])),
        (11_000, tcp_frame(Dir::ClientToServer, 101, Some(501), 0, &[])),
        (12_000, tcp_frame(Dir::ClientToServer, 101, Some(501), 0, request)),
        (40_000, tcp_frame(Dir::ServerToClient, 501, Some(req_end), 0, response)),
        (50_000, tcp_frame(Dir::ClientToServer, req_end, Some(resp_end), FIN, &[])),
        (60_000, tcp_frame(Dir::ServerToClient, resp_end, Some(req_end + 1), FIN, &[])),
    ]
}
