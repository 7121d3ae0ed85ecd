pub mod error;
pub mod parser;

pub use parser::parse_tcp_segment;
