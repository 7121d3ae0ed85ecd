//! HTTP/1.x decoding.
//!
//! The decoder gates on a four-byte prefix (a known method or `HTTP`), then
//! parses the start line and a tolerant header block. Request hosts come from
//! an absolute target when present, otherwise from the `Host` header.
//!
//! Errors distinguish payloads that are not HTTP at all from HTTP payloads
//! with a malformed start line. Constants live in `layout`, line splitting in
//! `reader`.
pub mod decoder;
pub mod error;
pub mod layout;
pub mod parser;
pub mod reader;

pub use decoder::HttpDecoder;
pub use parser::{HttpRequest, HttpResponse, HttpVersion, parse_request, parse_response};
