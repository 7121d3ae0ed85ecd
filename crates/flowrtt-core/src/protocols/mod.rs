//! Application protocol decoders.
//!
//! Each protocol follows a layered structure:
//! - `layout`: constants and wire markers (source of truth)
//! - `reader`: safe byte access and protocol conventions
//! - `parser`: domain-level decoding (no direct byte indexing)
//! - `error`: explicit, actionable errors
//! - `decoder`: the [`crate::Decoder`] registered with the classifier
//!
//! Parsers are pure and contain no I/O; sessions feed them payloads and
//! aggregate their events.

pub mod http;
