//! Transport framing: decoding an HTTP response body into the pack bytes the reader understands.
//!
//! The TLS socket itself is assumed away (a real HTTP client adapter handles that); this
//! module only concerns itself with the two wire-level decodes layered on top of the response
//! body: chunked transfer-encoding, and pkt-line framing with optional side-band demultiplexing.

pub mod chunked;
pub mod client;
pub mod pktline;

pub use client::{HttpRequest, HttpResponse, Transport};
pub use pktline::{decode_pktlines, PktLine, SideBandOutput};
