//! Chunked transfer-encoding decoding.
//!
//! Wired into both of the session's request functions (`discover_tip`/`fetch_pack` in
//! `src/session.rs`) as the first step applied to every response body, ahead of ref-advertisement
//! parsing and side-band demux respectively: a response body's chunk framing is transport framing
//! same as the pkt-line layer on top of it, and SPEC_FULL.md keeps both inside the core engine
//! rather than as an excluded HTTP-client concern. `reqwest` already de-chunks most bodies it
//! returns, so `decode_chunked_body` first checks whether the body actually looks like a chunked
//! stream (`looks_chunked`) and passes already-decoded bytes through unchanged; a response handed
//! back still in raw `Transfer-Encoding: chunked` form - or a raw body in tests - is decoded for
//! real, including one where a chunk boundary splits a protocol frame arbitrarily.

use crate::error::Error;

/// Decodes a full HTTP/1.1 message (headers + possibly-chunked body) down to the concatenated
/// body bytes. If no `\r\n\r\n` header/body boundary is found, the whole input is assumed to
/// already be a body (no headers prefix).
pub fn decode_http_message(raw: &[u8]) -> Result<Vec<u8>, Error> {
    let body = match find_subslice(raw, b"\r\n\r\n") {
        Some(idx) => &raw[idx + 4..],
        None => raw,
    };
    decode_chunked_body(body)
}

/// Decodes a chunked body: repeated `<hex-size>\r\n<size bytes>\r\n` until a zero-size
/// terminator chunk. Buffers and only advances once a complete chunk-size line is visible, so a
/// truncated read (chunk boundary mid-frame) simply yields what has been decoded so far rather
/// than erroring - callers append more bytes and call again, or stop once they have everything.
/// If `body` doesn't start with a valid chunk-size line, it is assumed to already be a decoded
/// body (the common case when the HTTP client handled `Transfer-Encoding` itself) and is returned
/// unchanged.
pub fn decode_chunked_body(body: &[u8]) -> Result<Vec<u8>, Error> {
    if !looks_chunked(body) {
        return Ok(body.to_vec());
    }

    let mut out = Vec::with_capacity(body.len());
    let mut pos = 0usize;

    loop {
        let line_end = match find_subslice(&body[pos..], b"\r\n") {
            Some(idx) => pos + idx,
            None => break, // incomplete chunk-size line; nothing more to decode yet
        };
        let size_line = std::str::from_utf8(&body[pos..line_end])
            .map_err(|_| Error::ProtocolFraming("chunk size line is not UTF-8".to_string()))?;
        // A chunk-size line may carry `;extension` metadata; only the hex size matters.
        let size_str = size_line.split(';').next().unwrap_or(size_line).trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| Error::ProtocolFraming(format!("invalid chunk size '{size_str}'")))?;

        let chunk_start = line_end + 2;
        if size == 0 {
            break; // terminator chunk; trailing headers (if any) are not needed here
        }
        let chunk_end = chunk_start + size;
        if chunk_end + 2 > body.len() {
            break; // chunk body not fully buffered yet
        }
        out.extend_from_slice(&body[chunk_start..chunk_end]);
        pos = chunk_end + 2; // skip the chunk's trailing \r\n
    }

    Ok(out)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Heuristically detects whether `body` begins with a real chunk-size line: hex digits, an
/// optional `;extension`, then `\r\n`. Lets `decode_chunked_body` double as a safety net for a
/// `Transport` that hands back a still-chunked body while passing through bytes a client already
/// de-chunked (neither a pkt-line length prefix nor the `PACK` magic parses as one: a pkt-line's
/// 4 hex digits are directly followed by non-CRLF payload bytes, and `PACK`'s leading `P` isn't a
/// hex digit).
fn looks_chunked(body: &[u8]) -> bool {
    let Some(line_end) = find_subslice(body, b"\r\n") else {
        return false;
    };
    if line_end == 0 {
        return false;
    }
    let Ok(line) = std::str::from_utf8(&body[..line_end]) else {
        return false;
    };
    let size_str = line.split(';').next().unwrap_or(line).trim();
    !size_str.is_empty() && size_str.chars().all(|c| c.is_ascii_hexdigit())
}
