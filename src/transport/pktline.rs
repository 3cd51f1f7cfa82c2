//! Pkt-line framing and side-band-64k demultiplexing.
//!
//! Grounded on the pkt-line reader in
//! `other_examples/526cfeff_abusch-codecrafters-git-rust__src-clone.rs.rs` (`read_pkt_line`,
//! `PktLine`), generalized to also demultiplex side-band streams the way a fetch path
//! typically does inline.

use bytes::Buf;

use crate::error::Error;

/// One decoded pkt-line: either a length-prefixed payload, or one of the three marker lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    Flush,     // 0000
    Delimiter, // 0001
    ResponseEnd, // 0002 (protocol v2)
    Data(Vec<u8>),
}

impl PktLine {
    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            PktLine::Data(d) => Some(d),
            _ => None,
        }
    }
}

/// Reads one pkt-line from the front of `buf`, advancing past it. `buf` must contain at least a
/// full 4-hex-digit length prefix.
pub fn read_pkt_line(buf: &mut impl Buf) -> Result<PktLine, Error> {
    if buf.remaining() < 4 {
        return Err(Error::ProtocolFraming(
            "truncated pkt-line length prefix".to_string(),
        ));
    }
    let mut len_bytes = [0u8; 4];
    buf.copy_to_slice(&mut len_bytes);
    let len_str = std::str::from_utf8(&len_bytes)
        .map_err(|_| Error::ProtocolFraming("pkt-line length is not ASCII hex".to_string()))?;
    let len = u16::from_str_radix(len_str, 16)
        .map_err(|_| Error::ProtocolFraming(format!("invalid pkt-line length '{len_str}'")))?
        as usize;

    match len {
        0 => Ok(PktLine::Flush),
        1 => Ok(PktLine::Delimiter),
        2 => Ok(PktLine::ResponseEnd),
        n if n < 4 => Err(Error::ProtocolFraming(format!(
            "pkt-line length {n} is smaller than the 4-byte header"
        ))),
        n => {
            let payload_len = n - 4;
            if buf.remaining() < payload_len {
                return Err(Error::ProtocolFraming(
                    "pkt-line payload shorter than declared length".to_string(),
                ));
            }
            let mut payload = vec![0u8; payload_len];
            buf.copy_to_slice(&mut payload);
            Ok(PktLine::Data(payload))
        }
    }
}

/// Encodes a pkt-line data payload as `<4-hex-len><payload>`.
pub fn encode_pkt_line(payload: &[u8]) -> Vec<u8> {
    let mut out = format!("{:04x}", payload.len() + 4).into_bytes();
    out.extend_from_slice(payload);
    out
}

pub const FLUSH_PKT: &[u8] = b"0000";
pub const DELIM_PKT: &[u8] = b"0001";

/// The result of demultiplexing a side-band-64k pkt-line stream: the concatenated pack bytes,
/// plus the capability/ack lines observed before the pack data began.
#[derive(Debug, Default)]
pub struct SideBandOutput {
    pub pack_bytes: Vec<u8>,
    pub preamble_lines: Vec<Vec<u8>>,
    pub progress: Vec<String>,
}

/// Demultiplexes a side-band-64k pkt-line stream. Every non-marker pkt-line whose first payload
/// byte is `0x01` contributes to the pack byte stream; `0x02` is progress text (collected, not
/// surfaced as an error); `0x03` is an error band and aborts decoding immediately. Pkt-lines with
/// no side-band prefix byte (no multiplexing in effect) are treated as ordinary protocol lines
/// and collected as a preamble (ACK/NAK lines, capability announcements, etc.) until a pkt-line
/// beginning with byte `0x01`..`0x03` switches the decoder into side-band mode.
pub fn decode_pktlines(mut buf: impl Buf) -> Result<SideBandOutput, Error> {
    let mut out = SideBandOutput::default();
    loop {
        if buf.remaining() == 0 {
            break;
        }
        match read_pkt_line(&mut buf)? {
            PktLine::Flush | PktLine::Delimiter | PktLine::ResponseEnd => continue,
            PktLine::Data(data) => {
                if data.is_empty() {
                    continue;
                }
                match data[0] {
                    1 => out.pack_bytes.extend_from_slice(&data[1..]),
                    2 => out
                        .progress
                        .push(String::from_utf8_lossy(&data[1..]).into_owned()),
                    3 => {
                        return Err(Error::ProtocolFraming(format!(
                            "remote reported error: {}",
                            String::from_utf8_lossy(&data[1..])
                        )))
                    }
                    _ => out.preamble_lines.push(data),
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn encode_decode_roundtrip() {
        let encoded = encode_pkt_line(b"want deadbeef\n");
        let mut buf = Bytes::from(encoded);
        let pkt = read_pkt_line(&mut buf).unwrap();
        assert_eq!(pkt.as_data().unwrap(), b"want deadbeef\n");
    }

    #[test]
    fn flush_and_delimiter() {
        let mut buf = Bytes::from_static(b"0000");
        assert_eq!(read_pkt_line(&mut buf).unwrap(), PktLine::Flush);
        let mut buf = Bytes::from_static(b"0001");
        assert_eq!(read_pkt_line(&mut buf).unwrap(), PktLine::Delimiter);
    }

    #[test]
    fn side_band_demux_collects_pack_and_progress() {
        let mut raw = Vec::new();
        raw.extend(encode_pkt_line(b"\x01PACKDATA"));
        raw.extend(encode_pkt_line(b"\x02still working"));
        raw.extend(FLUSH_PKT);
        let out = decode_pktlines(Bytes::from(raw)).unwrap();
        assert_eq!(out.pack_bytes, b"PACKDATA");
        assert_eq!(out.progress, vec!["still working".to_string()]);
    }

    #[test]
    fn side_band_error_is_surfaced() {
        let mut raw = Vec::new();
        raw.extend(encode_pkt_line(b"\x03fatal: repository not found"));
        let err = decode_pktlines(Bytes::from(raw)).unwrap_err();
        assert!(matches!(err, Error::ProtocolFraming(_)));
    }

    #[test]
    fn truncated_length_prefix_errors() {
        let mut buf = Bytes::from_static(b"00");
        assert!(read_pkt_line(&mut buf).is_err());
    }
}
