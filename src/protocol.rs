//! Discovery response parsing and fetch request body construction (the protocol-v2 wire shapes
//! a session needs), kept apart from the orchestrator so each can be unit tested against
//! hand-built bytes instead of a live remote.
//!
//! Grounded on `get_pack_data`: the `# service=...` preamble check, the `HEAD`
//! capability-line scan, and the `want ...\ndone\n` body construction, generalized from a fixed
//! `HEAD`-only clone to an arbitrary `refs/heads/<branch>` lookup plus the extra capability
//! lines the pull and verify flows need.

use crate::error::Error;
use crate::hash::Hash;
use crate::transport::pktline::encode_pkt_line;

/// What discovery recovered from the ref advertisement: the branch's tip commit and the agent
/// string the remote announced (used only for logging; no behavior depends on its value).
#[derive(Debug, Clone)]
pub struct Discovery {
    pub tip: Hash,
    pub agent: Option<String>,
}

/// Parses an `info/refs?service=git-upload-pack` response body, locating the 40-hex hash that
/// immediately precedes ` refs/heads/<branch>\n` and the `agent=<string>` capability, if present.
/// NUL bytes (the ref/capability separator on the first advertised ref) are treated as line breaks
/// for the purposes of this scan, matching the wire format's use of NUL in that one position.
pub fn parse_ref_advertisement(body: &[u8], branch: &str) -> Result<Discovery, Error> {
    let normalized: Vec<u8> = body.iter().map(|&b| if b == 0 { b'\n' } else { b }).collect();
    let text = String::from_utf8_lossy(&normalized);

    let needle = format!(" refs/heads/{branch}\n");
    let ref_pos = text
        .find(&needle)
        .ok_or_else(|| Error::BranchNotFound(branch.to_string()))?;
    if ref_pos < 40 {
        return Err(Error::ProtocolFraming(
            "ref advertisement truncated before tip hash".to_string(),
        ));
    }
    let hex = &text[ref_pos - 40..ref_pos];
    let tip = Hash::from_hex(hex)
        .map_err(|_| Error::ProtocolFraming(format!("malformed tip hash '{hex}'")))?;

    let agent = text.find("agent=").map(|start| {
        let rest = &text[start + "agent=".len()..];
        let end = rest.find(['\n', '\0']).unwrap_or(rest.len());
        rest[..end].to_string()
    });

    Ok(Discovery { tip, agent })
}

/// The capability set a `fetch` request line carries, one shape per session verb.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub want: Hash,
    pub have: Option<Hash>,
    pub shallow: Vec<Hash>,
    pub deepen: bool,
    pub thin_pack: bool,
}

impl FetchOptions {
    /// The clone shape: a single `want <tip>`, `shallow <tip>`, no `have`, no thin-pack.
    pub fn for_clone(tip: Hash) -> Self {
        FetchOptions {
            want: tip,
            have: None,
            shallow: vec![tip],
            deepen: false,
            thin_pack: false,
        }
    }

    /// The incremental pull shape: `want <new>`, `have <old>`, both tips marked `shallow`, plus
    /// `deepen 1` and `thin-pack` so the remote may omit bases already implied by `have`.
    pub fn for_pull(old_tip: Hash, new_tip: Hash) -> Self {
        FetchOptions {
            want: new_tip,
            have: Some(old_tip),
            shallow: vec![old_tip, new_tip],
            deepen: true,
            thin_pack: true,
        }
    }
}

/// Builds the protocol-v2 `fetch` request body as a sequence of pkt-lines: `command=fetch`,
/// an `agent=` line, a delimiter, capability option lines, `shallow`/`deepen` lines, `want`/`have`
/// lines, then `done` and a flush.
pub fn build_fetch_request(opts: &FetchOptions) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(encode_pkt_line(b"command=fetch\n"));
    out.extend(encode_pkt_line(b"agent=gitmirror/1\n"));
    out.extend_from_slice(b"0001"); // delimiter

    out.extend(encode_pkt_line(b"no-progress\n"));
    out.extend(encode_pkt_line(b"ofs-delta\n"));
    if opts.thin_pack {
        out.extend(encode_pkt_line(b"thin-pack\n"));
    }
    for hash in &opts.shallow {
        out.extend(encode_pkt_line(format!("shallow {}\n", hash.to_hex()).as_bytes()));
    }
    if opts.deepen {
        out.extend(encode_pkt_line(b"deepen 1\n"));
    }
    out.extend(encode_pkt_line(format!("want {}\n", opts.want.to_hex()).as_bytes()));
    if let Some(have) = opts.have {
        out.extend(encode_pkt_line(format!("have {}\n", have.to_hex()).as_bytes()));
    }
    out.extend(encode_pkt_line(b"done\n"));
    out.extend_from_slice(b"0000");
    out
}
