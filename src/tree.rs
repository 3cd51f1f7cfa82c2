//! Tree-entry and commit parsing (the data model the tree walker drives off of).
//!
//! Grounded on `reconstruct_repo_files` and `ls_tree::list_tree`: both walk a tree
//! payload as a repeated `<mode> SP <name> NUL <20-byte-hash>` record using `read_until(0, ..)`
//! plus a fixed 20-byte hash read, and both pull a commit's tree hash off the first line of the
//! commit payload. Generalized here to parse directly out of an in-memory `&[u8]` slice rather
//! than a `BufRead` over a loose-object file, since the object store already holds the full
//! inflated payload.

use crate::error::Error;
use crate::hash::Hash;

/// One of the four entry kinds a tree record's mode can name. `Gitlink` (submodule) entries are
/// recognized but never descended into: the engine has no notion of a nested repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    Directory,
    File,
    Executable,
    Symlink,
    Gitlink,
}

impl EntryMode {
    fn from_octal_str(mode: &str) -> Result<Self, Error> {
        match mode {
            "40000" | "040000" => Ok(EntryMode::Directory),
            "100644" => Ok(EntryMode::File),
            "100755" => Ok(EntryMode::Executable),
            "120000" => Ok(EntryMode::Symlink),
            "160000" => Ok(EntryMode::Gitlink),
            other => Err(Error::MalformedTree(format!(
                "unrecognized tree entry mode '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub mode: EntryMode,
    pub name: String,
    pub hash: Hash,
}

/// Parses a `tree` object payload into its ordered list of entries. Order is preserved as
/// observed, not re-sorted: the tree-entry order is the producer's invariant, and the walker only
/// ever reads the order it is handed.
pub fn parse_tree(payload: &[u8]) -> Result<Vec<TreeEntry>, Error> {
    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < payload.len() {
        let record_end = payload[pos..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::MalformedTree("unterminated mode/name record".to_string()))?
            + pos;
        let record = std::str::from_utf8(&payload[pos..record_end])
            .map_err(|_| Error::MalformedTree("mode/name record is not valid UTF-8".to_string()))?;
        let (mode_str, name) = record.split_once(' ').ok_or_else(|| {
            Error::MalformedTree(format!("missing space separator in '{record}'"))
        })?;
        let mode = EntryMode::from_octal_str(mode_str)?;

        let hash_start = record_end + 1;
        let hash_end = hash_start + 20;
        let raw: [u8; 20] = payload
            .get(hash_start..hash_end)
            .ok_or_else(|| Error::MalformedTree("truncated entry hash".to_string()))?
            .try_into()
            .unwrap();

        entries.push(TreeEntry {
            mode,
            name: name.to_string(),
            hash: Hash::from_bytes(raw),
        });
        pos = hash_end;
    }

    Ok(entries)
}

/// Extracts the root tree hash from a `commit` object's leading `tree <40-hex>\n` line. No other
/// commit field is of interest to the core engine.
pub fn commit_tree_hash(payload: &[u8]) -> Result<Hash, Error> {
    let first_line_end = payload
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| Error::MalformedCommit("commit payload has no newline".to_string()))?;
    let first_line = std::str::from_utf8(&payload[..first_line_end])
        .map_err(|_| Error::MalformedCommit("first line is not valid UTF-8".to_string()))?;
    let hex = first_line
        .strip_prefix("tree ")
        .ok_or_else(|| Error::MalformedCommit("first line does not start with 'tree '".to_string()))?;
    Hash::from_hex(hex).map_err(|_| Error::MalformedCommit(format!("invalid tree hash '{hex}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObjectKind;

    fn build_tree_payload(entries: &[(&str, &str, Hash)]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (mode, name, hash) in entries {
            buf.extend_from_slice(mode.as_bytes());
            buf.push(b' ');
            buf.extend_from_slice(name.as_bytes());
            buf.push(0);
            buf.extend_from_slice(hash.as_bytes());
        }
        buf
    }

    fn dummy_hash(seed: u8) -> Hash {
        Hash::from_bytes([seed; 20])
    }

    #[test]
    fn parses_mixed_entry_kinds() {
        let h1 = dummy_hash(1);
        let h2 = dummy_hash(2);
        let h3 = dummy_hash(3);
        let payload = build_tree_payload(&[
            ("100644", "hello.txt", h1),
            ("40000", "subdir", h2),
            ("120000", "link", h3),
        ]);
        let entries = parse_tree(&payload).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].mode, EntryMode::File);
        assert_eq!(entries[0].name, "hello.txt");
        assert_eq!(entries[0].hash, h1);
        assert_eq!(entries[1].mode, EntryMode::Directory);
        assert_eq!(entries[1].name, "subdir");
        assert_eq!(entries[2].mode, EntryMode::Symlink);
        assert_eq!(entries[2].name, "link");
    }

    #[test]
    fn gitlink_mode_is_recognized_but_not_descended() {
        let payload = build_tree_payload(&[("160000", "submodule", dummy_hash(9))]);
        let entries = parse_tree(&payload).unwrap();
        assert_eq!(entries[0].mode, EntryMode::Gitlink);
    }

    #[test]
    fn empty_tree_payload_has_no_entries() {
        assert!(parse_tree(&[]).unwrap().is_empty());
    }

    #[test]
    fn rejects_unrecognized_mode() {
        let payload = build_tree_payload(&[("777777", "weird", dummy_hash(4))]);
        assert!(parse_tree(&payload).is_err());
    }

    #[test]
    fn rejects_truncated_hash() {
        let mut payload = build_tree_payload(&[("100644", "hello.txt", dummy_hash(1))]);
        payload.truncate(payload.len() - 5);
        assert!(parse_tree(&payload).is_err());
    }

    #[test]
    fn extracts_tree_hash_from_commit() {
        let tree_hash = dummy_hash(7);
        let payload = format!(
            "tree {}\nparent 0000000000000000000000000000000000000000\nauthor a <a@a> 0 +0000\n\nmsg\n",
            tree_hash.to_hex()
        );
        assert_eq!(commit_tree_hash(payload.as_bytes()).unwrap(), tree_hash);
    }

    #[test]
    fn rejects_commit_missing_tree_prefix() {
        let payload = b"parent 0000000000000000000000000000000000000000\n";
        assert!(commit_tree_hash(payload).is_err());
    }

    #[test]
    fn object_kind_name_matches_tree_type_string() {
        assert_eq!(ObjectKind::Tree.name(), "tree");
    }
}
