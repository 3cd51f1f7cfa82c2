//! The tree walker / worktree writer: from a root tree hash, recursively
//! materializes files, symlinks, and subdirectories under a target directory.
//!
//! Grounded on `reconstruct_repo_files` (recursive descent, `fs::create_dir` plus a
//! per-entry type dispatch), generalized to consult the prior manifest before overwriting a file
//! and to use an explicit create-then-chmod sequence instead of a default-mode create.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::error::{Error, IoContext};
use crate::manifest::{ManifestRow, RowMode};
use crate::store::ObjectStore;
use crate::tree::{commit_tree_hash, parse_tree, EntryMode};

/// Materializes the worktree rooted at the given commit hash. `prior` is the `path -> (mode,
/// hash)` lookup from the previous manifest (empty for a from-scratch clone); files whose path
/// and hash already match are left untouched. Returns the rows for the new manifest.
pub fn materialize(
    store: &ObjectStore,
    commit_hash: &crate::hash::Hash,
    target_dir: &Path,
    prior: &HashMap<&str, (RowMode, crate::hash::Hash)>,
) -> Result<Vec<ManifestRow>, Error> {
    let commit = store
        .by_hash(commit_hash)
        .ok_or_else(|| Error::MalformedCommit(format!("commit {commit_hash} not in store")))?;
    let tree_hash = commit_tree_hash(&commit.payload)?;

    fs::create_dir_all(target_dir).io_context(target_dir)?;

    let mut rows = Vec::new();
    walk_tree(store, &tree_hash, target_dir, "", prior, &mut rows)?;
    Ok(rows)
}

fn walk_tree(
    store: &ObjectStore,
    tree_hash: &crate::hash::Hash,
    dir: &Path,
    prefix: &str,
    prior: &HashMap<&str, (RowMode, crate::hash::Hash)>,
    rows: &mut Vec<ManifestRow>,
) -> Result<(), Error> {
    let tree_obj = store
        .by_hash(tree_hash)
        .ok_or_else(|| Error::MalformedTree(format!("tree {tree_hash} not in store")))?;
    let entries = parse_tree(&tree_obj.payload)?;

    for entry in entries {
        let relative_path = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{prefix}/{}", entry.name)
        };
        let path = dir.join(&entry.name);

        match entry.mode {
            EntryMode::Directory => {
                if !path.exists() {
                    fs::create_dir(&path).io_context(&path)?;
                    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
                        .io_context(&path)?;
                }
                walk_tree(store, &entry.hash, &path, &relative_path, prior, rows)?;
            }
            EntryMode::File | EntryMode::Executable => {
                let row_mode = if entry.mode == EntryMode::Executable {
                    RowMode::Executable
                } else {
                    RowMode::File
                };
                if prior.get(relative_path.as_str()) == Some(&(row_mode, entry.hash)) {
                    rows.push(ManifestRow {
                        mode: row_mode,
                        hash: entry.hash,
                        path: relative_path,
                    });
                    continue;
                }

                let blob = store.by_hash(&entry.hash).ok_or_else(|| {
                    Error::MalformedTree(format!("blob {} not in store", entry.hash))
                })?;
                write_file(&path, &blob.payload, row_mode)?;
                rows.push(ManifestRow {
                    mode: row_mode,
                    hash: entry.hash,
                    path: relative_path,
                });
            }
            EntryMode::Symlink => {
                let blob = store.by_hash(&entry.hash).ok_or_else(|| {
                    Error::MalformedTree(format!("blob {} not in store", entry.hash))
                })?;
                write_symlink(&path, &blob.payload)?;
                rows.push(ManifestRow {
                    mode: RowMode::Symlink,
                    hash: entry.hash,
                    path: relative_path,
                });
            }
            EntryMode::Gitlink => {
                // Submodules are out of scope: recorded nowhere, left untouched on disk.
            }
        }
    }

    Ok(())
}

/// Creates (or truncates) the file at `path` in two steps: an `0o600` create followed by a
/// `chmod` to the tree's recorded mode, so the file is never briefly world-readable before its
/// real permissions land.
fn write_file(path: &Path, payload: &[u8], mode: RowMode) -> Result<(), Error> {
    use std::io::Write;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .io_context(path)?;
    file.write_all(payload).io_context(path)?;

    let perm_bits = match mode {
        RowMode::Executable => 0o755,
        RowMode::File => 0o644,
        RowMode::Symlink => unreachable!("write_file never called for a symlink entry"),
    };
    fs::set_permissions(path, fs::Permissions::from_mode(perm_bits)).io_context(path)?;
    Ok(())
}

fn write_symlink(path: &Path, target_payload: &[u8]) -> Result<(), Error> {
    let target = String::from_utf8_lossy(target_payload).into_owned();
    if path.exists() || path.symlink_metadata().is_ok() {
        fs::remove_file(path).io_context(path)?;
    }
    symlink(&target, path).io_context(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha1_of;
    use crate::store::ObjectKind;
    use std::collections::HashMap as StdHashMap;
    use tempfile::tempdir;

    fn build_tree_payload(entries: &[(&str, &str, crate::hash::Hash)]) -> Vec<u8> {
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

    fn commit_payload(tree_hash: crate::hash::Hash) -> Vec<u8> {
        format!("tree {}\nauthor a <a@a> 0 +0000\n\nmsg\n", tree_hash.to_hex()).into_bytes()
    }

    #[test]
    fn single_blob_tree_writes_file_with_expected_mode() {
        let mut store = ObjectStore::new();
        let blob_hash = store.insert(ObjectKind::Blob, b"Hello\n".to_vec());
        let tree_payload = build_tree_payload(&[("100644", "hello.txt", blob_hash)]);
        let tree_hash = store.insert(ObjectKind::Tree, tree_payload);
        let commit_hash = store.insert(ObjectKind::Commit, commit_payload(tree_hash));

        let dir = tempdir().unwrap();
        let prior = StdHashMap::new();
        let rows = materialize(&store, &commit_hash, dir.path(), &prior).unwrap();

        let written = fs::read(dir.path().join("hello.txt")).unwrap();
        assert_eq!(written, b"Hello\n");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].path, "hello.txt");

        let mode = fs::metadata(dir.path().join("hello.txt"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn symlink_entry_materializes_as_symlink() {
        let mut store = ObjectStore::new();
        let blob_hash = store.insert(ObjectKind::Blob, b"hello.txt".to_vec());
        let tree_payload = build_tree_payload(&[("120000", "link", blob_hash)]);
        let tree_hash = store.insert(ObjectKind::Tree, tree_payload);
        let commit_hash = store.insert(ObjectKind::Commit, commit_payload(tree_hash));

        let dir = tempdir().unwrap();
        materialize(&store, &commit_hash, dir.path(), &StdHashMap::new()).unwrap();

        let link_target = fs::read_link(dir.path().join("link")).unwrap();
        assert_eq!(link_target, PathBuf::from("hello.txt"));
    }

    #[test]
    fn nested_directory_is_created_and_descended() {
        let mut store = ObjectStore::new();
        let blob_hash = store.insert(ObjectKind::Blob, b"x".to_vec());
        let inner_tree = build_tree_payload(&[("100644", "file.txt", blob_hash)]);
        let inner_tree_hash = store.insert(ObjectKind::Tree, inner_tree);
        let outer_tree = build_tree_payload(&[("40000", "sub", inner_tree_hash)]);
        let outer_tree_hash = store.insert(ObjectKind::Tree, outer_tree);
        let commit_hash = store.insert(ObjectKind::Commit, commit_payload(outer_tree_hash));

        let dir = tempdir().unwrap();
        let rows = materialize(&store, &commit_hash, dir.path(), &StdHashMap::new()).unwrap();

        assert!(dir.path().join("sub/file.txt").is_file());
        assert_eq!(rows[0].path, "sub/file.txt");
    }

    #[test]
    fn unchanged_file_against_prior_manifest_is_skipped() {
        let mut store = ObjectStore::new();
        let blob_hash = store.insert(ObjectKind::Blob, b"same\n".to_vec());
        let tree_payload = build_tree_payload(&[("100644", "file.txt", blob_hash)]);
        let tree_hash = store.insert(ObjectKind::Tree, tree_payload);
        let commit_hash = store.insert(ObjectKind::Commit, commit_payload(tree_hash));

        let dir = tempdir().unwrap();
        fs::write(dir.path().join("file.txt"), b"stale contents on disk").unwrap();

        let mut prior = StdHashMap::new();
        prior.insert("file.txt", (RowMode::File, blob_hash));

        materialize(&store, &commit_hash, dir.path(), &prior).unwrap();
        let on_disk = fs::read(dir.path().join("file.txt")).unwrap();
        assert_eq!(
            on_disk, b"stale contents on disk",
            "matching manifest entry should prevent a rewrite"
        );
    }

    #[test]
    fn empty_tree_produces_no_rows() {
        let mut store = ObjectStore::new();
        let tree_hash = store.insert(ObjectKind::Tree, Vec::new());
        let commit_hash = store.insert(ObjectKind::Commit, commit_payload(tree_hash));

        let dir = tempdir().unwrap();
        let rows = materialize(&store, &commit_hash, dir.path(), &StdHashMap::new()).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn blob_hash_equality_used_for_skip_decision_matches_store_identity() {
        let blob_hash = sha1_of(ObjectKind::Blob, b"Hello\n");
        let mut store = ObjectStore::new();
        let inserted = store.insert(ObjectKind::Blob, b"Hello\n".to_vec());
        assert_eq!(blob_hash, inserted);
    }
}
