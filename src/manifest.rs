//! The manifest: the on-disk record of what was last materialized, plus the local
//! scanner that recovers that same shape by walking the worktree directly.
//!
//! Grounded on the indexed-store load/persist shape in
//! `other_examples/a5d9823b_cwbriones-rgit__src-packfile-mod.rs.rs` (a flat record format with a
//! header line and sorted body rows), generalized to the mode/hash/path row format and the
//! tip-commit header line this crate's incremental sync needs.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::error::{Error, IoContext};
use crate::hash::{sha1_of, Hash};
use crate::store::ObjectKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowMode {
    File,
    Executable,
    Symlink,
}

impl RowMode {
    fn to_octal_str(self) -> &'static str {
        match self {
            RowMode::File => "100644",
            RowMode::Executable => "100755",
            RowMode::Symlink => "120000",
        }
    }

    fn from_octal_str(s: &str) -> Result<Self, Error> {
        match s {
            "100644" => Ok(RowMode::File),
            "100755" => Ok(RowMode::Executable),
            "120000" => Ok(RowMode::Symlink),
            other => Err(Error::MalformedTree(format!(
                "unrecognized manifest row mode '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManifestRow {
    pub mode: RowMode,
    pub hash: Hash,
    pub path: String,
}

/// A loaded or freshly scanned manifest: the tip commit it was taken at (absent for a from-scratch
/// local scan, which has no notion of a remote tip) plus its rows.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub tip: Option<Hash>,
    pub rows: Vec<ManifestRow>,
}

impl Manifest {
    /// Builds the `path -> (mode, hash)` lookup the tree walker consults before overwriting a
    /// file, and the scanner's divergence check consults before reporting a mismatch.
    pub fn by_path(&self) -> HashMap<&str, (RowMode, Hash)> {
        self.rows
            .iter()
            .map(|row| (row.path.as_str(), (row.mode, row.hash)))
            .collect()
    }
}

fn manifest_path(work_dir: &Path, section_name: &str) -> PathBuf {
    work_dir.join(section_name)
}

/// Loads the live manifest file, if present. A missing file means "no manifest" (full clone),
/// not an error.
pub fn load(work_dir: &Path, section_name: &str) -> Result<Option<Manifest>, Error> {
    let path = manifest_path(work_dir, section_name);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).io_context(path),
    };
    parse(&raw).map(Some)
}

fn parse(raw: &str) -> Result<Manifest, Error> {
    let mut lines = raw.lines();
    let tip_line = lines.next().unwrap_or("");
    let tip = if tip_line.is_empty() {
        None
    } else {
        Some(Hash::from_hex(tip_line)?)
    };

    let mut rows = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(3, '\t');
        let mode_str = parts
            .next()
            .ok_or_else(|| Error::Config(format!("malformed manifest row '{line}'")))?;
        let hash_str = parts
            .next()
            .ok_or_else(|| Error::Config(format!("malformed manifest row '{line}'")))?;
        let path = parts
            .next()
            .ok_or_else(|| Error::Config(format!("malformed manifest row '{line}'")))?;
        rows.push(ManifestRow {
            mode: RowMode::from_octal_str(mode_str)?,
            hash: Hash::from_hex(hash_str)?,
            path: path.to_string(),
        });
    }
    Ok(Manifest { tip, rows })
}

/// Serializes and atomically persists the manifest: write the `.new` staging file, then rename
/// over the live file, so a crash mid-write never leaves a half-written manifest in place.
pub fn save(work_dir: &Path, section_name: &str, manifest: &Manifest) -> Result<(), Error> {
    let live_path = manifest_path(work_dir, section_name);
    let staging_path = {
        let mut p = live_path.clone();
        let mut name = p.file_name().unwrap().to_os_string();
        name.push(".new");
        p.set_file_name(name);
        p
    };

    let mut sorted_rows = manifest.rows.clone();
    sorted_rows.sort_by(|a, b| a.path.cmp(&b.path));

    let mut out = String::new();
    out.push_str(&manifest.tip.map(|h| h.to_hex()).unwrap_or_default());
    out.push('\n');
    for row in &sorted_rows {
        out.push_str(row.mode.to_octal_str());
        out.push('\t');
        out.push_str(&row.hash.to_hex());
        out.push('\t');
        out.push_str(&row.path);
        out.push('\n');
    }

    let mut file = fs::File::create(&staging_path).io_context(&staging_path)?;
    file.write_all(out.as_bytes())
        .io_context(&staging_path)?;
    file.sync_all().io_context(&staging_path)?;
    fs::rename(&staging_path, &live_path).io_context(&live_path)?;
    Ok(())
}

/// Walks `target_dir`, computing the identity of every tracked file and symlink the way the
/// worktree writer would have recorded it, so a `pull` or `verify` run can compare the working
/// tree against the last known manifest without trusting the manifest's own bookkeeping.
///
/// Aborts with `DotGitPresent` if any `.git` directory is found anywhere under `target_dir`.
pub fn scan_worktree(target_dir: &Path) -> Result<Manifest, Error> {
    let mut rows = Vec::new();
    scan_dir(target_dir, target_dir, &mut rows)?;
    Ok(Manifest { tip: None, rows })
}

fn scan_dir(root: &Path, dir: &Path, rows: &mut Vec<ManifestRow>) -> Result<(), Error> {
    let entries = fs::read_dir(dir).io_context(dir)?;
    for entry in entries {
        let entry = entry.io_context(dir)?;
        let path = entry.path();
        let file_name = entry.file_name();
        if file_name == ".git" {
            return Err(Error::DotGitPresent(path));
        }

        let metadata = fs::symlink_metadata(&path).io_context(&path)?;
        let relative = path
            .strip_prefix(root)
            .expect("walked path is always under root")
            .to_string_lossy()
            .into_owned();

        if metadata.file_type().is_symlink() {
            let target = fs::read_link(&path).io_context(&path)?;
            let hash = sha1_of(ObjectKind::Blob, target.to_string_lossy().as_bytes());
            rows.push(ManifestRow {
                mode: RowMode::Symlink,
                hash,
                path: relative,
            });
        } else if metadata.is_dir() {
            scan_dir(root, &path, rows)?;
        } else {
            let contents = fs::read(&path).io_context(&path)?;
            let hash = sha1_of(ObjectKind::Blob, &contents);
            let mode = if metadata.permissions().mode() & 0o111 != 0 {
                RowMode::Executable
            } else {
                RowMode::File
            };
            rows.push(ManifestRow {
                mode,
                hash,
                path: relative,
            });
        }
    }
    Ok(())
}

/// Compares a freshly scanned worktree against the previously persisted manifest. Returns the
/// list of divergent paths: present in the manifest but missing, mismatched in hash, or not
/// tracked at all on disk.
pub fn diverging_paths(expected: &Manifest, observed: &Manifest) -> Vec<Error> {
    let observed_by_path = observed.by_path();
    let mut errors = Vec::new();
    for row in &expected.rows {
        match observed_by_path.get(row.path.as_str()) {
            None => errors.push(Error::MissingLocalFile(PathBuf::from(&row.path))),
            Some((_, hash)) if *hash != row.hash => errors.push(Error::ModifiedLocalFile {
                path: PathBuf::from(&row.path),
                expected: row.hash.to_hex(),
                actual: hash.to_hex(),
            }),
            Some(_) => {}
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_manifest() -> Manifest {
        Manifest {
            tip: Some(Hash::from_bytes([0xAB; 20])),
            rows: vec![
                ManifestRow {
                    mode: RowMode::File,
                    hash: Hash::from_bytes([1; 20]),
                    path: "b.txt".to_string(),
                },
                ManifestRow {
                    mode: RowMode::Executable,
                    hash: Hash::from_bytes([2; 20]),
                    path: "a.sh".to_string(),
                },
            ],
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let manifest = sample_manifest();
        save(dir.path(), "manifest", &manifest).unwrap();
        let loaded = load(dir.path(), "manifest").unwrap().unwrap();
        assert_eq!(loaded.tip, manifest.tip);
        assert_eq!(loaded.rows.len(), 2);
    }

    #[test]
    fn save_writes_rows_sorted_by_path() {
        let dir = tempdir().unwrap();
        save(dir.path(), "manifest", &sample_manifest()).unwrap();
        let raw = fs::read_to_string(dir.path().join("manifest")).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert!(lines[1].ends_with("a.sh"));
        assert!(lines[2].ends_with("b.txt"));
    }

    #[test]
    fn missing_manifest_file_is_none_not_error() {
        let dir = tempdir().unwrap();
        assert!(load(dir.path(), "manifest").unwrap().is_none());
    }

    #[test]
    fn scan_detects_dot_git_directory() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        let err = scan_worktree(dir.path()).unwrap_err();
        assert!(matches!(err, Error::DotGitPresent(_)));
    }

    #[test]
    fn scan_hashes_match_blob_identity() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("hello.txt"), b"Hello\n").unwrap();
        let manifest = scan_worktree(dir.path()).unwrap();
        assert_eq!(manifest.rows.len(), 1);
        assert_eq!(manifest.rows[0].hash, sha1_of(ObjectKind::Blob, b"Hello\n"));
        assert_eq!(manifest.rows[0].path, "hello.txt");
    }

    #[test]
    fn scan_descends_into_subdirectories() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/file.txt"), b"x").unwrap();
        let manifest = scan_worktree(dir.path()).unwrap();
        assert_eq!(manifest.rows[0].path, "sub/file.txt");
    }

    #[test]
    fn diverging_paths_reports_missing_and_modified() {
        let expected = sample_manifest();
        let observed = Manifest {
            tip: None,
            rows: vec![ManifestRow {
                mode: RowMode::File,
                hash: Hash::from_bytes([0xFF; 20]),
                path: "b.txt".to_string(),
            }],
        };
        let errors = diverging_paths(&expected, &observed);
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .any(|e| matches!(e, Error::MissingLocalFile(p) if p == Path::new("a.sh"))));
        assert!(errors
            .iter()
            .any(|e| matches!(e, Error::ModifiedLocalFile { path, .. } if path == Path::new("b.txt"))));
    }

    #[test]
    fn diverging_paths_empty_when_matching() {
        let manifest = sample_manifest();
        let observed = Manifest {
            tip: None,
            rows: manifest.rows.clone(),
        };
        assert!(diverging_paths(&manifest, &observed).is_empty());
    }
}
