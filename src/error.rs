//! Crate-wide error type. Every failure kind from the error handling design is a variant here;
//! the CLI front-end is the only place that turns one of these into a process exit code.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitMirrorError {
    #[error("network request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("protocol framing error: {0}")]
    ProtocolFraming(String),

    #[error("branch '{0}' not found in remote ref advertisement")]
    BranchNotFound(String),

    #[error("unsupported pack version {0} (only version 2 is supported)")]
    UnsupportedPackVersion(u32),

    #[error("invalid object type code {0} in pack entry header")]
    InvalidObjectType(u8),

    #[error("zlib inflate failed: {0}")]
    InflateFailure(String),

    #[error("inflated object size {actual} does not match declared size {expected}")]
    InflateSizeMismatch { expected: u64, actual: u64 },

    #[error("pack checksum mismatch: expected {expected}, computed {computed}")]
    PackChecksumMismatch { expected: String, computed: String },

    #[error("missing delta base for pack entry")]
    MissingDeltaBase,

    #[error("delta base size mismatch: delta expects {expected}, base has {actual}")]
    DeltaBaseMismatch { expected: u64, actual: usize },

    #[error("delta target size mismatch: expected {expected}, produced {actual}")]
    DeltaSizeMismatch { expected: u64, actual: usize },

    #[error("delta copy instruction out of range: offset {offset}, length {length}, base size {base_len}")]
    DeltaOutOfRange {
        offset: usize,
        length: usize,
        base_len: usize,
    },

    #[error("invalid delta instruction byte {0:#04x}")]
    InvalidDeltaInstruction(u8),

    #[error("delta chain forms a cycle")]
    DeltaCycle,

    #[error("malformed tree object: {0}")]
    MalformedTree(String),

    #[error("malformed commit object: {0}")]
    MalformedCommit(String),

    #[error("hash is not valid hex: {0}")]
    MalformedHash(String),

    #[error("refusing to operate on worktree containing a .git directory at {0}")]
    DotGitPresent(PathBuf),

    #[error("local file {path} does not match manifest (expected hash {expected}, found {actual})")]
    ModifiedLocalFile {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("local file missing: {0}")]
    MissingLocalFile(PathBuf),

    #[error("duplicate pack offset {0} in object store")]
    DuplicatePackOffset(u64),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration file {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

pub type Error = GitMirrorError;

/// Helper for attaching a path to an I/O error at the call site, similar in spirit to
/// `anyhow::Context` but targeted at the one piece of context I/O errors actually need.
pub trait IoContext<T> {
    fn io_context(self, path: impl Into<PathBuf>) -> Result<T, Error>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context(self, path: impl Into<PathBuf>) -> Result<T, Error> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
