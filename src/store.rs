//! In-memory object store: a growing vector of decoded objects indexed by hash and by pack
//! offset, the way the pack reader and delta resolver (and later the tree walker) need to look
//! them up.

use std::collections::HashMap;
use std::fmt;

use crate::error::Error;
use crate::hash::{sha1_of, Hash};

/// The four persistent object kinds, plus the two transient delta encodings that only ever
/// appear mid-resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    pub fn name(&self) -> &'static str {
        match self {
            ObjectKind::Commit => "commit",
            ObjectKind::Tree => "tree",
            ObjectKind::Blob => "blob",
            ObjectKind::Tag => "tag",
        }
    }

    pub fn from_type_code(code: u8) -> Result<PackEntryKind, Error> {
        match code {
            1 => Ok(PackEntryKind::Concrete(ObjectKind::Commit)),
            2 => Ok(PackEntryKind::Concrete(ObjectKind::Tree)),
            3 => Ok(PackEntryKind::Concrete(ObjectKind::Blob)),
            4 => Ok(PackEntryKind::Concrete(ObjectKind::Tag)),
            6 => Ok(PackEntryKind::OfsDelta),
            7 => Ok(PackEntryKind::RefDelta),
            other => Err(Error::InvalidObjectType(other)),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What a pack entry's type byte decoded to: either one of the four concrete kinds, or one of
/// the two transient delta encodings. Keeping this distinct from `ObjectKind` means the tree
/// walker, which only ever calls `ObjectStore::by_hash`, statically cannot observe a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackEntryKind {
    Concrete(ObjectKind),
    OfsDelta,
    RefDelta,
}

/// A fully decoded, content-addressed object living in the store.
#[derive(Debug, Clone)]
pub struct Object {
    pub kind: ObjectKind,
    pub hash: Hash,
    pub payload: Vec<u8>,
}

/// A delta entry awaiting resolution: its base is identified either by a backward pack offset
/// (`ofs_delta`) or by content hash (`ref_delta`); `pack_offset` locates the delta's own entry so
/// later deltas can chain off it before it is resolved.
#[derive(Debug, Clone)]
pub struct PendingDelta {
    pub pack_offset: u64,
    pub base: DeltaBase,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub enum DeltaBase {
    Offset(u64),
    Hash(Hash),
}

/// The object store: insertion-ordered storage plus two lookup indexes. Insertion is idempotent
/// on hash so a thin-pack base recovered from the local filesystem never produces a duplicate.
#[derive(Default)]
pub struct ObjectStore {
    objects: Vec<Object>,
    by_hash: HashMap<Hash, usize>,
    by_pack_offset: HashMap<u64, usize>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a concrete object, computing its hash. Returns the hash. Re-inserting an object
    /// whose payload hashes to an already-present hash is a no-op and returns the existing hash.
    pub fn insert(&mut self, kind: ObjectKind, payload: Vec<u8>) -> Hash {
        let hash = sha1_of(kind, &payload);
        if self.by_hash.contains_key(&hash) {
            return hash;
        }
        let index = self.objects.len();
        self.objects.push(Object {
            kind,
            hash,
            payload,
        });
        self.by_hash.insert(hash, index);
        hash
    }

    /// Records that the object at `index` (already pushed via `insert`) also occupied
    /// `pack_offset` in the pack stream, so `ofs_delta` entries can resolve against it later.
    pub fn record_pack_offset(&mut self, hash: Hash, pack_offset: u64) -> Result<(), Error> {
        let index = *self
            .by_hash
            .get(&hash)
            .expect("record_pack_offset called for an object not yet inserted");
        if self.by_pack_offset.insert(pack_offset, index).is_some() {
            return Err(Error::DuplicatePackOffset(pack_offset));
        }
        Ok(())
    }

    pub fn by_hash(&self, hash: &Hash) -> Option<&Object> {
        self.by_hash.get(hash).map(|&i| &self.objects[i])
    }

    pub fn by_pack_offset(&self, offset: u64) -> Option<&Object> {
        self.by_pack_offset.get(&offset).map(|&i| &self.objects[i])
    }

    pub fn contains_hash(&self, hash: &Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter_in_insertion_order(&self) -> impl Iterator<Item = &Object> {
        self.objects.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_computes_hash_and_is_idempotent() {
        let mut store = ObjectStore::new();
        let h1 = store.insert(ObjectKind::Blob, b"hello".to_vec());
        assert_eq!(store.len(), 1);
        let h2 = store.insert(ObjectKind::Blob, b"hello".to_vec());
        assert_eq!(h1, h2);
        assert_eq!(store.len(), 1, "re-inserting an identical object is a no-op");
    }

    #[test]
    fn by_hash_and_by_pack_offset_agree() {
        let mut store = ObjectStore::new();
        let hash = store.insert(ObjectKind::Blob, b"content".to_vec());
        store.record_pack_offset(hash, 42).unwrap();
        assert_eq!(store.by_hash(&hash).unwrap().payload, b"content");
        assert_eq!(store.by_pack_offset(42).unwrap().hash, hash);
    }

    #[test]
    fn duplicate_pack_offset_is_rejected() {
        let mut store = ObjectStore::new();
        let h1 = store.insert(ObjectKind::Blob, b"a".to_vec());
        let h2 = store.insert(ObjectKind::Blob, b"b".to_vec());
        store.record_pack_offset(h1, 10).unwrap();
        let err = store.record_pack_offset(h2, 10).unwrap_err();
        assert!(matches!(err, Error::DuplicatePackOffset(10)));
    }

    #[test]
    fn type_code_decoding() {
        assert!(matches!(
            ObjectKind::from_type_code(1).unwrap(),
            PackEntryKind::Concrete(ObjectKind::Commit)
        ));
        assert!(matches!(
            ObjectKind::from_type_code(6).unwrap(),
            PackEntryKind::OfsDelta
        ));
        assert!(ObjectKind::from_type_code(0).is_err());
        assert!(ObjectKind::from_type_code(5).is_err());
    }
}
