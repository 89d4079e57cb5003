//! Key fingerprint index over the base dataset

use indexmap::map::Entry;
use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

use crate::digest::Digest;

/// A base digest waiting for its delta counterpart
#[derive(Debug)]
pub(crate) struct BaseEntry {
    pub(crate) digest: Digest,
    pub(crate) matched: bool,
}

/// Base digests keyed by key fingerprint, in insertion order.
///
/// Duplicate keys resolve last-write-wins: the later digest replaces the
/// earlier one but keeps the slot where the key was first inserted.
#[derive(Debug, Default)]
pub struct BaseIndex {
    entries: IndexMap<u64, BaseEntry, FxBuildHasher>,
    duplicates: usize,
}

impl BaseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a base digest. Returns the digest it replaced, if any.
    pub fn insert(&mut self, digest: Digest) -> Option<Digest> {
        match self.entries.entry(digest.key) {
            Entry::Occupied(mut slot) => {
                self.duplicates += 1;
                log::debug!(
                    "duplicate base key {:016x}: {:?} replaces {:?}",
                    digest.key,
                    digest.source,
                    slot.get().digest.source
                );
                let previous = std::mem::replace(&mut slot.get_mut().digest, digest);
                Some(previous)
            }
            Entry::Vacant(slot) => {
                slot.insert(BaseEntry {
                    digest,
                    matched: false,
                });
                None
            }
        }
    }

    /// Look up a base digest by key fingerprint. Rows already matched by the
    /// reconciler have an empty `source`.
    pub fn get(&self, key: u64) -> Option<&Digest> {
        self.entries.get(&key).map(|e| &e.digest)
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of inserts that replaced an existing key
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Unmatched entry for `key`, if the key is known and not yet matched
    pub(crate) fn unmatched_mut(&mut self, key: u64) -> Option<&mut BaseEntry> {
        self.entries.get_mut(&key).filter(|e| !e.matched)
    }

    /// Sources of the entries never matched, in insertion order
    pub(crate) fn into_unmatched(self) -> impl Iterator<Item = Vec<String>> {
        self.entries
            .into_values()
            .filter(|e| !e.matched)
            .map(|e| e.digest.source)
    }
}

impl Extend<Digest> for BaseIndex {
    fn extend<I: IntoIterator<Item = Digest>>(&mut self, iter: I) {
        for digest in iter {
            self.insert(digest);
        }
    }
}

impl FromIterator<Digest> for BaseIndex {
    fn from_iter<I: IntoIterator<Item = Digest>>(iter: I) -> Self {
        let mut index = Self::new();
        index.extend(iter);
        index
    }
}
