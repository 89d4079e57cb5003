//! Reconciliation of a base and a delta digest stream

mod index;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::digest::{Digest, DigestStream, Engine};
use crate::error::Result;

pub use index::BaseIndex;

/// A row present only in delta
pub type Addition = Vec<String>;

/// A row present only in base
pub type Deletion = Vec<String>;

/// A row whose key matched but whose value changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    /// Base row
    pub original: Vec<String>,
    /// Delta row
    pub current: Vec<String>,
}

/// Result of reconciling base against delta
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Differences {
    /// Delta-only rows, in delta order
    pub additions: Vec<Addition>,
    /// Changed rows, in delta order
    pub modifications: Vec<Modification>,
    /// Base-only rows, in base order
    pub deletions: Vec<Deletion>,
}

/// Counts of each kind of difference
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub additions: usize,
    pub modifications: usize,
    pub deletions: usize,
}

impl Differences {
    /// Check if there are no differences at all
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.modifications.is_empty() && self.deletions.is_empty()
    }

    /// Total number of differing rows
    pub fn len(&self) -> usize {
        self.additions.len() + self.modifications.len() + self.deletions.len()
    }

    pub fn stats(&self) -> DiffStats {
        DiffStats {
            additions: self.additions.len(),
            modifications: self.modifications.len(),
            deletions: self.deletions.len(),
        }
    }
}

/// Classifies delta digests against an index of base digests
#[derive(Debug)]
pub struct Reconciler {
    index: BaseIndex,
    additions: Vec<Addition>,
    modifications: Vec<Modification>,
    unchanged: usize,
}

impl Reconciler {
    pub fn new(index: BaseIndex) -> Self {
        Self {
            index,
            additions: Vec::new(),
            modifications: Vec::new(),
            unchanged: 0,
        }
    }

    /// Classify one delta digest.
    ///
    /// A base key can be matched once; a repeated delta key after that is an
    /// addition. A matched base row gives up its fields, so only unmatched
    /// rows keep their source in memory.
    pub fn push(&mut self, delta: Digest) {
        match self.index.unmatched_mut(delta.key) {
            None => self.additions.push(delta.source),
            Some(base) => {
                base.matched = true;
                let original = std::mem::take(&mut base.digest.source);
                if base.digest.value == delta.value {
                    self.unchanged += 1;
                } else {
                    self.modifications.push(Modification {
                        original,
                        current: delta.source,
                    });
                }
            }
        }
    }

    /// Turn the remaining unmatched base rows into deletions.
    pub fn finish(self) -> Differences {
        let Reconciler {
            index,
            additions,
            modifications,
            unchanged,
        } = self;

        let deletions: Vec<Deletion> = index.into_unmatched().collect();
        let differences = Differences {
            additions,
            modifications,
            deletions,
        };

        let stats = differences.stats();
        log::info!(
            "diff complete: {} added, {} modified, {} deleted, {} unchanged",
            stats.additions,
            stats.modifications,
            stats.deletions,
            unchanged
        );
        differences
    }
}

impl Extend<Digest> for Reconciler {
    fn extend<I: IntoIterator<Item = Digest>>(&mut self, iter: I) {
        for digest in iter {
            self.push(digest);
        }
    }
}

/// Diff two datasets described by their configs.
///
/// Both engines start immediately. Base is fully indexed and its terminal
/// result checked before any delta digest is classified. Either engine's
/// error aborts the diff and is returned unchanged; no partial result is
/// produced.
pub fn diff(base: Config, delta: Config) -> Result<Differences> {
    let base_engine = Engine::new(base)?;
    let delta_engine = Engine::new(delta)?;

    let base_stream = base_engine.stream_digests()?;
    let delta_stream = match delta_engine.stream_digests() {
        Ok(stream) => stream,
        Err(e) => {
            base_stream.abandon();
            return Err(e);
        }
    };

    diff_streams(base_stream, delta_stream)
}

/// Reconcile two already running digest streams.
pub fn diff_streams(mut base: DigestStream, mut delta: DigestStream) -> Result<Differences> {
    let index: BaseIndex = base.by_ref().collect();
    if let Err(e) = base.finish() {
        log::debug!("base stream failed, abandoning delta");
        delta.abandon();
        return Err(e);
    }

    if index.duplicates() > 0 {
        log::warn!(
            "{} duplicate keys in base; the last row for each key was kept",
            index.duplicates()
        );
    }
    log::debug!("indexed {} base keys", index.len());

    let mut reconciler = Reconciler::new(index);
    reconciler.extend(delta.by_ref());
    delta.finish()?;

    Ok(reconciler.finish())
}
