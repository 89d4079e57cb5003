//! csvdigest - Streaming diff for large delimited-text datasets
//!
//! Rows are reduced to a pair of 64-bit fingerprints (key and value) while they
//! are read, and two such digest streams are reconciled into additions,
//! modifications and deletions.

pub mod config;
pub mod diff;
pub mod digest;
pub mod error;

pub use config::Config;
pub use diff::{
    diff, diff_streams, Addition, BaseIndex, Deletion, DiffStats, Differences, Modification,
    Reconciler,
};
pub use digest::{Digest, DigestStream, Engine};
pub use error::{DigestError, Result};
