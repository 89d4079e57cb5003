//! Configuration for a digest engine run

use std::fmt;
use std::io::Read;

use crate::error::{DigestError, Result};

/// Default number of digests sent per channel batch
pub const DEFAULT_BATCH_SIZE: usize = 4096;

/// Default number of batches buffered before the producer blocks
pub const DEFAULT_CHANNEL_CAPACITY: usize = 8;

/// Configuration for one digest engine run
pub struct Config {
    /// Row source, read by exactly one engine
    pub reader: Box<dyn Read + Send>,
    /// Field indices forming the composite row key (order matters)
    pub key: Vec<usize>,
    /// Field indices fingerprinted as the row value; empty means the whole row
    pub value: Vec<usize>,
    /// Field delimiter
    pub separator: u8,
    /// Keep malformed quotes literally instead of failing
    pub lazy_quotes: bool,
    /// Digests per channel batch
    pub batch_size: usize,
    /// Batches buffered before the producer blocks
    pub channel_capacity: usize,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("separator", &char::from(self.separator))
            .field("lazy_quotes", &self.lazy_quotes)
            .field("batch_size", &self.batch_size)
            .field("channel_capacity", &self.channel_capacity)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Create a new Config reading from `reader`, keyed on the first field
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            key: vec![0],
            value: Vec::new(),
            separator: b',',
            lazy_quotes: false,
            batch_size: DEFAULT_BATCH_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Set key field indices
    pub fn with_key(mut self, key: Vec<usize>) -> Self {
        self.key = key;
        self
    }

    /// Set value field indices
    pub fn with_value(mut self, value: Vec<usize>) -> Self {
        self.value = value;
        self
    }

    /// Set the field separator
    pub fn with_separator(mut self, separator: u8) -> Self {
        self.separator = separator;
        self
    }

    /// Enable lazy quote handling
    pub fn with_lazy_quotes(mut self, lazy: bool) -> Self {
        self.lazy_quotes = lazy;
        self
    }

    /// Set the number of digests per batch
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the number of in-flight batches
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Check the settings that can be checked without reading any row.
    ///
    /// Index ranges depend on the data and are checked per row by the engine.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(DigestError::invalid_config("key must name at least one field"));
        }
        if matches!(self.separator, b'"' | b'\r' | b'\n') || !self.separator.is_ascii() {
            return Err(DigestError::invalid_config(format!(
                "invalid separator: {:?}",
                char::from(self.separator)
            )));
        }
        if self.batch_size == 0 {
            return Err(DigestError::invalid_config("batch size must be positive"));
        }
        if self.channel_capacity == 0 {
            return Err(DigestError::invalid_config(
                "channel capacity must be positive",
            ));
        }
        Ok(())
    }
}
