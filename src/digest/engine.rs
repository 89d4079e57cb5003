//! Streaming digest engine
//!
//! A producer thread reads the row source, validates and hashes each record
//! and hands batches of [`Digest`] values to the consumer through a bounded
//! channel. The producer's return value is the terminal signal, observed once
//! through [`DigestStream::finish`].

use std::any::Any;
use std::io::{Chain, Cursor, Read};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use csv::{Position, StringRecord};
use rayon::prelude::*;

use crate::config::Config;
use crate::error::{DigestError, Result};

use super::lazy::LazyReader;
use super::positions::Positions;
use super::quotes::{self, QuoteGuard, Tap};
use super::{fingerprint, Digest};

/// Digest engine for one row source
#[derive(Debug)]
pub struct Engine {
    config: Config,
    hasher: RowHasher,
}

/// Key/value selection shared by the hashing workers
#[derive(Debug)]
struct RowHasher {
    key: Positions,
    value: Positions,
    separator: u8,
    /// Minimum field count every record needs
    min_fields: usize,
}

impl Engine {
    /// Create an engine, rejecting configurations that can never work
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let key = Positions::new(config.key.clone());
        let value = Positions::new(config.value.clone());
        let min_fields = key.max().max(value.max()).map_or(0, |i| i + 1);
        let hasher = RowHasher {
            key,
            value,
            separator: config.separator,
            min_fields,
        };

        Ok(Self { config, hasher })
    }

    /// Start reading the source on a background thread.
    ///
    /// Digests arrive in source order. Call [`DigestStream::finish`] to get
    /// the terminal result, or [`DigestStream::abandon`] to stop early.
    pub fn stream_digests(self) -> Result<DigestStream> {
        let (sender, receiver) = mpsc::sync_channel(self.config.channel_capacity);

        let producer = thread::Builder::new()
            .name("digest-engine".to_string())
            .spawn(move || self.run(sender))
            .map_err(|e| DigestError::producer(format!("failed to spawn producer: {}", e)))?;

        Ok(DigestStream {
            receiver,
            current: Vec::new().into_iter(),
            producer,
        })
    }

    fn run(self, sender: SyncSender<Vec<Digest>>) -> Result<()> {
        let Engine { config, hasher } = self;

        // Field counts are checked by `Records` when quotes are lazy, since
        // lazy splitting can change a record's width.
        let mut builder = csv::ReaderBuilder::new();
        builder
            .has_headers(false)
            .flexible(config.lazy_quotes)
            .delimiter(config.separator);

        let (tap, guard) = quotes::tap(config.reader, config.separator);
        let records = Records {
            csv: Some(builder.from_reader(tap)),
            guard,
            fallback: None,
            separator: config.separator,
            lazy: config.lazy_quotes,
            width: None,
        };

        let producer = Producer {
            hasher,
            batch_size: config.batch_size,
            sender,
        };

        let result = producer.produce(records);
        if let Err(ref e) = result {
            log::debug!("digest engine stopped: {}", e);
        }
        result
    }
}

/// Records of one source, read by the csv reader until lazy quote splitting
/// disagrees with it, and by [`LazyReader`] from then on.
struct Records<R> {
    csv: Option<csv::Reader<Tap<R>>>,
    guard: QuoteGuard,
    fallback: Option<LazyReader<Chain<Cursor<Vec<u8>>, R>>>,
    separator: u8,
    lazy: bool,
    /// Field count of the first record, checked in lazy mode
    width: Option<usize>,
}

impl<R: Read> Records<R> {
    /// Read the next record. Returns the line it started on, or `None` at
    /// end of input.
    fn next_record(&mut self, record: &mut StringRecord) -> Result<Option<u64>> {
        let Some(line) = self.read(record)? else {
            return Ok(None);
        };

        if self.lazy {
            let expected = *self.width.get_or_insert(record.len());
            if record.len() != expected {
                return Err(DigestError::FieldCount {
                    line,
                    expected,
                    found: record.len(),
                });
            }
        }
        Ok(Some(line))
    }

    fn read(&mut self, record: &mut StringRecord) -> Result<Option<u64>> {
        if let Some(fallback) = self.fallback.as_mut() {
            return fallback.read_record(record);
        }
        let Some(mut reader) = self.csv.take() else {
            return Ok(None);
        };
        if !reader.read_record(record)? {
            return Ok(None);
        }
        let start = record.position().cloned().unwrap_or_else(Position::new);

        if !self.lazy {
            self.guard.check(&start, reader.position())?;
        } else if self.guard.diverges(&start, reader.position()) {
            log::debug!(
                "line {}: quote kept inside quoted field, splitting lazily from here",
                start.line()
            );
            let rest = self.guard.take_from(&start);
            let source = Cursor::new(rest).chain(reader.into_inner().into_inner());
            let fallback = self
                .fallback
                .insert(LazyReader::new(source, self.separator, start.line()));
            return fallback.read_record(record);
        }

        self.csv = Some(reader);
        Ok(Some(start.line()))
    }
}

struct Producer {
    hasher: RowHasher,
    batch_size: usize,
    sender: SyncSender<Vec<Digest>>,
}

impl Producer {
    fn produce<R: Read>(&self, mut records: Records<R>) -> Result<()> {
        let mut pending: Vec<StringRecord> = Vec::with_capacity(self.batch_size);
        let mut record = StringRecord::new();
        let mut rows: u64 = 0;

        while let Some(line) = records.next_record(&mut record)? {
            self.hasher.check_width(&record, line)?;

            pending.push(record.clone());
            rows += 1;

            if pending.len() == self.batch_size && !self.send(&mut pending) {
                log::debug!("digest consumer hung up after {} rows", rows);
                return Ok(());
            }
        }

        if !pending.is_empty() && !self.send(&mut pending) {
            log::debug!("digest consumer hung up after {} rows", rows);
            return Ok(());
        }

        log::debug!("digest engine finished: {} rows", rows);
        Ok(())
    }

    /// Hash the pending records and send them as one batch. Returns false
    /// when the consumer is gone.
    fn send(&self, pending: &mut Vec<StringRecord>) -> bool {
        let hasher = &self.hasher;
        let batch: Vec<Digest> = pending
            .par_iter()
            .map_init(
                || (Vec::<u8>::new(), Vec::<u8>::new()),
                |(key_buf, value_buf), record| hasher.digest(record, key_buf, value_buf),
            )
            .collect();
        pending.clear();

        self.sender.send(batch).is_ok()
    }
}

impl RowHasher {
    fn check_width(&self, record: &StringRecord, line: u64) -> Result<()> {
        if record.len() >= self.min_fields {
            return Ok(());
        }

        let column = self
            .key
            .indices()
            .iter()
            .chain(self.value.indices())
            .copied()
            .find(|&i| i >= record.len())
            .unwrap_or(self.min_fields - 1);

        Err(DigestError::ColumnOutOfRange {
            line,
            column,
            fields: record.len(),
        })
    }

    fn digest(
        &self,
        record: &StringRecord,
        key_buf: &mut Vec<u8>,
        value_buf: &mut Vec<u8>,
    ) -> Digest {
        self.key.concat_into(record, key_buf);
        self.value.concat_or_join_into(record, self.separator, value_buf);

        Digest {
            key: fingerprint(key_buf),
            value: fingerprint(value_buf),
            source: record.iter().map(str::to_owned).collect(),
        }
    }
}

/// Consumer side of a running engine
///
/// Iterating yields digests in source order across batch boundaries.
pub struct DigestStream {
    receiver: Receiver<Vec<Digest>>,
    current: std::vec::IntoIter<Digest>,
    producer: JoinHandle<Result<()>>,
}

impl DigestStream {
    /// Next batch of digests, or `None` once the producer has stopped.
    pub fn next_batch(&mut self) -> Option<Vec<Digest>> {
        if self.current.len() > 0 {
            return Some(self.current.by_ref().collect());
        }
        self.receiver.recv().ok()
    }

    /// Wait for the producer and return its terminal result.
    ///
    /// Digests not yet consumed are discarded.
    pub fn finish(self) -> Result<()> {
        let DigestStream {
            receiver, producer, ..
        } = self;

        let discarded: usize = receiver.iter().map(|batch| batch.len()).sum();
        if discarded > 0 {
            log::debug!("discarded {} unread digests", discarded);
        }

        join(producer)
    }

    /// Close the channel and wait for the producer to notice.
    pub fn abandon(self) {
        let DigestStream {
            receiver, producer, ..
        } = self;
        drop(receiver);

        if let Err(e) = join(producer) {
            log::debug!("abandoned digest engine had failed: {}", e);
        }
    }
}

impl Iterator for DigestStream {
    type Item = Digest;

    fn next(&mut self) -> Option<Digest> {
        loop {
            if let Some(digest) = self.current.next() {
                return Some(digest);
            }
            self.current = self.receiver.recv().ok()?.into_iter();
        }
    }
}

fn join(producer: JoinHandle<Result<()>>) -> Result<()> {
    producer
        .join()
        .map_err(|panic| DigestError::producer(panic_message(&*panic)))?
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "producer thread panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIRST_LINE: &str = "1,first-line,some-columne,friday";
    const SECOND_LINE: &str = "2,second-line,nobody-needs-this,saturday";

    fn two_lines() -> String {
        format!("{}\n{}", FIRST_LINE, SECOND_LINE)
    }

    fn fields(line: &str) -> Vec<String> {
        line.split(',').map(str::to_owned).collect()
    }

    fn collect(config: Config) -> Result<Vec<Digest>> {
        let mut stream = Engine::new(config)?.stream_digests()?;
        let digests: Vec<Digest> = stream.by_ref().collect();
        stream.finish()?;
        Ok(digests)
    }

    #[test]
    fn test_digest_key_and_whole_row() {
        let digests = collect(Config::new(std::io::Cursor::new(two_lines()))).unwrap();

        assert_eq!(
            digests,
            vec![
                Digest {
                    key: fingerprint(b"1"),
                    value: fingerprint(FIRST_LINE.as_bytes()),
                    source: fields(FIRST_LINE),
                },
                Digest {
                    key: fingerprint(b"2"),
                    value: fingerprint(SECOND_LINE.as_bytes()),
                    source: fields(SECOND_LINE),
                },
            ]
        );
    }

    #[test]
    fn test_digest_selected_values() {
        let config = Config::new(std::io::Cursor::new(two_lines())).with_value(vec![3]);
        let digests = collect(config).unwrap();

        assert_eq!(digests[0].value, fingerprint(b"friday"));
        assert_eq!(digests[1].value, fingerprint(b"saturday"));
        assert_eq!(digests[0].source, fields(FIRST_LINE));
    }

    #[test]
    fn test_composite_key_order_matters() {
        let config = Config::new(std::io::Cursor::new(two_lines())).with_key(vec![3, 0]);
        let digests = collect(config).unwrap();

        assert_eq!(digests[0].key, fingerprint(b"friday1"));
        assert_ne!(digests[0].key, fingerprint(b"1friday"));
    }

    #[test]
    fn test_parse_error_stops_stream() {
        let input = format!("{}\nsome-random-line", FIRST_LINE);
        let config = Config::new(std::io::Cursor::new(input)).with_value(vec![3]);

        let mut stream = Engine::new(config).unwrap().stream_digests().unwrap();
        let digests: Vec<Digest> = stream.by_ref().collect();
        let err = stream.finish().unwrap_err();

        assert!(err.is_parse_error());
        assert!(matches!(err, DigestError::Csv(_)));
        assert!(digests.is_empty());
    }

    #[test]
    fn test_finish_without_draining() {
        let input: String = (0..500).map(|i| format!("{},v{}\n", i, i)).collect();
        let config = Config::new(std::io::Cursor::new(input))
            .with_batch_size(4)
            .with_channel_capacity(1);

        let stream = Engine::new(config).unwrap().stream_digests().unwrap();
        assert!(stream.finish().is_ok());
    }

    #[test]
    fn test_batches_preserve_order() {
        let input: String = (0..103).map(|i| format!("{},v{}\n", i, i)).collect();
        let config = Config::new(std::io::Cursor::new(input))
            .with_batch_size(10)
            .with_channel_capacity(2);

        let mut stream = Engine::new(config).unwrap().stream_digests().unwrap();
        let mut sizes = Vec::new();
        let mut keys = Vec::new();
        while let Some(batch) = stream.next_batch() {
            sizes.push(batch.len());
            keys.extend(batch.into_iter().map(|d| d.source[0].clone()));
        }
        stream.finish().unwrap();

        assert_eq!(sizes.len(), 11);
        assert_eq!(sizes.last(), Some(&3));
        let expected: Vec<String> = (0..103).map(|i| i.to_string()).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_abandon_does_not_block() {
        let input: String = (0..10_000).map(|i| format!("{},v{}\n", i, i)).collect();
        let config = Config::new(std::io::Cursor::new(input))
            .with_batch_size(8)
            .with_channel_capacity(1);

        let mut stream = Engine::new(config).unwrap().stream_digests().unwrap();
        assert!(stream.next().is_some());
        stream.abandon();
    }

    #[test]
    fn test_column_out_of_range() {
        let config = Config::new(std::io::Cursor::new("1,a\n2,b\n")).with_value(vec![1, 5]);
        let err = collect(config).unwrap_err();

        assert!(matches!(
            err,
            DigestError::ColumnOutOfRange {
                line: 1,
                column: 5,
                fields: 2
            }
        ));
    }

    #[test]
    fn test_strict_quotes_reject_bare_quote() {
        let config = Config::new(std::io::Cursor::new("1,a\n2,b\"c\n3,d\n"));
        let err = collect(config).unwrap_err();

        assert!(matches!(err, DigestError::BareQuote { line: 2, field: 2 }));
    }

    #[test]
    fn test_lazy_quotes_keep_quote() {
        let config = Config::new(std::io::Cursor::new("1,a\n2,b\"c\n")).with_lazy_quotes(true);
        let digests = collect(config).unwrap();

        assert_eq!(digests[1].source, vec!["2".to_string(), "b\"c".to_string()]);
    }

    #[test]
    fn test_quoted_fields_are_unescaped() {
        let config = Config::new(std::io::Cursor::new("1,\"x, \"\"y\"\"\"\n"));
        let digests = collect(config).unwrap();

        assert_eq!(digests[0].source[1], "x, \"y\"");
    }

    #[test]
    fn test_invalid_config_rejected_before_reading() {
        let err = Engine::new(Config::new(std::io::empty()).with_key(Vec::new())).unwrap_err();
        assert!(matches!(err, DigestError::InvalidConfig { .. }));
    }

    fn sources(digests: &[Digest]) -> Vec<Vec<String>> {
        digests.iter().map(|d| d.source.clone()).collect()
    }

    #[test]
    fn test_lazy_quotes_keep_quote_after_closing_quote() {
        let config = Config::new(std::io::Cursor::new("1,\"ab\"c\n")).with_lazy_quotes(true);
        let digests = collect(config).unwrap();

        assert_eq!(sources(&digests), vec![vec!["1".to_string(), "ab\"c".to_string()]]);
        assert_eq!(digests[0].value, fingerprint(b"1,ab\"c"));
    }

    #[test]
    fn test_lazy_split_takes_over_mid_stream() {
        let input = "0,p,z\n1,\"a\"b\n\",c\n2,q,r\n";
        let config = Config::new(std::io::Cursor::new(input))
            .with_lazy_quotes(true)
            .with_batch_size(1);
        let digests = collect(config).unwrap();

        assert_eq!(
            sources(&digests),
            vec![
                vec!["0".to_string(), "p".to_string(), "z".to_string()],
                vec!["1".to_string(), "a\"b\n".to_string(), "c".to_string()],
                vec!["2".to_string(), "q".to_string(), "r".to_string()],
            ]
        );
    }

    #[test]
    fn test_lazy_field_count_mismatch() {
        let config = Config::new(std::io::Cursor::new("1,a\n2,\"b\"c\",d\n"))
            .with_lazy_quotes(true);
        let err = collect(config).unwrap_err();

        assert!(err.is_parse_error());
        assert!(matches!(
            err,
            DigestError::FieldCount {
                line: 2,
                expected: 2,
                found: 3
            }
        ));
    }

    #[test]
    fn test_lazy_width_checked_on_csv_path() {
        let config = Config::new(std::io::Cursor::new("1,a\n2,b,c\n")).with_lazy_quotes(true);
        let err = collect(config).unwrap_err();

        assert!(matches!(
            err,
            DigestError::FieldCount {
                line: 2,
                expected: 2,
                found: 3
            }
        ));
    }
}
