//! Raw-byte quote checks on records read through the csv reader
//!
//! The csv reader accepts stray quotes and keeps them literally. The raw
//! bytes of every record are captured as they are read. In strict mode they
//! run through [`validate_record`], which rejects:
//!
//! - a `"` inside a field that did not start with one (bare quote);
//! - a `"` closing a quoted field that is followed by anything other than
//!   another `"`, the separator or a line end (extraneous quote);
//! - input ending inside a quoted field (unterminated quote).
//!
//! With lazy quotes only the extraneous case matters: the csv reader drops
//! that quote and ends the quoted section, while lazy splitting keeps the
//! quote and stays inside the field. [`QuoteGuard::diverges`] detects it so
//! the engine can hand the remaining bytes to [`super::lazy::LazyReader`].

use std::cell::RefCell;
use std::io::{self, Read};
use std::rc::Rc;

use csv::Position;

use crate::error::{DigestError, Result};

pub(crate) const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Reader wrapper that keeps a copy of every byte handed to the csv reader
pub(crate) struct Tap<R> {
    inner: R,
    captured: Rc<RefCell<Vec<u8>>>,
}

impl<R: Read> Read for Tap<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.captured.borrow_mut().extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

impl<R> Tap<R> {
    /// The wrapped reader, positioned after the last captured byte
    pub(crate) fn into_inner(self) -> R {
        self.inner
    }
}

/// Validates captured records and releases their bytes
pub(crate) struct QuoteGuard {
    captured: Rc<RefCell<Vec<u8>>>,
    /// Absolute byte offset of `captured[0]`
    offset: u64,
    separator: u8,
}

/// Wrap `inner` so that the records read through it can be checked.
pub(crate) fn tap<R: Read>(inner: R, separator: u8) -> (Tap<R>, QuoteGuard) {
    let captured = Rc::new(RefCell::new(Vec::new()));
    let tap = Tap {
        inner,
        captured: Rc::clone(&captured),
    };
    let guard = QuoteGuard {
        captured,
        offset: 0,
        separator,
    };
    (tap, guard)
}

impl QuoteGuard {
    /// Check the record spanning `start..end` and drop everything before `end`.
    pub(crate) fn check(&mut self, start: &Position, end: &Position) -> Result<()> {
        let (lo, hi) = self.span(start, end);
        let result = scan(
            &self.captured.borrow()[lo..hi],
            self.separator,
            start.line(),
            false,
        );
        self.release(hi);
        result
    }

    /// True when lazy splitting of the record spanning `start..end` differs
    /// from what the csv reader produced. The bytes are kept in that case so
    /// they can be re-read with [`QuoteGuard::take_from`].
    pub(crate) fn diverges(&mut self, start: &Position, end: &Position) -> bool {
        let (lo, hi) = self.span(start, end);
        let diverged = scan(
            &self.captured.borrow()[lo..hi],
            self.separator,
            start.line(),
            true,
        )
        .is_err();

        if !diverged {
            self.release(hi);
        }
        diverged
    }

    /// Every captured byte from `start` on, leading BOM removed
    pub(crate) fn take_from(&mut self, start: &Position) -> Vec<u8> {
        let mut captured = self.captured.borrow_mut();
        let lo = (start.byte().saturating_sub(self.offset) as usize).min(captured.len());
        let rest = captured.split_off(lo);
        captured.clear();
        self.offset = start.byte();

        match rest.strip_prefix(UTF8_BOM) {
            Some(stripped) => stripped.to_vec(),
            None => rest,
        }
    }

    fn span(&self, start: &Position, end: &Position) -> (usize, usize) {
        let len = self.captured.borrow().len();
        let hi = (end.byte().saturating_sub(self.offset) as usize).min(len);
        let lo = (start.byte().saturating_sub(self.offset) as usize).min(hi);
        (lo, hi)
    }

    fn release(&mut self, hi: usize) {
        self.captured.borrow_mut().drain(..hi);
        self.offset += hi as u64;
    }
}

#[derive(Clone, Copy)]
enum State {
    FieldStart,
    Unquoted,
    Quoted,
    QuoteInQuoted,
}

/// Validate the raw bytes of one record (terminator and any preceding blank
/// lines included). `first_line` is the line the raw bytes start on.
pub(crate) fn validate_record(raw: &[u8], separator: u8, first_line: u64) -> Result<()> {
    scan(raw, separator, first_line, false)
}

/// Walk the raw bytes of a record. In lazy mode bare and unterminated quotes
/// are accepted and only an extraneous quote is reported.
fn scan(raw: &[u8], separator: u8, first_line: u64, lazy: bool) -> Result<()> {
    let raw = raw.strip_prefix(UTF8_BOM).unwrap_or(raw);

    let mut state = State::FieldStart;
    let mut line = first_line;
    let mut field = 1;
    let mut quote_line = first_line;

    for &b in raw {
        state = match (state, b) {
            (State::Quoted, b'"') => State::QuoteInQuoted,
            (State::Quoted, b'\n') => {
                line += 1;
                State::Quoted
            }
            (State::Quoted, _) => State::Quoted,
            (State::QuoteInQuoted, b'"') => State::Quoted,
            (_, b) if b == separator => {
                field += 1;
                State::FieldStart
            }
            (_, b'\n') => {
                line += 1;
                field = 1;
                State::FieldStart
            }
            (_, b'\r') => {
                field = 1;
                State::FieldStart
            }
            (State::QuoteInQuoted, _) => {
                return Err(DigestError::ExtraneousQuote { line, field });
            }
            (State::FieldStart, b'"') => {
                quote_line = line;
                State::Quoted
            }
            (State::Unquoted, b'"') if !lazy => {
                return Err(DigestError::BareQuote { line, field });
            }
            (State::FieldStart | State::Unquoted, _) => State::Unquoted,
        };
    }

    if let (State::Quoted, false) = (state, lazy) {
        return Err(DigestError::UnterminatedQuote { line: quote_line });
    }
    Ok(())
}
