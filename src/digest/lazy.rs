//! Record splitting with lazy quote rules
//!
//! Used once the csv reader and lazy splitting disagree about a record. A
//! quoted field only ends at a `"` followed by the separator or a line end;
//! any other lone `"` inside it is kept as data, so the field (and the
//! record) may run on past where the csv reader would have stopped. A `"`
//! inside an unquoted field is plain data. `\r\n` is read as `\n`, empty lines
//! are skipped and end of input closes an open quoted field.

use std::io::{BufRead, BufReader, Read};

use csv::StringRecord;

use crate::error::{DigestError, Result};

pub(crate) struct LazyReader<R> {
    inner: BufReader<R>,
    separator: u8,
    /// Number of the last line read
    line: u64,
    line_buf: Vec<u8>,
    field_buf: Vec<u8>,
    ends: Vec<usize>,
}

impl<R: Read> LazyReader<R> {
    /// `first_line` is the line number of the first byte `inner` yields.
    pub(crate) fn new(inner: R, separator: u8, first_line: u64) -> Self {
        Self {
            inner: BufReader::new(inner),
            separator,
            line: first_line.saturating_sub(1),
            line_buf: Vec::new(),
            field_buf: Vec::new(),
            ends: Vec::new(),
        }
    }

    /// Read the next record into `record`. Returns the line it started on,
    /// or `None` at end of input.
    pub(crate) fn read_record(&mut self, record: &mut StringRecord) -> Result<Option<u64>> {
        loop {
            if !self.read_line()? {
                return Ok(None);
            }
            if self.line_buf != b"\n" {
                break;
            }
        }
        let start_line = self.line;

        self.field_buf.clear();
        self.ends.clear();
        let separator = self.separator;
        let mut pos = 0;

        'fields: loop {
            if self.line_buf.get(pos) != Some(&b'"') {
                let rest = &self.line_buf[pos..];
                match rest.iter().position(|&b| b == separator) {
                    Some(i) => {
                        self.field_buf.extend_from_slice(&rest[..i]);
                        self.ends.push(self.field_buf.len());
                        pos += i + 1;
                        continue 'fields;
                    }
                    None => {
                        self.field_buf
                            .extend_from_slice(rest.strip_suffix(b"\n").unwrap_or(rest));
                        self.ends.push(self.field_buf.len());
                        break 'fields;
                    }
                }
            }

            pos += 1;
            loop {
                match self.line_buf[pos..].iter().position(|&b| b == b'"') {
                    Some(i) => {
                        self.field_buf
                            .extend_from_slice(&self.line_buf[pos..pos + i]);
                        pos += i + 1;

                        let rest = &self.line_buf[pos..];
                        match rest.first() {
                            Some(b'"') => {
                                self.field_buf.push(b'"');
                                pos += 1;
                            }
                            Some(&b) if b == separator => {
                                self.ends.push(self.field_buf.len());
                                pos += 1;
                                continue 'fields;
                            }
                            None | Some(b'\n') => {
                                self.ends.push(self.field_buf.len());
                                break 'fields;
                            }
                            Some(_) => self.field_buf.push(b'"'),
                        }
                    }
                    None => {
                        self.field_buf.extend_from_slice(&self.line_buf[pos..]);
                        if !self.read_line()? {
                            self.ends.push(self.field_buf.len());
                            break 'fields;
                        }
                        pos = 0;
                    }
                }
            }
        }

        record.clear();
        let mut from = 0;
        for (i, &to) in self.ends.iter().enumerate() {
            let field = std::str::from_utf8(&self.field_buf[from..to]).map_err(|_| {
                DigestError::InvalidUtf8 {
                    line: start_line,
                    field: i + 1,
                }
            })?;
            record.push_field(field);
            from = to;
        }

        Ok(Some(start_line))
    }

    /// Read one physical line into `line_buf`. Returns false at end of input.
    fn read_line(&mut self) -> Result<bool> {
        self.line_buf.clear();
        let n = self
            .inner
            .read_until(b'\n', &mut self.line_buf)
            .map_err(csv::Error::from)?;
        if n == 0 {
            return Ok(false);
        }
        self.line += 1;

        if self.line_buf.ends_with(b"\r\n") {
            let len = self.line_buf.len();
            self.line_buf.truncate(len - 2);
            self.line_buf.push(b'\n');
        } else if self.line_buf.ends_with(b"\r") {
            self.line_buf.pop();
        }
        Ok(true)
    }
}
