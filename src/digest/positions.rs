//! Field selection for key and value fingerprints

use csv::StringRecord;

/// Ordered list of field indices selected from a row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Positions(Vec<usize>);

impl Positions {
    pub fn new(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    /// Largest selected index, if any
    pub fn max(&self) -> Option<usize> {
        self.0.iter().copied().max()
    }

    /// Concatenate the selected fields into `buf` with nothing between them.
    ///
    /// The record must be long enough for every index.
    pub fn concat_into(&self, record: &StringRecord, buf: &mut Vec<u8>) {
        buf.clear();
        for &i in &self.0 {
            buf.extend_from_slice(record[i].as_bytes());
        }
    }

    /// Write the selected fields into `buf`, or the whole row joined with
    /// `separator` when no position is selected.
    pub fn concat_or_join_into(&self, record: &StringRecord, separator: u8, buf: &mut Vec<u8>) {
        if !self.is_empty() {
            return self.concat_into(record, buf);
        }

        buf.clear();
        for (i, field) in record.iter().enumerate() {
            if i > 0 {
                buf.push(separator);
            }
            buf.extend_from_slice(field.as_bytes());
        }
    }
}

impl From<Vec<usize>> for Positions {
    fn from(indices: Vec<usize>) -> Self {
        Self::new(indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    #[test]
    fn test_concat_follows_position_order() {
        let row = record(&["1", "first-line", "friday"]);
        let mut buf = Vec::new();

        Positions::new(vec![2, 0]).concat_into(&row, &mut buf);
        assert_eq!(buf, b"friday1");

        Positions::new(vec![0, 2]).concat_into(&row, &mut buf);
        assert_eq!(buf, b"1friday");
    }

    #[test]
    fn test_empty_positions_join_whole_row() {
        let row = record(&["1", "first-line", "friday"]);
        let mut buf = Vec::new();

        Positions::default().concat_or_join_into(&row, b'|', &mut buf);
        assert_eq!(buf, b"1|first-line|friday");
    }

    #[test]
    fn test_max() {
        assert_eq!(Positions::new(vec![3, 1, 4]).max(), Some(4));
        assert_eq!(Positions::default().max(), None);
    }
}
