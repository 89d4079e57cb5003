//! Error types for digest and diff operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DigestError>;

#[derive(Error, Debug)]
pub enum DigestError {
    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("bare \" in non-quoted field (line {line}, field {field})")]
    BareQuote { line: u64, field: usize },

    #[error("extraneous or missing \" in quoted field (line {line}, field {field})")]
    ExtraneousQuote { line: u64, field: usize },

    #[error("unterminated quoted field starting on line {line}")]
    UnterminatedQuote { line: u64 },

    #[error("record on line {line} has {found} fields, expected {expected}")]
    FieldCount {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("invalid UTF-8 on line {line}, field {field}")]
    InvalidUtf8 { line: u64, field: usize },

    #[error("column {column} out of range on line {line}: row has {fields} fields")]
    ColumnOutOfRange {
        line: u64,
        column: usize,
        fields: usize,
    },

    #[error("Configuration error: {message}")]
    InvalidConfig { message: String },

    #[error("digest producer failed: {message}")]
    Producer { message: String },
}

impl DigestError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: msg.into(),
        }
    }

    pub fn producer(msg: impl Into<String>) -> Self {
        Self::Producer {
            message: msg.into(),
        }
    }

    /// True when the row source content itself is malformed, as opposed to a
    /// configuration or runtime failure.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            DigestError::Csv(_)
                | DigestError::BareQuote { .. }
                | DigestError::ExtraneousQuote { .. }
                | DigestError::UnterminatedQuote { .. }
                | DigestError::FieldCount { .. }
                | DigestError::InvalidUtf8 { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_classification() {
        assert!(DigestError::BareQuote { line: 1, field: 2 }.is_parse_error());
        assert!(DigestError::UnterminatedQuote { line: 4 }.is_parse_error());
        assert!(DigestError::FieldCount {
            line: 2,
            expected: 3,
            found: 4
        }
        .is_parse_error());
        assert!(!DigestError::invalid_config("empty key").is_parse_error());
        assert!(!DigestError::ColumnOutOfRange {
            line: 1,
            column: 7,
            fields: 3
        }
        .is_parse_error());
    }

    #[test]
    fn test_error_messages() {
        let err = DigestError::ColumnOutOfRange {
            line: 3,
            column: 5,
            fields: 2,
        };
        assert_eq!(
            err.to_string(),
            "column 5 out of range on line 3: row has 2 fields"
        );
    }
}
