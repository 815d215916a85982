use thiserror::Error;

/// Why a P1 frame was rejected. Line numbers are 1-based within the telegram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty telegram")]
    Empty,

    #[error("telegram does not start with a '/' header line")]
    MissingHeader,

    #[error("frame exceeds {max} bytes")]
    FrameTooLong { max: usize },

    #[error("checksum mismatch: telegram says {expected:04X}, computed {computed:04X}")]
    CrcMismatch { expected: u16, computed: u16 },

    #[error("checksum is not four hex digits")]
    InvalidCrc,

    #[error("line {line}: invalid OBIS id '{id}'")]
    InvalidObis { line: usize, id: String },

    #[error("line {line}: malformed data line")]
    MalformedLine { line: usize },

    #[error("line {line}: duplicate field {obis}")]
    DuplicateField { line: usize, obis: String },

    #[error("line {line}: invalid value '{value}' for {obis}")]
    InvalidValue {
        line: usize,
        obis: String,
        value: String,
    },

    #[error("line {line}: unit '{found}' for {obis}, expected '{expected}'")]
    InvalidUnit {
        line: usize,
        obis: String,
        found: String,
        expected: String,
    },
}
