//! Error types for JBIG2 decoding.

use core::fmt;

/// The error type surfaced by every decoding operation.
///
/// Intermediate decoders do not recover locally; the first failure is
/// propagated to the top-level call and the decoder becomes terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The bitstream ended during a header or payload parse.
    TruncatedInput,
    /// A segment header field is invalid, a referred segment number is not
    /// smaller than the current one, or a segment appears outside the page
    /// context it requires.
    InvalidSegment,
    /// A region is wider or taller than 65535 pixels, or a symbol/pattern
    /// dimension falls outside its bounded range.
    DimensionOverflow,
    /// Decoded values contradict declared counts: a symbol ID at or above
    /// the symbol count, export runs that do not cover the symbol set, or
    /// more symbols than declared.
    DecodeInconsistency,
    /// The arithmetic decoder was asked for more bits than the stream
    /// supports.
    ArithmeticExhausted,
    /// The MMR decoder could not complete the declared plane.
    MmrFailed,
    /// A referred segment is absent, of the wrong type, or lacks the
    /// expected decoded artifact.
    MissingReference,
    /// A Huffman-table selector or segment feature that is explicitly
    /// unsupported.
    Unsupported,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedInput => write!(f, "unexpected end of input"),
            Self::InvalidSegment => write!(f, "invalid segment header or placement"),
            Self::DimensionOverflow => write!(f, "image dimension out of range"),
            Self::DecodeInconsistency => write!(f, "decoded data contradicts declared counts"),
            Self::ArithmeticExhausted => write!(f, "arithmetic decoder exhausted"),
            Self::MmrFailed => write!(f, "MMR decoding failed"),
            Self::MissingReference => write!(f, "referenced segment missing or unusable"),
            Self::Unsupported => write!(f, "unsupported feature"),
        }
    }
}

impl core::error::Error for DecodeError {}

/// Result type for JBIG2 decoding operations.
pub type Result<T> = core::result::Result<T, DecodeError>;

macro_rules! bail {
    ($err:expr) => {
        return Err($err)
    };
}

pub(crate) use bail;
