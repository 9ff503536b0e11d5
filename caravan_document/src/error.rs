use snafu::Snafu;

use crate::wire::MAX_DOCUMENT_SIZE;

/// Document model error types.
///
/// Messages surface to tool users unchanged, so they name the byte offset
/// or size that made the document invalid.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum DocumentError {
    /// The serialized form exceeds the destination's document cap.
    #[snafu(display("document of {size} bytes exceeds the {MAX_DOCUMENT_SIZE} byte limit"))]
    DocumentTooLarge { size: usize },
    /// The document cannot be serialized.
    #[snafu(display("encode error: {message}"))]
    Encode { message: String },
    /// The byte stream is not a valid document.
    #[snafu(display("decode error at offset {offset}: {message}"))]
    Decode { offset: usize, message: String },
    /// The byte stream ended inside a document.
    #[snafu(display("truncated document: need {expected} bytes, have {actual}"))]
    Truncated { expected: usize, actual: usize },
    /// The JSON value cannot be represented as a document.
    #[snafu(display("invalid document: {message}"))]
    InvalidJson { message: String },
}

pub type Result<T, E = DocumentError> = std::result::Result<T, E>;
