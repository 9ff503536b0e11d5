use caravan_client::ClientError;
use caravan_document::DocumentError;
use snafu::Snafu;

/// Ingest error types.
///
/// Record-level errors (`Parse`, `Duplicate`, `Encode`) are filterable by
/// the pipeline's stop-on-error policy; the rest abort the pipeline.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IngestError {
    /// A configuration combination the pipeline cannot act on.
    #[snafu(display("invalid option: {message}"))]
    BadOption { message: String },
    /// One record of the input source could not be parsed.
    #[snafu(display("read error on entry #{record}: {message}"))]
    Parse { record: u64, message: String },
    /// A synthesized column key collides with a declared field.
    #[snafu(display(
        "duplicate header name - on {key} - for token #{column} in document #{record}"
    ))]
    Duplicate {
        key: String,
        column: usize,
        record: u64,
    },
    /// One document could not be serialized for the wire.
    #[snafu(display("error encoding document: {source}"))]
    Encode { source: DocumentError },
    /// A binary document failed structural validation.
    #[snafu(display("corrupt document in input: {source}"))]
    InvalidDocument { source: DocumentError },
    /// The binary stream ended inside a length prefix or body.
    #[snafu(display("truncated input: need {expected} bytes, have {actual}"))]
    Truncated { expected: usize, actual: usize },
    #[snafu(display("error reading input"))]
    Io { source: std::io::Error },
    #[snafu(display("error connecting to destination: {source}"))]
    Connect { source: ClientError },
    #[snafu(display("error inserting documents: {source}"))]
    Write { source: ClientError },
    /// The pipeline was aborted by its error policy.
    #[snafu(display("ingest aborted: {message}"))]
    Fatal { message: String },
}

impl IngestError {
    /// True when the destination is unreachable; this is fatal under every
    /// error policy.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            IngestError::Connect { source } | IngestError::Write { source }
                if source.is_unreachable()
        )
    }

    /// True for per-record failures the lenient policy may skip.
    pub fn is_record_error(&self) -> bool {
        matches!(
            self,
            IngestError::Parse { .. }
                | IngestError::Duplicate { .. }
                | IngestError::Encode { .. }
        )
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
