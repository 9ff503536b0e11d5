use caravan_client::ClientError;
use snafu::Snafu;

/// Oplog replay error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum OplogError {
    #[snafu(display("invalid option: {message}"))]
    BadOption { message: String },
    /// A log entry that cannot be interpreted.
    #[snafu(display("malformed oplog entry: {message}"))]
    Entry { message: String },
    #[snafu(display("error querying oplog: {source}"))]
    Query { source: ClientError },
    #[snafu(display("error applying ops: {source}"))]
    Apply { source: ClientError },
    /// The destination processed the command and rejected it.
    #[snafu(display("error applying op: {errmsg}"))]
    Rejected { errmsg: String },
}

pub type Result<T, E = OplogError> = std::result::Result<T, E>;
