use std::path::PathBuf;

use caravan_client::ClientError;
use caravan_ingest::IngestError;
use caravan_oplog::OplogError;
use snafu::Snafu;

/// Restore error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RestoreError {
    #[snafu(display("invalid option: {message}"))]
    BadOption { message: String },
    #[snafu(display("error scanning dump directory {}", path.display()))]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("error reading {}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("invalid metadata in {}: {message}", path.display()))]
    Metadata { path: PathBuf, message: String },
    #[snafu(display("error restoring {namespace}: {source}"))]
    Ingest {
        namespace: String,
        source: IngestError,
    },
    #[snafu(display("error connecting to destination: {source}"))]
    Connect { source: ClientError },
    #[snafu(display("destination command failed: {source}"))]
    Command { source: ClientError },
    #[snafu(display("oplog replay failed: {source}"))]
    OplogReplay { source: OplogError },
    /// A restore worker died without reporting a structured error.
    #[snafu(display("restore worker failed: {message}"))]
    Worker { message: String },
}

pub type Result<T, E = RestoreError> = std::result::Result<T, E>;
