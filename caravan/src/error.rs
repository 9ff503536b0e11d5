use caravan_client::ClientError;
use caravan_ingest::IngestError;
use caravan_oplog::OplogError;
use caravan_restore::RestoreError;
use snafu::Snafu;

pub const EXIT_BAD_OPTIONS: i32 = 3;
pub const EXIT_ERROR: i32 = 1;

/// CLI error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CliError {
    #[snafu(display("invalid options: {message}"))]
    InvalidOptions { message: String },
    #[snafu(display("{source}"))]
    Connect { source: ClientError },
    #[snafu(display("{source}"))]
    Import { source: IngestError },
    #[snafu(display("{source}"))]
    Restore { source: RestoreError },
    #[snafu(display("{source}"))]
    Oplog { source: OplogError },
    #[snafu(display("error reading {path}"))]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("interrupted"))]
    Interrupted,
}

impl CliError {
    /// Maps bad-options failures to their dedicated exit code.
    pub fn exit_code(&self) -> i32 {
        if self.is_bad_options() {
            EXIT_BAD_OPTIONS
        } else {
            EXIT_ERROR
        }
    }

    fn is_bad_options(&self) -> bool {
        match self {
            CliError::InvalidOptions { .. } => true,
            CliError::Connect { source } => matches!(source, ClientError::BadOption { .. }),
            CliError::Import { source } => matches!(source, IngestError::BadOption { .. }),
            CliError::Restore { source } => matches!(source, RestoreError::BadOption { .. }),
            CliError::Oplog { source } => matches!(source, OplogError::BadOption { .. }),
            _ => false,
        }
    }
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;
