use caravan_client::{Namespace, connect};
use caravan_oplog::OplogApplier;
use clap::Parser;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{ConnectSnafu, InvalidOptionsSnafu, OplogSnafu, Result};

/// Replay a source server's operation log on a destination
#[derive(Parser)]
pub struct OplogArgs {
    /// Host to pull operations from
    #[arg(long)]
    from: String,

    /// Namespace of the source oplog
    #[arg(long = "oplogns", default_value = "local.oplog.rs")]
    oplog_ns: String,

    /// Replay operations from this many seconds back
    #[arg(long, default_value_t = 86_400)]
    seconds: u64,

    /// Destination to connect to
    #[arg(long, default_value = "mem://local")]
    uri: String,
}

impl OplogArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let oplog_namespace = Namespace::parse(&self.oplog_ns).map_err(|parse_error| {
            InvalidOptionsSnafu {
                message: format!(
                    "the oplog namespace must specify a collection: {parse_error}"
                ),
            }
            .build()
        })?;

        let source = connect(&self.from).context(ConnectSnafu)?;
        let destination = connect(&self.uri).context(ConnectSnafu)?;

        let applier = OplogApplier::new(source, destination, oplog_namespace)
            .with_lookback_seconds(self.seconds);

        let applied = tokio::select! {
            _ = ct.cancelled() => return Err(crate::error::CliError::Interrupted),
            result = applier.run() => result.context(OplogSnafu)?,
        };
        info!(operations = applied, "oplog replay finished");
        Ok(())
    }
}
