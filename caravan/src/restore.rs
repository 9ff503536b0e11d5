use std::path::PathBuf;
use std::sync::Arc;

use caravan_client::connect;
use caravan_restore::{IntentManager, RestoreCoordinator, RestoreOptions, scan_dump_directory};
use clap::Parser;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{ConnectSnafu, Result, RestoreSnafu};

/// Restore a dump directory
#[derive(Parser)]
pub struct RestoreArgs {
    /// Dump directory to restore from
    #[arg(long, default_value = "dump")]
    dir: PathBuf,

    /// Drop each collection before restoring it
    #[arg(long)]
    drop: bool,

    /// Validate every document read from the dump
    #[arg(long)]
    objcheck: bool,

    /// Stop at the first bad document instead of skipping
    #[arg(long = "stopOnError")]
    stop_on_error: bool,

    /// Replay oplog.bson after restoring the collections
    #[arg(long = "oplogReplay")]
    oplog_replay: bool,

    /// Collections to restore in parallel
    #[arg(long = "numParallelCollections", default_value_t = 1)]
    parallel_collections: usize,

    /// Documents per bulk insert
    #[arg(long = "batchSize", default_value_t = 1000)]
    batch_size: usize,

    /// Destination to connect to
    #[arg(long, default_value = "mem://local")]
    uri: String,
}

impl RestoreArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let provider = connect(&self.uri).context(ConnectSnafu)?;

        let manager = Arc::new(IntentManager::new());
        let discovered =
            scan_dump_directory(&manager, &self.dir).context(RestoreSnafu)?;
        info!(path = %self.dir.display(), files = discovered, "scanned dump directory");

        let coordinator = RestoreCoordinator::new(
            provider,
            manager,
            RestoreOptions {
                drop: self.drop,
                objcheck: self.objcheck,
                batch_size: self.batch_size,
                stop_on_error: self.stop_on_error,
                workers: self.parallel_collections,
                oplog_replay: self.oplog_replay,
            },
        );

        let restored = tokio::select! {
            _ = ct.cancelled() => return Err(crate::error::CliError::Interrupted),
            result = coordinator.run() => result.context(RestoreSnafu)?,
        };
        info!(documents = restored, "restore finished");
        Ok(())
    }
}
