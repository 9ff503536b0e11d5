use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::EXIT_BAD_OPTIONS;
use crate::import::ImportArgs;
use crate::observability::init_observability;
use crate::oplog::OplogArgs;
use crate::restore::RestoreArgs;

mod error;
mod import;
mod observability;
mod oplog;
mod restore;

#[derive(Parser)]
#[command(name = "caravan")]
#[command(about = "Data movement tools for document databases")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import delimited text or JSON into a collection
    Import {
        #[clap(flatten)]
        inner: ImportArgs,
    },
    /// Restore a dump directory
    Restore {
        #[clap(flatten)]
        inner: RestoreArgs,
    },
    /// Replay a source server's operation log on a destination
    Oplog {
        #[clap(flatten)]
        inner: OplogArgs,
    },
}

#[tokio::main]
async fn main() {
    init_observability();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(parse_error) => {
            // help and version requests are not errors
            let code = if parse_error.use_stderr() {
                EXIT_BAD_OPTIONS
            } else {
                0
            };
            let _ = parse_error.print();
            std::process::exit(code);
        }
    };

    let ct = CancellationToken::new();
    let ct_clone = ct.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ct_clone.cancel();
    });

    let result = match cli.command {
        Commands::Import { inner } => inner.run(ct).await,
        Commands::Restore { inner } => inner.run(ct).await,
        Commands::Oplog { inner } => inner.run(ct).await,
    };

    if let Err(cli_error) = result {
        error!(error = %cli_error, "failed");
        std::process::exit(cli_error.exit_code());
    }
}
