use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use caravan_client::{Namespace, SessionProviderRef, SessionRef};
use caravan_document::{Document, Value, doc};
use caravan_ingest::readers::{BinaryDocReader, RecordReader};
use caravan_ingest::{IngestOptions, IngestPipeline};
use caravan_oplog::{OplogEntry, apply_entry};
use snafu::{IntoError, ResultExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{
    CommandSnafu, ConnectSnafu, IngestSnafu, OplogReplaySnafu, ReadFileSnafu, Result, WorkerSnafu,
};
use crate::intent::Intent;
use crate::manager::IntentManager;
use crate::metadata::{CollectionMetadata, read_metadata_file};
use crate::prioritizer::PriorityType;

const DEFAULT_BATCH_SIZE: usize = 1000;

/// Restore policy knobs.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Drop each destination collection before restoring it.
    pub drop: bool,
    /// Structurally validate every document read from disk.
    pub objcheck: bool,
    /// Documents per bulk insert.
    pub batch_size: usize,
    /// Abort on the first bad document instead of skipping.
    pub stop_on_error: bool,
    /// Collections restored in parallel. More than one switches the
    /// intent manager to the multi-database largest-task-first policy.
    pub workers: usize,
    /// Replay `oplog.bson` after all collections are restored.
    pub oplog_replay: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            drop: false,
            objcheck: false,
            batch_size: DEFAULT_BATCH_SIZE,
            stop_on_error: false,
            workers: 1,
            oplog_replay: false,
        }
    }
}

/// Drives a finalized restore: a worker pool over the intent queue,
/// then users and roles, then per-database indexes, then the oplog.
pub struct RestoreCoordinator {
    provider: SessionProviderRef,
    manager: Arc<IntentManager>,
    options: RestoreOptions,
}

impl RestoreCoordinator {
    pub fn new(
        provider: SessionProviderRef,
        manager: Arc<IntentManager>,
        options: RestoreOptions,
    ) -> Self {
        Self {
            provider,
            manager,
            options,
        }
    }

    /// Runs the whole restore and returns the number of documents
    /// written to regular collections.
    pub async fn run(&self) -> Result<u64> {
        // routers spread bulk load better when fed large tasks first
        let router = self.provider.is_router().await.context(ConnectSnafu)?;
        let priority = if self.options.workers > 1 || router {
            PriorityType::MultiDatabaseLtf
        } else {
            PriorityType::Legacy
        };
        self.manager.finalize(priority);

        let mut restored = self.restore_queued_intents().await?;

        if let Some(users) = self.manager.users() {
            restored += self
                .restore_into(&users, Namespace::new_unchecked("admin", "system.users"))
                .await?;
        }
        if let Some(roles) = self.manager.roles() {
            restored += self
                .restore_into(&roles, Namespace::new_unchecked("admin", "system.roles"))
                .await?;
        }

        for database in self.manager.index_databases() {
            if let Some(intent) = self.manager.system_indexes(&database) {
                self.apply_system_indexes(&intent).await?;
            }
        }

        if self.options.oplog_replay {
            if let Some(oplog) = self.manager.oplog() {
                self.replay_oplog(&oplog).await?;
            }
        }

        Ok(restored)
    }

    async fn restore_queued_intents(&self) -> Result<u64> {
        let ct = CancellationToken::new();
        let mut tasks = JoinSet::new();
        for worker in 0..self.options.workers.max(1) {
            let manager = Arc::clone(&self.manager);
            let provider = self.provider.clone();
            let options = self.options.clone();
            let ct = ct.clone();
            tasks.spawn(async move {
                let mut restored = 0u64;
                while !ct.is_cancelled() {
                    let Some(intent) = manager.pop() else {
                        break;
                    };
                    debug!(worker, key = intent.key(), "picked up intent");
                    let result = restore_intent(&provider, &options, &intent).await;
                    manager.finish(&intent);
                    restored += result?;
                }
                Ok(restored)
            });
        }

        let mut restored = 0u64;
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(count)) => restored += count,
                Ok(Err(error)) => {
                    ct.cancel();
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
                Err(join_error) => {
                    ct.cancel();
                    if first_error.is_none() {
                        first_error = Some(
                            WorkerSnafu {
                                message: join_error.to_string(),
                            }
                            .build(),
                        );
                    }
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(restored),
        }
    }

    /// Restores a side-channel intent's data file into a fixed target
    /// namespace.
    async fn restore_into(&self, intent: &Intent, target: Namespace) -> Result<u64> {
        let Some(data_path) = &intent.data_path else {
            return Ok(0);
        };
        info!(namespace = %target, "restoring special collection");
        ingest_data_file(&self.provider, &self.options, data_path, target).await
    }

    async fn apply_system_indexes(&self, intent: &Intent) -> Result<()> {
        let Some(data_path) = &intent.data_path else {
            return Ok(());
        };
        let session = self.provider.get_session().await.context(ConnectSnafu)?;
        let mut reader = open_data_file(self.options.objcheck, data_path)?;
        while let Some(index) = reader.read_document().map_err(|error| {
            IngestSnafu {
                namespace: intent.key(),
            }
            .into_error(error)
        })? {
            let Some(target) = index
                .get("ns")
                .and_then(Value::as_str)
                .and_then(|ns| ns.split_once('.'))
                .map(|(db, coll)| Namespace::new_unchecked(db, coll))
            else {
                debug!(key = intent.key(), "skipping index entry without ns");
                continue;
            };
            create_indexes(&session, &target, std::slice::from_ref(&index)).await?;
        }
        Ok(())
    }

    /// Replays the dumped oplog sequentially, last of all restore steps.
    async fn replay_oplog(&self, intent: &Intent) -> Result<()> {
        let Some(data_path) = &intent.data_path else {
            return Ok(());
        };
        info!("replaying oplog");
        let session = self.provider.get_session().await.context(ConnectSnafu)?;
        let mut reader = open_data_file(self.options.objcheck, data_path)?;
        let mut applied = 0u64;
        loop {
            let document = reader.read_document().map_err(|error| {
                IngestSnafu {
                    namespace: intent.key(),
                }
                .into_error(error)
            })?;
            let Some(document) = document else {
                break;
            };
            let entry = OplogEntry::from_document(&document).context(OplogReplaySnafu)?;
            if entry.is_noop() {
                continue;
            }
            apply_entry(&session, &entry)
                .await
                .context(OplogReplaySnafu)?;
            applied += 1;
        }
        info!(operations = applied, "oplog replay finished");
        Ok(())
    }
}

async fn restore_intent(
    provider: &SessionProviderRef,
    options: &RestoreOptions,
    intent: &Intent,
) -> Result<u64> {
    let namespace = intent.namespace.clone();
    info!(namespace = %namespace, "restoring collection");

    let metadata = match &intent.metadata_path {
        Some(path) => Some(read_metadata_file(path)?),
        None => None,
    };

    let session = provider.get_session().await.context(ConnectSnafu)?;
    if options.drop {
        drop_collection(&session, &namespace).await?;
    }

    let mut restored = 0;
    if let Some(data_path) = &intent.data_path {
        restored = ingest_data_file(provider, options, data_path, namespace.clone()).await?;
    }

    if let Some(CollectionMetadata { indexes, .. }) = metadata {
        if !indexes.is_empty() {
            create_indexes(&session, &namespace, &indexes).await?;
        }
    }

    Ok(restored)
}

async fn ingest_data_file(
    provider: &SessionProviderRef,
    options: &RestoreOptions,
    path: &Path,
    namespace: Namespace,
) -> Result<u64> {
    let reader = open_data_file(options.objcheck, path)?;
    let pipeline = IngestPipeline::new(
        provider.clone(),
        namespace.clone(),
        IngestOptions {
            batch_size: options.batch_size,
            stop_on_error: options.stop_on_error,
            ..Default::default()
        },
    );
    pipeline.run(reader).await.context(IngestSnafu {
        namespace: namespace.to_string(),
    })
}

fn open_data_file(objcheck: bool, path: &Path) -> Result<BinaryDocReader<BufReader<File>>> {
    let file = File::open(path).context(ReadFileSnafu { path })?;
    Ok(BinaryDocReader::new(objcheck, BufReader::new(file)))
}

async fn drop_collection(session: &SessionRef, namespace: &Namespace) -> Result<()> {
    match session.drop_collection(namespace).await {
        Ok(()) => Ok(()),
        // a collection that never existed needs no dropping
        Err(error) if error.is_not_found() => Ok(()),
        Err(error) => Err(error).context(CommandSnafu),
    }
}

/// Issues one `createIndexes` command, rewriting each specification's
/// `ns` to the restore target.
async fn create_indexes(
    session: &SessionRef,
    namespace: &Namespace,
    indexes: &[Document],
) -> Result<()> {
    let specs: Vec<Value> = indexes
        .iter()
        .map(|index| {
            let mut spec = index.clone();
            spec.insert("ns", namespace.to_string());
            Value::Document(spec)
        })
        .collect();
    let command = doc! {
        "createIndexes" => namespace.collection(),
        "indexes" => specs,
    };
    session
        .run_command(namespace.database(), command)
        .await
        .context(CommandSnafu)?;
    Ok(())
}
