use std::sync::Arc;

use caravan_client::{Namespace, SessionProviderRef, SessionRef};
use caravan_document::Document;
use snafu::ResultExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bulk::{BufferedBulkWriter, MAX_MESSAGE_SIZE};
use crate::error::{ConnectSnafu, FatalSnafu, IngestError, Result, WriteSnafu};
use crate::readers::RecordReader;

const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Ingest pipeline tuning and policy knobs.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Documents per batch, and the capacity of the inbound channel.
    pub batch_size: usize,
    /// Serialized-bytes budget per shipped batch.
    pub max_message_bytes: usize,
    /// Drop empty-string leaves before shipping. The import tool only
    /// sets this for delimited inputs.
    pub ignore_blanks: bool,
    /// Send one upsert per document instead of bulk inserts.
    pub upsert: bool,
    /// Keys projected into the upsert selector; implies per-document
    /// writes even without `upsert`.
    pub upsert_fields: Vec<String>,
    /// Abort on the first record or batch error instead of skipping.
    pub stop_on_error: bool,
    /// Number of consumer tasks; each owns its own session.
    pub workers: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_message_bytes: MAX_MESSAGE_SIZE,
            ignore_blanks: false,
            upsert: false,
            upsert_fields: Vec::new(),
            stop_on_error: false,
            workers: 1,
        }
    }
}

impl IngestOptions {
    fn per_document_writes(&self) -> bool {
        self.upsert || !self.upsert_fields.is_empty()
    }
}

/// Connects a record reader to the destination through a bounded channel.
///
/// One blocking producer task pulls documents from the reader; consumer
/// tasks drain the channel into size- and count-bounded batches and ship
/// them. The pipeline completes when the channel is closed and every
/// worker has returned; the first fatal error wins.
pub struct IngestPipeline {
    provider: SessionProviderRef,
    namespace: Namespace,
    options: IngestOptions,
}

impl IngestPipeline {
    pub fn new(provider: SessionProviderRef, namespace: Namespace, options: IngestOptions) -> Self {
        Self {
            provider,
            namespace,
            options,
        }
    }

    /// Runs the pipeline to completion and returns the number of
    /// documents the destination acknowledged.
    pub async fn run<R>(&self, reader: R) -> Result<u64>
    where
        R: RecordReader + 'static,
    {
        let workers = self.options.workers.max(1);
        let (tx, rx) = mpsc::channel::<Document>(self.options.batch_size.max(1));
        let ct = CancellationToken::new();

        let producer = spawn_producer(reader, tx, self.options.stop_on_error, ct.clone());

        let rx = Arc::new(Mutex::new(rx));
        let mut tasks = JoinSet::new();
        for worker in 0..workers {
            tasks.spawn(ingest_worker(
                worker,
                self.provider.clone(),
                self.namespace.clone(),
                self.options.clone(),
                Arc::clone(&rx),
                ct.clone(),
            ));
        }
        drop(rx);

        let mut ingested = 0u64;
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(count)) => ingested += count,
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
                            FatalSnafu {
                                message: join_error.to_string(),
                            }
                            .build(),
                        );
                    }
                }
            }
        }

        match producer.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
            Err(join_error) => {
                if first_error.is_none() {
                    first_error = Some(
                        FatalSnafu {
                            message: join_error.to_string(),
                        }
                        .build(),
                    );
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(ingested),
        }
    }
}

/// Pulls documents off the (blocking) reader and feeds the channel.
///
/// Closing the channel by returning is the EOF signal to the consumers.
fn spawn_producer<R>(
    mut reader: R,
    tx: mpsc::Sender<Document>,
    stop_on_error: bool,
    ct: CancellationToken,
) -> tokio::task::JoinHandle<Result<()>>
where
    R: RecordReader + 'static,
{
    tokio::task::spawn_blocking(move || {
        loop {
            if ct.is_cancelled() {
                return Ok(());
            }
            match reader.read_document() {
                Ok(Some(document)) => {
                    // consumers are gone; nothing left to feed
                    if tx.blocking_send(document).is_err() {
                        return Ok(());
                    }
                }
                Ok(None) => return Ok(()),
                Err(error) if stop_on_error => return Err(error),
                Err(error) => {
                    warn!(error = %error, "error reading document");
                }
            }
        }
    })
}

async fn ingest_worker(
    worker: usize,
    provider: SessionProviderRef,
    namespace: Namespace,
    options: IngestOptions,
    inbound: Arc<Mutex<mpsc::Receiver<Document>>>,
    ct: CancellationToken,
) -> Result<u64> {
    let session = provider.get_session().await.context(ConnectSnafu)?;
    // long bulk writes are expected on this path
    session.set_socket_timeout(None);

    if options.per_document_writes() {
        return upsert_worker(session, namespace, options, inbound, ct).await;
    }

    let mut writer =
        BufferedBulkWriter::new(session, namespace, options.batch_size, !options.stop_on_error)
            .with_max_message_bytes(options.max_message_bytes);
    let mut ingested = 0u64;

    loop {
        let received = {
            let mut inbound = inbound.lock().await;
            tokio::select! {
                _ = ct.cancelled() => return Ok(ingested),
                received = inbound.recv() => received,
            }
        };
        let Some(mut document) = received else {
            break;
        };

        if options.ignore_blanks {
            document.remove_blank_fields();
        }

        match writer.insert(document).await {
            Ok(0) => {}
            Ok(acknowledged) => {
                ingested += acknowledged;
                debug!(worker, documents = ingested, "progress");
            }
            Err(error) => ingested += absorb_batch_error(error, &options)?,
        }
    }

    // channel closed: ship whatever is left
    match writer.flush().await {
        Ok(acknowledged) => ingested += acknowledged,
        Err(error) => ingested += absorb_batch_error(error, &options)?,
    }
    Ok(ingested)
}

/// Per-document upsert loop; this path trades throughput for
/// per-document selector semantics.
async fn upsert_worker(
    session: SessionRef,
    namespace: Namespace,
    options: IngestOptions,
    inbound: Arc<Mutex<mpsc::Receiver<Document>>>,
    ct: CancellationToken,
) -> Result<u64> {
    let mut ingested = 0u64;
    loop {
        let received = {
            let mut inbound = inbound.lock().await;
            tokio::select! {
                _ = ct.cancelled() => return Ok(ingested),
                received = inbound.recv() => received,
            }
        };
        let Some(mut document) = received else {
            return Ok(ingested);
        };

        if options.ignore_blanks {
            document.remove_blank_fields();
        }

        let sent = match upsert_selector(&options.upsert_fields, &document) {
            Some(selector) => session
                .upsert(&namespace, selector, document)
                .await
                .context(WriteSnafu),
            None => session
                .insert(&namespace, document)
                .await
                .context(WriteSnafu),
        };
        match sent {
            Ok(()) => ingested += 1,
            Err(error) => ingested += absorb_batch_error(error, &options)?,
        }
    }
}

/// Applies the batch-level error policy: unreachable destinations are
/// always fatal, everything else only under stop-on-error. Record-level
/// encode failures are skippable the same way.
fn absorb_batch_error(error: IngestError, options: &IngestOptions) -> Result<u64> {
    if error.is_unreachable() || options.stop_on_error {
        return Err(error);
    }
    if error.is_record_error() {
        warn!(error = %error, "skipping document");
    } else {
        warn!(error = %error, "error inserting documents");
    }
    Ok(0)
}

/// Projects the recognized upsert fields out of a document; `None` when
/// no field matches, which falls back to a plain insert.
fn upsert_selector(fields: &[String], document: &Document) -> Option<Document> {
    let mut selector = Document::new();
    for field in fields {
        if let Some(value) = document.get_path(field) {
            selector.insert(field.clone(), value.clone());
        }
    }
    (!selector.is_empty()).then_some(selector)
}

#[cfg(test)]
mod tests {
    use caravan_client::MemoryDestination;
    use caravan_document::{Value, doc};

    use super::*;
    use crate::error::IngestError;
    use crate::readers::JsonReader;

    fn json_reader(input: &str) -> JsonReader<std::io::Cursor<Vec<u8>>> {
        JsonReader::new(false, std::io::Cursor::new(input.as_bytes().to_vec()))
    }

    fn pipeline(
        destination: &MemoryDestination,
        options: IngestOptions,
    ) -> (IngestPipeline, Namespace) {
        let namespace = Namespace::new_unchecked("imports", "things");
        (
            IngestPipeline::new(
                Arc::new(destination.clone()),
                namespace.clone(),
                options,
            ),
            namespace,
        )
    }

    #[tokio::test]
    async fn test_ingests_every_source_record() {
        let destination = MemoryDestination::new();
        let (pipeline, namespace) = pipeline(&destination, IngestOptions::default());

        let input: String = (0..257).map(|i| format!("{{\"_id\": {i}}}")).collect();
        let ingested = pipeline.run(json_reader(&input)).await.unwrap();

        assert_eq!(ingested, 257);
        assert_eq!(destination.count(&namespace).await, 257);
    }

    #[tokio::test]
    async fn test_batches_respect_the_size_budget() {
        let destination = MemoryDestination::new();
        let options = IngestOptions {
            batch_size: 100,
            max_message_bytes: 64,
            ..Default::default()
        };
        let (pipeline, namespace) = pipeline(&destination, options);

        let input: String = (0..10)
            .map(|i| format!("{{\"_id\": {i}, \"pad\": \"xxxxxxxxxx\"}}"))
            .collect();
        let ingested = pipeline.run(json_reader(&input)).await.unwrap();

        assert_eq!(ingested, 10);
        assert_eq!(destination.count(&namespace).await, 10);
    }

    #[tokio::test]
    async fn test_parse_errors_are_skipped_by_default() {
        let destination = MemoryDestination::new();
        let (pipeline, namespace) = pipeline(&destination, IngestOptions::default());

        let input = "{\"a\": 1}\nnot-json\n{\"b\": 2}";
        // the lenient policy logs and keeps reading
        let ingested = pipeline.run(json_reader(input)).await.unwrap();

        assert_eq!(ingested, 2);
        assert_eq!(destination.count(&namespace).await, 2);
    }

    #[tokio::test]
    async fn test_parse_errors_abort_with_stop_on_error() {
        let destination = MemoryDestination::new();
        let options = IngestOptions {
            stop_on_error: true,
            ..Default::default()
        };
        let (pipeline, _) = pipeline(&destination, options);

        let input = "{\"a\": 1}\nnot-json\n{\"b\": 2}";
        let err = pipeline.run(json_reader(input)).await.unwrap_err();
        assert!(matches!(err, IngestError::Parse { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_batch_write_errors_discard_the_batch_and_continue() {
        let destination = MemoryDestination::new();
        let options = IngestOptions {
            batch_size: 1,
            ..Default::default()
        };
        let (pipeline, namespace) = pipeline(&destination, options);
        destination.fail_next_writes(1);

        let input = "{\"a\": 1}{\"b\": 2}{\"c\": 3}";
        let ingested = pipeline.run(json_reader(input)).await.unwrap();

        assert_eq!(ingested, 2);
        assert_eq!(destination.count(&namespace).await, 2);
    }

    #[tokio::test]
    async fn test_batch_write_errors_abort_with_stop_on_error() {
        let destination = MemoryDestination::new();
        let options = IngestOptions {
            batch_size: 1,
            stop_on_error: true,
            ..Default::default()
        };
        let (pipeline, _) = pipeline(&destination, options);
        destination.fail_next_writes(1);

        let err = pipeline
            .run(json_reader("{\"a\": 1}{\"b\": 2}"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Write { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_always_fatal() {
        let destination = MemoryDestination::new();
        let (pipeline, _) = pipeline(&destination, IngestOptions::default());
        destination.set_unreachable(true);

        let err = pipeline.run(json_reader("{\"a\": 1}")).await.unwrap_err();
        assert!(err.is_unreachable(), "{err}");
    }

    #[tokio::test]
    async fn test_ignore_blanks_drops_empty_string_leaves() {
        let destination = MemoryDestination::new();
        let options = IngestOptions {
            ignore_blanks: true,
            ..Default::default()
        };
        let (pipeline, namespace) = pipeline(&destination, options);

        pipeline
            .run(json_reader("{\"a\": \"\", \"b\": 1}"))
            .await
            .unwrap();

        assert_eq!(
            destination.documents(&namespace).await,
            vec![doc! {"b" => 1i64}]
        );
    }

    #[tokio::test]
    async fn test_upsert_fields_replace_matching_documents() {
        let destination = MemoryDestination::new();
        let options = IngestOptions {
            upsert: true,
            upsert_fields: vec!["_id".to_string()],
            ..Default::default()
        };
        let (pipeline, namespace) = pipeline(&destination, options);

        let input = "{\"_id\": 1, \"v\": \"a\"}{\"_id\": 1, \"v\": \"b\"}{\"v\": \"no-selector\"}";
        let ingested = pipeline.run(json_reader(input)).await.unwrap();

        assert_eq!(ingested, 3);
        let documents = destination.documents(&namespace).await;
        assert_eq!(documents.len(), 2);
        assert_eq!(
            documents[0],
            doc! {"_id" => 1i64, "v" => "b"}
        );
    }

    #[tokio::test]
    async fn test_concurrent_workers_ingest_everything() {
        let destination = MemoryDestination::new();
        let options = IngestOptions {
            batch_size: 8,
            workers: 4,
            ..Default::default()
        };
        let (pipeline, namespace) = pipeline(&destination, options);

        let input: String = (0..500).map(|i| format!("{{\"_id\": {i}}}")).collect();
        let ingested = pipeline.run(json_reader(&input)).await.unwrap();

        assert_eq!(ingested, 500);
        let documents = destination.documents(&namespace).await;
        assert_eq!(documents.len(), 500);
        for i in 0..500 {
            assert!(
                documents
                    .iter()
                    .any(|d| d.get("_id") == Some(&Value::Int64(i))),
                "missing _id {i}"
            );
        }
    }

    #[test]
    fn test_upsert_selector_projects_recognized_fields() {
        let fields = vec!["_id".to_string(), "k".to_string()];
        let document = doc! {"_id" => 1, "v" => "x"};
        assert_eq!(
            upsert_selector(&fields, &document),
            Some(doc! {"_id" => 1})
        );
        assert_eq!(upsert_selector(&fields, &doc! {"v" => "x"}), None);
        assert_eq!(upsert_selector(&[], &document), None);
    }
}
