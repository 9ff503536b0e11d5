use caravan_client::{Namespace, SessionRef};
use caravan_document::{Document, wire};
use snafu::ResultExt;

use crate::error::{EncodeSnafu, Result, WriteSnafu};

/// Largest bulk message the writer will assemble. The server caps
/// messages at 48 MB; staying under 47 MB leaves room for the command
/// header.
pub const MAX_MESSAGE_SIZE: usize = 47 * 1000 * 1000;

/// Accumulates documents and flushes them as single bulk inserts.
///
/// The writer is single-owner: it wraps one session and must not be
/// shared across concurrent tasks. After construction and after every
/// flush the buffer is empty and both counters are zero.
pub struct BufferedBulkWriter {
    session: SessionRef,
    namespace: Namespace,
    doc_limit: usize,
    max_message_bytes: usize,
    continue_on_error: bool,

    documents: Vec<Document>,
    byte_count: usize,

    flush_count: u64,
}

impl BufferedBulkWriter {
    pub fn new(
        session: SessionRef,
        namespace: Namespace,
        doc_limit: usize,
        continue_on_error: bool,
    ) -> Self {
        Self {
            session,
            namespace,
            doc_limit,
            max_message_bytes: MAX_MESSAGE_SIZE,
            continue_on_error,
            documents: Vec::new(),
            byte_count: 0,
            flush_count: 0,
        }
    }

    pub fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }

    /// Buffers a document for bulk insertion, flushing first when the
    /// buffer is full by document count or the document would push the
    /// message past the size budget. Returns the number of documents the
    /// destination acknowledged along the way.
    /// A failed flush discards that batch but still buffers `document`,
    /// so one bad batch cannot take an unrelated document with it.
    pub async fn insert(&mut self, document: Document) -> Result<u64> {
        let encoded_len = wire::encoded_size(&document).context(EncodeSnafu)?;
        let mut flushed = Ok(0);
        if self.documents.len() >= self.doc_limit
            || self.byte_count + encoded_len > self.max_message_bytes
        {
            flushed = self.flush().await;
        }
        self.byte_count += encoded_len;
        self.documents.push(document);
        flushed
    }

    /// Sends all buffered documents in one bulk insert and resets the
    /// buffer, returning the acknowledged document count. An empty buffer
    /// is a successful no-op. A failed batch is discarded.
    pub async fn flush(&mut self) -> Result<u64> {
        self.flush_count += 1;
        if self.documents.is_empty() {
            return Ok(0);
        }
        let documents = std::mem::take(&mut self.documents);
        self.byte_count = 0;
        let result = self
            .session
            .bulk_insert(&self.namespace, documents, !self.continue_on_error)
            .await
            .context(WriteSnafu)?;
        Ok(result.inserted)
    }

    pub fn buffered_docs(&self) -> usize {
        self.documents.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.byte_count
    }

    /// Number of flushes issued, for observation only.
    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }
}

#[cfg(test)]
mod tests {
    use caravan_client::{MemoryDestination, SessionProvider};
    use caravan_document::{Value, doc};

    use super::*;

    async fn new_writer(
        collection: &str,
        doc_limit: usize,
    ) -> (MemoryDestination, Namespace, BufferedBulkWriter) {
        let destination = MemoryDestination::new();
        let session = destination.get_session().await.unwrap();
        let namespace = Namespace::new_unchecked("tools-test", collection);
        let writer = BufferedBulkWriter::new(session, namespace.clone(), doc_limit, false);
        (destination, namespace, writer)
    }

    #[tokio::test]
    async fn test_doc_limit_three_flushes_three_times() {
        let (_destination, _ns, mut writer) = new_writer("bulk1", 3).await;

        for _ in 0..10 {
            writer.insert(Document::new()).await.unwrap();
        }

        assert_eq!(writer.flush_count(), 3);
        assert_eq!(writer.buffered_docs(), 1);
    }

    #[tokio::test]
    async fn test_doc_limit_one_flushes_every_insert() {
        let (_destination, _ns, mut writer) = new_writer("bulk2", 1).await;

        for _ in 0..10 {
            writer.insert(Document::new()).await.unwrap();
        }
        writer.flush().await.unwrap();

        assert_eq!(writer.flush_count(), 10);
        assert_eq!(writer.buffered_docs(), 0);
        assert_eq!(writer.buffered_bytes(), 0);
    }

    #[tokio::test]
    async fn test_thousand_documents_all_arrive() {
        let (destination, namespace, mut writer) = new_writer("bulk3", 100).await;

        for i in 0..1000 {
            writer.insert(doc! {"_id" => i}).await.unwrap();
        }
        writer.flush().await.unwrap();

        let documents = destination.documents(&namespace).await;
        assert_eq!(documents.len(), 1000);
        for id in [1, 477, 999] {
            assert!(
                documents.iter().any(|d| d.get("_id") == Some(&Value::Int32(id))),
                "missing _id {id}"
            );
        }
    }

    #[tokio::test]
    async fn test_size_budget_forces_flush() {
        let destination = MemoryDestination::new();
        let session = destination.get_session().await.unwrap();
        let namespace = Namespace::new_unchecked("tools-test", "bulk4");
        let mut writer = BufferedBulkWriter::new(session, namespace.clone(), 1000, false)
            .with_max_message_bytes(64);

        // each document is well under the budget, two together are not
        for _ in 0..2 {
            writer
                .insert(doc! {"payload" => "x".repeat(40)})
                .await
                .unwrap();
        }

        assert_eq!(writer.flush_count(), 1);
        assert_eq!(writer.buffered_docs(), 1);
        assert_eq!(destination.count(&namespace).await, 1);
    }

    #[tokio::test]
    async fn test_flush_on_empty_buffer_is_a_no_op() {
        let (destination, namespace, mut writer) = new_writer("bulk5", 3).await;

        writer.flush().await.unwrap();
        assert_eq!(writer.flush_count(), 1);
        assert_eq!(destination.count(&namespace).await, 0);
    }
}
