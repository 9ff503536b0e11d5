use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use caravan_document::Document;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::namespace::Namespace;

pub type SessionProviderRef = Arc<dyn SessionProvider>;
pub type SessionRef = Arc<dyn Session>;

/// A lazily evaluated sequence of documents from a `find`.
pub type DocumentStream = BoxStream<'static, Result<Document>>;

/// Consistency mode applied to sessions vended after the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Reads and writes go to the primary.
    #[default]
    Primary,
    /// Reads may be answered by a secondary once one has been used.
    Monotonic,
    /// Reads go to any member.
    Eventual,
}

/// Vends independent [`Session`]s against one destination.
///
/// The provider is shared read-only across tasks; sessions must not be
/// shared across concurrent writers.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn get_session(&self) -> Result<SessionRef>;

    /// Sets the consistency mode for sessions vended after the call.
    fn set_mode(&self, mode: SessionMode);

    /// Whether the destination is a routing proxy in front of shards.
    async fn is_router(&self) -> Result<bool>;
}

/// Acknowledgement summary for one bulk write.
#[derive(Debug, Clone, Default)]
pub struct BulkResult {
    pub inserted: u64,
}

/// One connection to the destination.
#[async_trait]
pub trait Session: Send + Sync {
    /// `None` disables the timeout; long bulk writes are expected on the
    /// ingest path.
    fn set_socket_timeout(&self, timeout: Option<Duration>);

    /// Issues one bulk insert. The ordered variant stops at the first
    /// failure; the unordered variant attempts every document.
    async fn bulk_insert(
        &self,
        namespace: &Namespace,
        documents: Vec<Document>,
        ordered: bool,
    ) -> Result<BulkResult>;

    async fn insert(&self, namespace: &Namespace, document: Document) -> Result<()>;

    /// Replaces the first document matching `selector`, inserting when
    /// nothing matches.
    async fn upsert(
        &self,
        namespace: &Namespace,
        selector: Document,
        document: Document,
    ) -> Result<()>;

    async fn drop_collection(&self, namespace: &Namespace) -> Result<()>;

    async fn find(&self, namespace: &Namespace, filter: Document) -> Result<DocumentStream>;

    /// Runs a database command and returns the raw response document.
    async fn run_command(&self, database: &str, command: Document) -> Result<Document>;
}
