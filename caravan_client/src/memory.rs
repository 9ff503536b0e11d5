//! In-memory implementation of the destination traits.
//!
//! This destination stores all data in memory and backs the `mem://` dev
//! mode and the test suites. It uses an RwLock for thread-safe access and
//! exposes failure-injection knobs so callers can exercise their error
//! policies without a server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use caravan_document::{Document, Value, doc};
use futures::stream;
use tokio::sync::RwLock;

use crate::error::{NoReachableServerSnafu, NotFoundSnafu, Result, ServerSnafu};
use crate::namespace::Namespace;
use crate::session::{
    BulkResult, DocumentStream, Session, SessionMode, SessionProvider, SessionRef,
};

#[derive(Debug, Default)]
struct MemoryStore {
    /// Map of namespace key to stored documents, in insertion order.
    collections: HashMap<String, Vec<Document>>,
    /// Map of namespace key to index specifications.
    indexes: HashMap<String, Vec<Document>>,
    /// Number of `applyOps` commands received, successful or not.
    apply_ops_received: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    store: RwLock<MemoryStore>,
    mode: Mutex<SessionMode>,
    unreachable: AtomicBool,
    fail_writes: AtomicUsize,
    fail_apply_ops: AtomicUsize,
}

/// In-memory destination for development and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    state: Arc<MemoryState>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with `NoReachableServer`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Fails the next `count` write operations with a server error.
    pub fn fail_next_writes(&self, count: usize) {
        self.state.fail_writes.store(count, Ordering::SeqCst);
    }

    /// Answers the next `count` `applyOps` commands with `ok: 0`.
    pub fn fail_next_apply_ops(&self, count: usize) {
        self.state.fail_apply_ops.store(count, Ordering::SeqCst);
    }

    pub async fn documents(&self, namespace: &Namespace) -> Vec<Document> {
        let store = self.state.store.read().await;
        store
            .collections
            .get(&namespace.key())
            .cloned()
            .unwrap_or_default()
    }

    pub async fn count(&self, namespace: &Namespace) -> usize {
        self.documents(namespace).await.len()
    }

    pub async fn indexes(&self, namespace: &Namespace) -> Vec<Document> {
        let store = self.state.store.read().await;
        store
            .indexes
            .get(&namespace.key())
            .cloned()
            .unwrap_or_default()
    }

    pub async fn apply_ops_received(&self) -> usize {
        self.state.store.read().await.apply_ops_received
    }

    /// The consistency mode last set through the provider.
    pub fn mode(&self) -> SessionMode {
        self.state.mode.lock().map(|mode| *mode).unwrap_or_default()
    }

    /// Seeds a collection directly, bypassing the session gates.
    pub async fn seed(&self, namespace: &Namespace, documents: Vec<Document>) {
        let mut store = self.state.store.write().await;
        store
            .collections
            .entry(namespace.key())
            .or_default()
            .extend(documents);
    }
}

#[async_trait]
impl SessionProvider for MemoryDestination {
    async fn get_session(&self) -> Result<SessionRef> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return NoReachableServerSnafu {}.fail();
        }
        Ok(Arc::new(MemorySession {
            state: self.state.clone(),
        }))
    }

    fn set_mode(&self, mode: SessionMode) {
        if let Ok(mut current) = self.state.mode.lock() {
            *current = mode;
        }
    }

    async fn is_router(&self) -> Result<bool> {
        Ok(false)
    }
}

struct MemorySession {
    state: Arc<MemoryState>,
}

impl MemorySession {
    fn gate_write(&self) -> Result<()> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return NoReachableServerSnafu {}.fail();
        }
        if take_one(&self.state.fail_writes) {
            return ServerSnafu {
                errmsg: "injected write failure",
            }
            .fail();
        }
        Ok(())
    }
}

#[async_trait]
impl Session for MemorySession {
    fn set_socket_timeout(&self, _timeout: Option<Duration>) {}

    async fn bulk_insert(
        &self,
        namespace: &Namespace,
        documents: Vec<Document>,
        _ordered: bool,
    ) -> Result<BulkResult> {
        self.gate_write()?;
        let inserted = documents.len() as u64;
        let mut store = self.state.store.write().await;
        store
            .collections
            .entry(namespace.key())
            .or_default()
            .extend(documents);
        Ok(BulkResult { inserted })
    }

    async fn insert(&self, namespace: &Namespace, document: Document) -> Result<()> {
        self.gate_write()?;
        let mut store = self.state.store.write().await;
        store
            .collections
            .entry(namespace.key())
            .or_default()
            .push(document);
        Ok(())
    }

    async fn upsert(
        &self,
        namespace: &Namespace,
        selector: Document,
        document: Document,
    ) -> Result<()> {
        self.gate_write()?;
        let mut store = self.state.store.write().await;
        let collection = store.collections.entry(namespace.key()).or_default();
        match collection
            .iter_mut()
            .find(|existing| matches_filter(existing, &selector))
        {
            Some(existing) => *existing = document,
            None => collection.push(document),
        }
        Ok(())
    }

    async fn drop_collection(&self, namespace: &Namespace) -> Result<()> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return NoReachableServerSnafu {}.fail();
        }
        let mut store = self.state.store.write().await;
        store.indexes.remove(&namespace.key());
        if store.collections.remove(&namespace.key()).is_none() {
            return NotFoundSnafu {
                namespace: namespace.to_string(),
            }
            .fail();
        }
        Ok(())
    }

    async fn find(&self, namespace: &Namespace, filter: Document) -> Result<DocumentStream> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return NoReachableServerSnafu {}.fail();
        }
        let store = self.state.store.read().await;
        let matching: Vec<Result<Document>> = store
            .collections
            .get(&namespace.key())
            .into_iter()
            .flatten()
            .filter(|document| matches_filter(document, &filter))
            .cloned()
            .map(Ok)
            .collect();
        Ok(Box::pin(stream::iter(matching)))
    }

    async fn run_command(&self, database: &str, command: Document) -> Result<Document> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return NoReachableServerSnafu {}.fail();
        }

        if let Some(Value::Array(operations)) = command.get("applyOps") {
            let mut store = self.state.store.write().await;
            store.apply_ops_received += 1;
            if take_one(&self.state.fail_apply_ops) {
                return Ok(doc! {"ok" => 0, "errmsg" => "injected applyOps failure"});
            }
            for operation in operations {
                let Some(entry) = operation.as_document() else {
                    return ServerSnafu {
                        errmsg: "applyOps entries must be documents",
                    }
                    .fail();
                };
                apply_operation(&mut store, entry)?;
            }
            return Ok(doc! {"ok" => 1});
        }

        if let Some(collection) = command.get("createIndexes").and_then(Value::as_str) {
            let key = format!("{database}.{collection}");
            let specs = match command.get("indexes") {
                Some(Value::Array(specs)) => specs
                    .iter()
                    .filter_map(|spec| spec.as_document().cloned())
                    .collect(),
                _ => Vec::new(),
            };
            let mut store = self.state.store.write().await;
            store.indexes.entry(key).or_default().extend(specs);
            return Ok(doc! {"ok" => 1});
        }

        if command.contains_key("ping") {
            return Ok(doc! {"ok" => 1});
        }

        let name = command.keys().next().unwrap_or("<empty>");
        ServerSnafu {
            errmsg: format!("no such command: {name}"),
        }
        .fail()
    }
}

fn apply_operation(store: &mut MemoryStore, entry: &Document) -> Result<()> {
    let Some(op) = entry.get("op").and_then(Value::as_str) else {
        return ServerSnafu {
            errmsg: "applyOps entry is missing its op field",
        }
        .fail();
    };
    let Some(ns) = entry.get("ns").and_then(Value::as_str) else {
        return ServerSnafu {
            errmsg: "applyOps entry is missing its ns field",
        }
        .fail();
    };
    let object = entry
        .get("o")
        .and_then(Value::as_document)
        .cloned()
        .unwrap_or_default();

    let collection = store.collections.entry(ns.to_string()).or_default();
    match op {
        "i" => collection.push(object),
        "u" => {
            let selector = entry
                .get("o2")
                .and_then(Value::as_document)
                .cloned()
                .unwrap_or_default();
            match collection
                .iter_mut()
                .find(|existing| matches_filter(existing, &selector))
            {
                Some(existing) => *existing = object,
                None => collection.push(object),
            }
        }
        "d" => collection.retain(|existing| !matches_filter(existing, &object)),
        // commands and unknown ops are acknowledged without effect
        _ => {}
    }
    Ok(())
}

/// Matches the filter subset the tools use: field equality on dotted
/// paths, plus `$gte` range bounds for the oplog tail.
fn matches_filter(document: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, condition)| match condition {
        Value::Document(spec) if spec.contains_key("$gte") => {
            match (document.get_path(key), spec.get("$gte")) {
                (Some(value), Some(bound)) => value_gte(value, bound),
                _ => false,
            }
        }
        expected => document.get_path(key) == Some(expected),
    })
}

fn value_gte(value: &Value, bound: &Value) -> bool {
    match (value, bound) {
        (Value::Timestamp(a), Value::Timestamp(b)) => a >= b,
        (Value::String(a), Value::String(b)) => a >= b,
        (Value::DateTime(a), Value::DateTime(b)) => a >= b,
        _ => match (numeric(value), numeric(bound)) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        },
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Int32(v) => Some(f64::from(*v)),
        Value::Int64(v) => Some(*v as f64),
        Value::Double(v) => Some(*v),
        _ => None,
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
