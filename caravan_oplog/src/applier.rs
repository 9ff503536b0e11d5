use std::time::{SystemTime, UNIX_EPOCH};

use caravan_client::{Namespace, SessionProviderRef, SessionRef};
use caravan_document::{Document, Value, doc};
use futures::TryStreamExt;
use snafu::ResultExt;
use tracing::{debug, info};

use crate::entry::OplogEntry;
use crate::error::{ApplySnafu, QuerySnafu, RejectedSnafu, Result};

const DEFAULT_LOOKBACK_SECONDS: u64 = 86_400;

/// Replays a source server's operation log against a destination.
///
/// Entries are applied one at a time through the destination's
/// `applyOps` admin command; replay safety relies on the operations
/// being idempotent at the protocol level.
pub struct OplogApplier {
    source: SessionProviderRef,
    destination: SessionProviderRef,
    oplog_namespace: Namespace,
    lookback_seconds: u64,
}

impl OplogApplier {
    pub fn new(
        source: SessionProviderRef,
        destination: SessionProviderRef,
        oplog_namespace: Namespace,
    ) -> Self {
        Self {
            source,
            destination,
            oplog_namespace,
            lookback_seconds: DEFAULT_LOOKBACK_SECONDS,
        }
    }

    pub fn with_lookback_seconds(mut self, seconds: u64) -> Self {
        self.lookback_seconds = seconds;
        self
    }

    /// Drains the source oplog from the lookback bound onward and
    /// returns the number of operations applied.
    pub async fn run(&self) -> Result<u64> {
        let source = self.source.get_session().await.context(QuerySnafu)?;
        let destination = self.destination.get_session().await.context(ApplySnafu)?;

        let start = lookback_timestamp(self.lookback_seconds);
        debug!(timestamp = start, "tailing oplog");
        let filter = doc! {"ts" => doc! {"$gte" => Value::Timestamp(start)}};
        let mut entries = source
            .find(&self.oplog_namespace, filter)
            .await
            .context(QuerySnafu)?;

        let mut applied = 0u64;
        while let Some(raw) = entries.try_next().await.context(QuerySnafu)? {
            let entry = OplogEntry::from_document(&raw)?;
            if entry.is_noop() {
                continue;
            }
            apply_entry(&destination, &entry).await?;
            applied += 1;
        }

        info!(operations = applied, "oplog replay finished");
        Ok(applied)
    }
}

/// Wraps one entry in an `applyOps` command against the destination's
/// admin database and checks the response.
pub async fn apply_entry(destination: &SessionRef, entry: &OplogEntry) -> Result<()> {
    let command = doc! {"applyOps" => vec![Value::Document(entry.to_document())]};
    let response = destination
        .run_command("admin", command)
        .await
        .context(ApplySnafu)?;
    if !response_ok(&response) {
        let errmsg = response
            .get("errmsg")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return RejectedSnafu { errmsg }.fail();
    }
    Ok(())
}

/// The `$gte` bound for the tail: the lookback in seconds pushed into
/// the high half of the composite timestamp, ordinal zeroed.
pub fn lookback_timestamp(seconds: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    now.saturating_sub(seconds) << 32
}

fn response_ok(response: &Document) -> bool {
    match response.get("ok") {
        Some(Value::Int32(v)) => *v == 1,
        Some(Value::Int64(v)) => *v == 1,
        Some(Value::Double(v)) => *v == 1.0,
        Some(Value::Bool(v)) => *v,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use caravan_client::MemoryDestination;

    use super::*;
    use crate::error::OplogError;

    fn oplog_namespace() -> Namespace {
        Namespace::new_unchecked("local", "oplog.rs")
    }

    fn recent_ts(ordinal: u64) -> u64 {
        lookback_timestamp(0) | ordinal
    }

    async fn seed_oplog(source: &MemoryDestination, entries: Vec<Document>) {
        source.seed(&oplog_namespace(), entries).await;
    }

    #[tokio::test]
    async fn test_noops_are_never_applied() {
        let source = MemoryDestination::new();
        let destination = MemoryDestination::new();
        seed_oplog(
            &source,
            vec![
                doc! {"ts" => Value::Timestamp(recent_ts(1)), "op" => "n", "ns" => "", "o" => Document::new()},
                doc! {"ts" => Value::Timestamp(recent_ts(2)), "op" => "n", "ns" => "", "o" => Document::new()},
            ],
        )
        .await;

        let applier = OplogApplier::new(
            Arc::new(source),
            Arc::new(destination.clone()),
            oplog_namespace(),
        )
        .with_lookback_seconds(3600);

        let applied = applier.run().await.unwrap();
        assert_eq!(applied, 0);
        assert_eq!(destination.apply_ops_received().await, 0);
    }

    #[tokio::test]
    async fn test_inserts_are_replayed_on_the_destination() {
        let source = MemoryDestination::new();
        let destination = MemoryDestination::new();
        seed_oplog(
            &source,
            vec![
                doc! {"ts" => Value::Timestamp(recent_ts(1)), "op" => "i", "ns" => "db.things", "o" => doc! {"_id" => 1}},
                doc! {"ts" => Value::Timestamp(recent_ts(2)), "op" => "n", "ns" => "", "o" => Document::new()},
                doc! {"ts" => Value::Timestamp(recent_ts(3)), "op" => "i", "ns" => "db.things", "o" => doc! {"_id" => 2}},
            ],
        )
        .await;

        let applier = OplogApplier::new(
            Arc::new(source),
            Arc::new(destination.clone()),
            oplog_namespace(),
        )
        .with_lookback_seconds(3600);

        let applied = applier.run().await.unwrap();
        assert_eq!(applied, 2);
        assert_eq!(destination.apply_ops_received().await, 2);

        let things = Namespace::new_unchecked("db", "things");
        assert_eq!(destination.count(&things).await, 2);
    }

    #[tokio::test]
    async fn test_entries_outside_the_lookback_are_skipped() {
        let source = MemoryDestination::new();
        let destination = MemoryDestination::new();
        seed_oplog(
            &source,
            vec![
                // far in the past, outside any reasonable lookback
                doc! {"ts" => Value::Timestamp(1u64 << 32), "op" => "i", "ns" => "db.things", "o" => doc! {"_id" => 1}},
                doc! {"ts" => Value::Timestamp(recent_ts(1)), "op" => "i", "ns" => "db.things", "o" => doc! {"_id" => 2}},
            ],
        )
        .await;

        let applier = OplogApplier::new(
            Arc::new(source),
            Arc::new(destination.clone()),
            oplog_namespace(),
        )
        .with_lookback_seconds(60);

        let applied = applier.run().await.unwrap();
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn test_rejected_apply_ops_is_an_error() {
        let source = MemoryDestination::new();
        let destination = MemoryDestination::new();
        seed_oplog(
            &source,
            vec![
                doc! {"ts" => Value::Timestamp(recent_ts(1)), "op" => "i", "ns" => "db.things", "o" => doc! {"_id" => 1}},
            ],
        )
        .await;
        destination.fail_next_apply_ops(1);

        let applier = OplogApplier::new(
            Arc::new(source),
            Arc::new(destination),
            oplog_namespace(),
        )
        .with_lookback_seconds(3600);

        let err = applier.run().await.unwrap_err();
        match err {
            OplogError::Rejected { errmsg } => {
                assert!(errmsg.contains("injected"), "{errmsg}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
