use caravan_document::{Document, Value, doc};

use crate::error::{EntrySnafu, Result};

/// The operation code for a no-op heartbeat entry, which is never
/// replayed.
pub const OP_NOOP: &str = "n";

/// One entry of the source's operation log.
///
/// Wire field names follow the log's object form: `ts`, `h`, `v`, `op`,
/// `ns`, `o`, `o2`.
#[derive(Debug, Clone, PartialEq)]
pub struct OplogEntry {
    /// Composite `(unix_seconds << 32) | ordinal` timestamp.
    pub timestamp: u64,
    pub history_id: i64,
    pub version: i32,
    /// Operation code: `i`nsert, `u`pdate, `d`elete, `c`ommand, `n`o-op.
    pub operation: String,
    pub namespace: String,
    pub object: Document,
    pub query: Document,
}

impl OplogEntry {
    pub fn is_noop(&self) -> bool {
        self.operation == OP_NOOP
    }

    /// Interprets a raw log document. Only the operation code is
    /// mandatory; the rest defaults like the wire decoder would.
    pub fn from_document(document: &Document) -> Result<Self> {
        let Some(operation) = document.get("op").and_then(Value::as_str) else {
            return EntrySnafu {
                message: "missing op field",
            }
            .fail();
        };
        let timestamp = match document.get("ts") {
            Some(Value::Timestamp(ts)) => *ts,
            _ => 0,
        };
        let history_id = match document.get("h") {
            Some(Value::Int64(h)) => *h,
            _ => 0,
        };
        let version = match document.get("v") {
            Some(Value::Int32(v)) => *v,
            Some(Value::Int64(v)) => *v as i32,
            _ => 0,
        };
        let namespace = document
            .get("ns")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let object = document
            .get("o")
            .and_then(Value::as_document)
            .cloned()
            .unwrap_or_default();
        let query = document
            .get("o2")
            .and_then(Value::as_document)
            .cloned()
            .unwrap_or_default();

        Ok(Self {
            timestamp,
            history_id,
            version,
            operation: operation.to_string(),
            namespace,
            object,
            query,
        })
    }

    pub fn to_document(&self) -> Document {
        doc! {
            "ts" => Value::Timestamp(self.timestamp),
            "h" => self.history_id,
            "v" => self.version,
            "op" => self.operation.as_str(),
            "ns" => self.namespace.as_str(),
            "o" => self.object.clone(),
            "o2" => self.query.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_round_trip() {
        let entry = OplogEntry {
            timestamp: (1_400_000_000u64 << 32) | 2,
            history_id: -42,
            version: 2,
            operation: "i".to_string(),
            namespace: "db.things".to_string(),
            object: doc! {"_id" => 1},
            query: Document::new(),
        };

        let round_tripped = OplogEntry::from_document(&entry.to_document()).unwrap();
        assert_eq!(round_tripped, entry);
    }

    #[test]
    fn test_missing_op_is_rejected() {
        let err = OplogEntry::from_document(&doc! {"ns" => "db.c"}).unwrap_err();
        assert!(err.to_string().contains("op"));
    }

    #[test]
    fn test_noop_detection() {
        let entry = OplogEntry::from_document(&doc! {"op" => "n"}).unwrap();
        assert!(entry.is_noop());
        let entry = OplogEntry::from_document(&doc! {"op" => "i"}).unwrap();
        assert!(!entry.is_noop());
    }
}
