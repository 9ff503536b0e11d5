use std::fmt;

use crate::error::{InvalidNamespaceSnafu, Result};

const MAX_DATABASE_NAME_LEN: usize = 64;
const INVALID_DATABASE_CHARS: &[char] = &[' ', '.', '$', '/', '\\', '\0', '"'];

/// A fully qualified `database.collection` pair.
///
/// Both halves are validated against the destination's naming rules.
/// Restore work units for reserved files (the oplog, `$admin.*` user and
/// role dumps) carry names outside those rules and are built with
/// [`Namespace::new_unchecked`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    database: String,
    collection: String,
}

impl Namespace {
    /// Creates a validated namespace.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Result<Self> {
        let namespace = Self::new_unchecked(database, collection);
        validate_database_name(&namespace.database, &namespace)?;
        validate_collection_name(&namespace.collection, &namespace)?;
        Ok(namespace)
    }

    /// Creates a namespace without validation.
    pub fn new_unchecked(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Splits `database.collection` at the first dot; the collection half
    /// may itself contain dots (`local.oplog.rs`).
    pub fn parse(namespace: &str) -> Result<Self> {
        let Some((database, collection)) = namespace.split_once('.') else {
            return InvalidNamespaceSnafu {
                namespace,
                message: "expected a database.collection pair",
            }
            .fail();
        };
        Self::new(database, collection)
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The merge key used by restore intents.
    pub fn key(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

fn validate_database_name(name: &str, namespace: &Namespace) -> Result<()> {
    if name.is_empty() {
        return InvalidNamespaceSnafu {
            namespace: namespace.to_string(),
            message: "database name is empty",
        }
        .fail();
    }
    if name.len() > MAX_DATABASE_NAME_LEN {
        return InvalidNamespaceSnafu {
            namespace: namespace.to_string(),
            message: format!("database name exceeds {MAX_DATABASE_NAME_LEN} bytes"),
        }
        .fail();
    }
    if let Some(bad) = name.chars().find(|c| INVALID_DATABASE_CHARS.contains(c)) {
        return InvalidNamespaceSnafu {
            namespace: namespace.to_string(),
            message: format!("database name contains {bad:?}"),
        }
        .fail();
    }
    Ok(())
}

fn validate_collection_name(name: &str, namespace: &Namespace) -> Result<()> {
    if name.is_empty() {
        return InvalidNamespaceSnafu {
            namespace: namespace.to_string(),
            message: "collection name is empty",
        }
        .fail();
    }
    if name.contains('\0') {
        return InvalidNamespaceSnafu {
            namespace: namespace.to_string(),
            message: "collection name contains a NUL byte",
        }
        .fail();
    }
    if name.starts_with('$') {
        return InvalidNamespaceSnafu {
            namespace: namespace.to_string(),
            message: "collection name starts with '$'",
        }
        .fail();
    }
    Ok(())
}
