use std::path::PathBuf;

use caravan_client::Namespace;

/// The unit of restore work: one collection's data file paired with its
/// optional metadata file.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub namespace: Namespace,
    /// Absolute path of the binary document file, when discovered.
    pub data_path: Option<PathBuf>,
    /// Absolute path of the metadata file, when discovered.
    pub metadata_path: Option<PathBuf>,
    /// Data file size in bytes, for the size-aware prioritizers.
    pub data_size: u64,
}

impl Intent {
    /// An intent for a discovered data file.
    pub fn for_data(namespace: Namespace, path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            namespace,
            data_path: Some(path.into()),
            metadata_path: None,
            data_size: size,
        }
    }

    /// An intent for a discovered metadata file.
    pub fn for_metadata(namespace: Namespace, path: impl Into<PathBuf>) -> Self {
        Self {
            namespace,
            data_path: None,
            metadata_path: Some(path.into()),
            data_size: 0,
        }
    }

    pub fn key(&self) -> String {
        self.namespace.key()
    }

    pub fn is_oplog(&self) -> bool {
        self.namespace.database().is_empty() && self.namespace.collection() == "oplog"
    }

    pub fn is_users(&self) -> bool {
        self.namespace.collection() == "$admin.system.users"
            || (self.namespace.database() == "admin"
                && self.namespace.collection() == "system.users")
    }

    pub fn is_roles(&self) -> bool {
        self.namespace.collection() == "$admin.system.roles"
            || (self.namespace.database() == "admin"
                && self.namespace.collection() == "system.roles")
    }

    pub fn is_system_indexes(&self) -> bool {
        self.namespace.collection() == "system.indexes" && self.data_path.is_some()
    }

    /// Folds another discovery of the same collection into this intent.
    /// Each field merges independently; the first non-empty value wins.
    pub fn merge(&mut self, other: Intent) {
        if self.data_path.is_none() {
            self.data_path = other.data_path;
        }
        if self.data_size == 0 {
            self.data_size = other.data_size;
        }
        if self.metadata_path.is_none() {
            self.metadata_path = other.metadata_path;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_predicates() {
        let oplog = Intent::for_data(Namespace::new_unchecked("", "oplog"), "/d/oplog.bson", 1);
        assert!(oplog.is_oplog());
        assert!(!oplog.is_users());

        let users = Intent::for_data(
            Namespace::new_unchecked("", "$admin.system.users"),
            "/d/$admin.system.users.bson",
            1,
        );
        assert!(users.is_users());
        let users = Intent::for_data(
            Namespace::new_unchecked("admin", "system.users"),
            "/d/admin/system.users.bson",
            1,
        );
        assert!(users.is_users());
        assert!(!users.is_roles());

        let indexes = Intent::for_data(
            Namespace::new_unchecked("db", "system.indexes"),
            "/d/db/system.indexes.bson",
            1,
        );
        assert!(indexes.is_system_indexes());
        // a metadata-only discovery is not a system-indexes intent
        let indexes_meta = Intent::for_metadata(
            Namespace::new_unchecked("db", "system.indexes"),
            "/d/db/system.indexes.metadata.json",
        );
        assert!(!indexes_meta.is_system_indexes());
    }

    #[test]
    fn test_merge_keeps_first_non_empty_fields() {
        let ns = Namespace::new_unchecked("db", "coll");
        let mut data = Intent::for_data(ns.clone(), "/d/db/coll.bson", 128);
        data.merge(Intent::for_metadata(ns.clone(), "/d/db/coll.metadata.json"));

        assert_eq!(data.data_path.as_deref(), Some("/d/db/coll.bson".as_ref()));
        assert_eq!(data.data_size, 128);
        assert_eq!(
            data.metadata_path.as_deref(),
            Some("/d/db/coll.metadata.json".as_ref())
        );

        // merging the other way round preserves the same fields
        let mut meta = Intent::for_metadata(ns.clone(), "/d/db/coll.metadata.json");
        meta.merge(Intent::for_data(ns, "/d/db/coll.bson", 128));
        assert_eq!(meta, data);
    }
}
