use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use caravan_client::{MemoryDestination, Namespace, SessionProvider};
use caravan_document::{Document, Value, doc, wire};
use caravan_restore::{
    IntentManager, RestoreCoordinator, RestoreOptions, scan_dump_directory,
};

fn write_data_file(path: &Path, documents: &[Document]) {
    let mut file = File::create(path).unwrap();
    for document in documents {
        file.write_all(&wire::encode(document).unwrap()).unwrap();
    }
}

fn id_documents(count: i64) -> Vec<Document> {
    (0..count).map(|i| doc! {"_id" => i}).collect()
}

/// Lays out a two-database dump with metadata, users, indexes, and an
/// oplog file.
fn build_dump(root: &Path) {
    let shop = root.join("shop");
    fs::create_dir(&shop).unwrap();
    write_data_file(&shop.join("orders.bson"), &id_documents(25));
    fs::write(
        shop.join("orders.metadata.json"),
        r#"{"options": {}, "indexes": [{"v": 1, "key": {"sku": 1}, "name": "sku_1", "ns": "dumped.orders"}]}"#,
    )
    .unwrap();
    write_data_file(&shop.join("customers.bson"), &id_documents(5));

    let inventory = root.join("inventory");
    fs::create_dir(&inventory).unwrap();
    write_data_file(&inventory.join("parts.bson"), &id_documents(10));

    write_data_file(
        &root.join("$admin.system.users.bson"),
        &[doc! {"user" => "admin", "pwd" => "hash"}],
    );

    write_data_file(
        &root.join("oplog.bson"),
        &[
            doc! {
                "ts" => Value::Timestamp(10u64 << 32),
                "h" => 1i64,
                "v" => 2,
                "op" => "i",
                "ns" => "shop.orders",
                "o" => doc! {"_id" => 100i64},
            },
            doc! {
                "ts" => Value::Timestamp(11u64 << 32),
                "h" => 2i64,
                "v" => 2,
                "op" => "n",
                "ns" => "",
                "o" => Document::new(),
            },
        ],
    );
}

fn scanned_manager(root: &Path) -> Arc<IntentManager> {
    let manager = Arc::new(IntentManager::new());
    scan_dump_directory(&manager, root).unwrap();
    manager
}

#[tokio::test]
async fn test_restores_a_full_dump_directory() {
    let dump = tempfile::tempdir().unwrap();
    build_dump(dump.path());

    let destination = MemoryDestination::new();
    let manager = scanned_manager(dump.path());
    let coordinator = RestoreCoordinator::new(
        Arc::new(destination.clone()),
        manager,
        RestoreOptions {
            oplog_replay: true,
            ..Default::default()
        },
    );

    let restored = coordinator.run().await.unwrap();
    // 25 orders + 5 customers + 10 parts + 1 user
    assert_eq!(restored, 41);

    let orders = Namespace::new_unchecked("shop", "orders");
    // the oplog replay appends one more order
    assert_eq!(destination.count(&orders).await, 26);
    assert_eq!(
        destination
            .count(&Namespace::new_unchecked("shop", "customers"))
            .await,
        5
    );
    assert_eq!(
        destination
            .count(&Namespace::new_unchecked("inventory", "parts"))
            .await,
        10
    );
    assert_eq!(
        destination
            .count(&Namespace::new_unchecked("admin", "system.users"))
            .await,
        1
    );

    // index ns is rewritten to the restore target
    let indexes = destination.indexes(&orders).await;
    assert_eq!(indexes.len(), 1);
    assert_eq!(
        indexes[0].get("ns"),
        Some(&Value::String("shop.orders".to_string()))
    );

    // exactly one applyOps per non-noop entry
    assert_eq!(destination.apply_ops_received().await, 1);
}

#[tokio::test]
async fn test_restore_without_oplog_replay_leaves_the_oplog_alone() {
    let dump = tempfile::tempdir().unwrap();
    build_dump(dump.path());

    let destination = MemoryDestination::new();
    let coordinator = RestoreCoordinator::new(
        Arc::new(destination.clone()),
        scanned_manager(dump.path()),
        RestoreOptions::default(),
    );
    coordinator.run().await.unwrap();

    assert_eq!(destination.apply_ops_received().await, 0);
    assert_eq!(
        destination
            .count(&Namespace::new_unchecked("shop", "orders"))
            .await,
        25
    );
}

#[tokio::test]
async fn test_parallel_restore_covers_every_collection() {
    let dump = tempfile::tempdir().unwrap();
    build_dump(dump.path());

    let destination = MemoryDestination::new();
    let coordinator = RestoreCoordinator::new(
        Arc::new(destination.clone()),
        scanned_manager(dump.path()),
        RestoreOptions {
            workers: 3,
            ..Default::default()
        },
    );

    let restored = coordinator.run().await.unwrap();
    assert_eq!(restored, 41);
}

#[tokio::test]
async fn test_drop_replaces_existing_documents() {
    let dump = tempfile::tempdir().unwrap();
    build_dump(dump.path());

    let destination = MemoryDestination::new();
    let orders = Namespace::new_unchecked("shop", "orders");
    let session = destination.get_session().await.unwrap();
    session
        .insert(&orders, doc! {"_id" => "stale"})
        .await
        .unwrap();

    let coordinator = RestoreCoordinator::new(
        Arc::new(destination.clone()),
        scanned_manager(dump.path()),
        RestoreOptions {
            drop: true,
            ..Default::default()
        },
    );
    coordinator.run().await.unwrap();

    let documents = destination.documents(&orders).await;
    assert_eq!(documents.len(), 25);
    assert!(
        documents
            .iter()
            .all(|d| d.get("_id") != Some(&Value::String("stale".to_string())))
    );
}

#[tokio::test]
async fn test_corrupt_data_file_fails_the_restore() {
    let dump = tempfile::tempdir().unwrap();
    let db_dir = dump.path().join("db");
    fs::create_dir(&db_dir).unwrap();
    let mut bytes = wire::encode(&doc! {"a" => 1}).unwrap();
    bytes.truncate(bytes.len() - 2);
    fs::write(db_dir.join("broken.bson"), &bytes).unwrap();

    let destination = MemoryDestination::new();
    let coordinator = RestoreCoordinator::new(
        Arc::new(destination),
        scanned_manager(dump.path()),
        RestoreOptions {
            stop_on_error: true,
            ..Default::default()
        },
    );

    let err = coordinator.run().await.unwrap_err();
    assert!(err.to_string().contains("broken") || err.to_string().contains("truncated"));
}
