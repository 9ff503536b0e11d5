//! Dump-directory discovery.
//!
//! Layout: one `<db>/` directory per database holding
//! `<collection>.bson` data files and `<collection>.metadata.json`
//! peers, plus the root-level special files `oplog.bson`,
//! `$admin.system.users.bson` and `$admin.system.roles.bson`.

use std::fs;
use std::path::Path;

use caravan_client::Namespace;
use snafu::ResultExt;
use tracing::debug;

use crate::error::{Result, ScanSnafu};
use crate::intent::Intent;
use crate::manager::IntentManager;

const DATA_SUFFIX: &str = ".bson";
const METADATA_SUFFIX: &str = ".metadata.json";

/// Walks a dump directory and feeds every discovered file to the
/// manager. Returns the number of files turned into intents.
pub fn scan_dump_directory(manager: &IntentManager, root: &Path) -> Result<usize> {
    let mut discovered = 0;
    let entries = fs::read_dir(root).context(ScanSnafu { path: root })?;
    for entry in entries {
        let entry = entry.context(ScanSnafu { path: root })?;
        let path = entry.path();
        let kind = entry.file_type().context(ScanSnafu { path: &path })?;

        if kind.is_dir() {
            let database = file_name(&path);
            discovered += scan_database_directory(manager, &path, &database)?;
            continue;
        }

        let name = file_name(&path);
        match name.as_str() {
            "oplog.bson" => {
                let size = entry.metadata().context(ScanSnafu { path: &path })?.len();
                manager.put(Intent::for_data(
                    Namespace::new_unchecked("", "oplog"),
                    &path,
                    size,
                ));
                discovered += 1;
            }
            "$admin.system.users.bson" | "$admin.system.roles.bson" => {
                let collection = name.trim_end_matches(DATA_SUFFIX);
                let size = entry.metadata().context(ScanSnafu { path: &path })?.len();
                manager.put(Intent::for_data(
                    Namespace::new_unchecked("", collection),
                    &path,
                    size,
                ));
                discovered += 1;
            }
            _ => debug!(path = %path.display(), "skipping unknown file"),
        }
    }
    Ok(discovered)
}

fn scan_database_directory(
    manager: &IntentManager,
    directory: &Path,
    database: &str,
) -> Result<usize> {
    let mut discovered = 0;
    let entries = fs::read_dir(directory).context(ScanSnafu { path: directory })?;
    for entry in entries {
        let entry = entry.context(ScanSnafu { path: directory })?;
        let path = entry.path();
        if !entry.file_type().context(ScanSnafu { path: &path })?.is_file() {
            debug!(path = %path.display(), "skipping nested directory");
            continue;
        }

        let name = file_name(&path);
        if let Some(collection) = name.strip_suffix(METADATA_SUFFIX) {
            manager.put(Intent::for_metadata(
                Namespace::new_unchecked(database, collection),
                &path,
            ));
            discovered += 1;
        } else if let Some(collection) = name.strip_suffix(DATA_SUFFIX) {
            let size = entry.metadata().context(ScanSnafu { path: &path })?.len();
            manager.put(Intent::for_data(
                Namespace::new_unchecked(database, collection),
                &path,
                size,
            ));
            discovered += 1;
        } else {
            debug!(path = %path.display(), "skipping unknown file");
        }
    }
    Ok(discovered)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
