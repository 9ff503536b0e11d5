use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::intent::Intent;
use crate::prioritizer::{
    IntentPrioritizer, LegacyPrioritizer, MultiDatabaseLtfPrioritizer, PriorityType,
};

/// Collects intents during discovery and hands them out to workers.
///
/// Discovery inserts through [`put`](Self::put), which merges the data
/// and metadata files of one collection into a single intent and parks
/// the special cases (oplog, users, roles, per-database system indexes)
/// in their own slots. [`finalize`](Self::finalize) builds the
/// prioritizer and releases the discovery scratch maps; after that,
/// [`pop`](Self::pop) and [`finish`](Self::finish) drive the queue. All
/// mutation is behind one mutex.
#[derive(Default)]
pub struct IntentManager {
    inner: Mutex<ManagerInner>,
}

#[derive(Default)]
struct ManagerInner {
    scratch: Option<Scratch>,
    prioritizer: Option<Box<dyn IntentPrioritizer>>,

    oplog: Option<Intent>,
    users: Option<Intent>,
    roles: Option<Intent>,
    index_intents: HashMap<String, Intent>,
}

/// Discovery-phase structures, released at finalization.
///
/// The discovery-order list owns the intents; the key map holds indices
/// into it so a merge can find its target without a second owner.
#[derive(Default)]
struct Scratch {
    by_key: HashMap<String, usize>,
    discovery_order: Vec<Intent>,
}

impl IntentManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ManagerInner {
                scratch: Some(Scratch::default()),
                ..Default::default()
            }),
        }
    }

    /// Inserts an intent, merging it with a previous discovery of the
    /// same collection.
    pub fn put(&self, intent: Intent) {
        let mut inner = self.lock();

        if intent.is_oplog() {
            // last discovery wins
            inner.oplog = Some(intent);
            return;
        }
        if intent.is_system_indexes() {
            inner
                .index_intents
                .insert(intent.namespace.database().to_string(), intent);
            return;
        }
        if intent.is_users() {
            merge_special_slot(&mut inner.users, intent);
            return;
        }
        if intent.is_roles() {
            merge_special_slot(&mut inner.roles, intent);
            return;
        }

        let Some(scratch) = inner.scratch.as_mut() else {
            warn!(key = intent.key(), "intent discovered after finalization");
            return;
        };
        match scratch.by_key.get(&intent.key()) {
            Some(&index) => scratch.discovery_order[index].merge(intent),
            None => {
                scratch.by_key.insert(intent.key(), scratch.discovery_order.len());
                scratch.discovery_order.push(intent);
            }
        }
    }

    /// Builds the prioritizer and releases the discovery structures.
    /// Must be called exactly once, after discovery.
    pub fn finalize(&self, priority: PriorityType) {
        let mut inner = self.lock();
        let Some(scratch) = inner.scratch.take() else {
            warn!("intent manager finalized twice");
            return;
        };
        debug!(intents = scratch.discovery_order.len(), ?priority, "finalizing intent manager");
        inner.prioritizer = Some(match priority {
            PriorityType::Legacy => Box::new(LegacyPrioritizer::new(scratch.discovery_order)),
            PriorityType::MultiDatabaseLtf => {
                Box::new(MultiDatabaseLtfPrioritizer::new(scratch.discovery_order))
            }
        });
    }

    /// Returns the next intent to restore, or `None` when the queue is
    /// drained (or the manager was never finalized).
    pub fn pop(&self) -> Option<Intent> {
        self.lock().prioritizer.as_mut()?.get()
    }

    /// Reports a popped intent as done restoring.
    pub fn finish(&self, intent: &Intent) {
        if let Some(prioritizer) = self.lock().prioritizer.as_mut() {
            prioritizer.finish(intent);
        }
    }

    /// Number of queue intents found so far; zero after finalization.
    pub fn discovered(&self) -> usize {
        self.lock()
            .scratch
            .as_ref()
            .map(|scratch| scratch.discovery_order.len())
            .unwrap_or(0)
    }

    pub fn oplog(&self) -> Option<Intent> {
        self.lock().oplog.clone()
    }

    pub fn users(&self) -> Option<Intent> {
        self.lock().users.clone()
    }

    pub fn roles(&self) -> Option<Intent> {
        self.lock().roles.clone()
    }

    pub fn system_indexes(&self, database: &str) -> Option<Intent> {
        self.lock().index_intents.get(database).cloned()
    }

    /// Databases that carry a system-indexes file.
    pub fn index_databases(&self) -> Vec<String> {
        let mut databases: Vec<String> = self.lock().index_intents.keys().cloned().collect();
        databases.sort();
        databases
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManagerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Users/roles slots require a data file to be created, but once present
/// they absorb later discoveries of the metadata half.
fn merge_special_slot(slot: &mut Option<Intent>, intent: Intent) {
    match slot {
        Some(existing) => existing.merge(intent),
        None if intent.data_path.is_some() => *slot = Some(intent),
        None => {}
    }
}
