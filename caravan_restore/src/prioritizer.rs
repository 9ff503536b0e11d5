//! Scheduling policies for handing restore intents to workers.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use crate::intent::Intent;

/// Which scheduling policy the manager builds at finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityType {
    /// Hand out intents in discovery order, one at a time.
    Legacy,
    /// Spread work across databases, largest task first.
    MultiDatabaseLtf,
}

/// The policy object choosing which intent to hand out next.
pub trait IntentPrioritizer: Send {
    fn get(&mut self) -> Option<Intent>;
    /// Tells the prioritizer a previously returned intent is done.
    fn finish(&mut self, intent: &Intent);
}

/// Replays the discovery order.
pub struct LegacyPrioritizer {
    queue: VecDeque<Intent>,
}

impl LegacyPrioritizer {
    pub fn new(intents: Vec<Intent>) -> Self {
        Self {
            queue: intents.into(),
        }
    }
}

impl IntentPrioritizer for LegacyPrioritizer {
    fn get(&mut self) -> Option<Intent> {
        self.queue.pop_front()
    }

    fn finish(&mut self, _intent: &Intent) {}
}

/// Largest task first, spread across databases.
///
/// `get` picks the database with the fewest in-flight intents, breaking
/// ties toward more remaining bytes and then the smaller database name,
/// and pops that database's largest remaining data file.
pub struct MultiDatabaseLtfPrioritizer {
    databases: HashMap<String, DatabaseQueue>,
}

struct DatabaseQueue {
    heap: BinaryHeap<BySize>,
    active: usize,
    remaining_bytes: u64,
}

impl MultiDatabaseLtfPrioritizer {
    pub fn new(intents: Vec<Intent>) -> Self {
        let mut databases: HashMap<String, DatabaseQueue> = HashMap::new();
        for intent in intents {
            let queue = databases
                .entry(intent.namespace.database().to_string())
                .or_insert_with(|| DatabaseQueue {
                    heap: BinaryHeap::new(),
                    active: 0,
                    remaining_bytes: 0,
                });
            queue.remaining_bytes += intent.data_size;
            queue.heap.push(BySize(intent));
        }
        Self { databases }
    }
}

impl IntentPrioritizer for MultiDatabaseLtfPrioritizer {
    fn get(&mut self) -> Option<Intent> {
        let database = self
            .databases
            .iter()
            .filter(|(_, queue)| !queue.heap.is_empty())
            .min_by(|(name_a, a), (name_b, b)| {
                a.active
                    .cmp(&b.active)
                    .then_with(|| b.remaining_bytes.cmp(&a.remaining_bytes))
                    .then_with(|| name_a.cmp(name_b))
            })
            .map(|(name, _)| name.clone())?;

        let queue = self.databases.get_mut(&database)?;
        let intent = queue.heap.pop()?.0;
        queue.active += 1;
        queue.remaining_bytes = queue.remaining_bytes.saturating_sub(intent.data_size);
        Some(intent)
    }

    fn finish(&mut self, intent: &Intent) {
        let database = intent.namespace.database();
        let Some(queue) = self.databases.get_mut(database) else {
            return;
        };
        queue.active = queue.active.saturating_sub(1);
        if queue.heap.is_empty() && queue.active == 0 {
            self.databases.remove(database);
        }
    }
}

/// Max-heap ordering by data size, with the key as a deterministic
/// tie-break.
struct BySize(Intent);

impl Ord for BySize {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .data_size
            .cmp(&other.0.data_size)
            .then_with(|| other.0.key().cmp(&self.0.key()))
    }
}

impl PartialOrd for BySize {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for BySize {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BySize {}
