pub mod applier;
pub mod entry;
pub mod error;

pub use applier::{OplogApplier, apply_entry, lookback_timestamp};
pub use entry::OplogEntry;
pub use error::{OplogError, Result};
