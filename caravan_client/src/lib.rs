pub mod error;
pub mod memory;
pub mod namespace;
pub mod session;

use std::sync::Arc;

pub use error::{ClientError, Result};
pub use memory::MemoryDestination;
pub use namespace::Namespace;
pub use session::{
    BulkResult, DocumentStream, Session, SessionMode, SessionProvider, SessionProviderRef,
    SessionRef,
};

use error::BadOptionSnafu;

/// Connects to a destination by URI.
///
/// Only the in-process `mem://` destination is wired in; real drivers plug
/// in behind [`SessionProvider`].
pub fn connect(uri: &str) -> Result<SessionProviderRef> {
    if uri.strip_prefix("mem://").is_some() {
        return Ok(Arc::new(MemoryDestination::new()));
    }
    BadOptionSnafu {
        message: format!("unsupported destination uri {uri:?}, expected mem://"),
    }
    .fail()
}
