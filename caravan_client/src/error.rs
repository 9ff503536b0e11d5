use snafu::Snafu;

/// Destination client error types.
///
/// Errors cross task boundaries inside the ingest pipeline, so the enum is
/// cheap to clone.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum ClientError {
    /// A configuration value the client cannot act on.
    #[snafu(display("invalid option: {message}"))]
    BadOption { message: String },
    /// The namespace does not exist on the destination.
    #[snafu(display("ns not found: {namespace}"))]
    NotFound { namespace: String },
    /// No server answered within the driver's discovery window.
    #[snafu(display("no reachable server"))]
    NoReachableServer,
    /// The server processed the request and returned a failure.
    #[snafu(display("server error: {errmsg}"))]
    Server { errmsg: String },
    /// The name does not satisfy the destination's naming rules.
    #[snafu(display("invalid namespace {namespace:?}: {message}"))]
    InvalidNamespace { namespace: String, message: String },
}

impl ClientError {
    /// True when retrying on another connection cannot help.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ClientError::NoReachableServer)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
