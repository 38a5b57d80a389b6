use thiserror::Error;

/// Standard Result type for the endpoint crate
pub type Result<T> = std::result::Result<T, EndpointError>;

/// Boxed error carried as the source of a construction failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid service url: {0}")]
    InvalidUrl(String),

    #[error("Failed to construct endpoint for {address}: {source}")]
    Construction {
        address: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to tear down endpoint for {address}: {reason}")]
    Teardown { address: String, reason: String },

    #[error("Endpoint is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Endpoint task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EndpointError {
    /// Wrap a factory failure as a construction failure for `address`.
    /// Errors that already are construction failures pass through unchanged.
    pub fn into_construction(self, address: impl ToString) -> Self {
        match self {
            EndpointError::Construction { .. } => self,
            other => EndpointError::Construction {
                address: address.to_string(),
                source: Box::new(other),
            },
        }
    }

    pub fn is_construction(&self) -> bool {
        matches!(self, EndpointError::Construction { .. })
    }

    pub fn is_teardown(&self) -> bool {
        matches!(self, EndpointError::Teardown { .. })
    }
}
