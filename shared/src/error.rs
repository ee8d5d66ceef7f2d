use thiserror::Error;

/// Failures surfaced by the document store gateway.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read from {collection}: {message}")]
    Read { collection: String, message: String },

    #[error("document {collection}/{id} could not be decoded: {source}")]
    Decode {
        collection: String,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write to {collection}: {message}")]
    Write { collection: String, message: String },

    #[error("document {collection}/{id} does not exist")]
    MissingDocument { collection: String, id: String },
}

impl StoreError {
    pub fn read(collection: &str, message: impl std::fmt::Display) -> Self {
        Self::Read {
            collection: collection.to_string(),
            message: message.to_string(),
        }
    }

    pub fn write(collection: &str, message: impl std::fmt::Display) -> Self {
        Self::Write {
            collection: collection.to_string(),
            message: message.to_string(),
        }
    }

    /// True for the read side of the taxonomy (`Read`, `Decode`).
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Read { .. } | Self::Decode { .. })
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("incorrect email or password")]
    InvalidCredentials,

    #[error("no role is provisioned for user {0}")]
    RoleNotFound(String),

    #[error("auth provider unavailable: {0}")]
    Provider(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
#[error("feed aggregation failed: {0}")]
pub struct FeedAggregationError(#[from] pub StoreError);

/// Finance totals left the `i64` range.
#[derive(Debug, Error)]
#[error("finance totals overflowed")]
pub struct TotalsOverflow;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
}
