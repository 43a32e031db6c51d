//! Errors raised by the synchronization core.

use fleet_id::Version;
use thiserror::Error;
use tonic::Status;

use crate::model::ResourceKind;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A change-log entry points at a row the hydration query did not return.
    #[error(
        "missing {kind} {resource_id} while hydrating version {version} in region {region}"
    )]
    MissingHydration {
        region: String,
        version: Version,
        kind: ResourceKind,
        resource_id: String,
    },

    #[error("{operation} failed for region {region}: {source}")]
    Store {
        operation: &'static str,
        region: String,
        #[source]
        source: StoreError,
    },

    #[error("no live connections for region {region}")]
    NoConnections { region: String },

    /// The caller dropped the stream.
    #[error("client disconnected")]
    ClientGone,
}

impl SyncError {
    /// Wraps a store error with the operation and region. Store-level
    /// not-found becomes [`SyncError::NotFound`].
    pub fn store<'a>(
        operation: &'static str,
        region: &'a str,
    ) -> impl FnOnce(StoreError) -> Self + 'a {
        move |source| match source {
            StoreError::NotFound { kind, id } => Self::NotFound(format!("{kind} {id}")),
            source => Self::Store {
                operation,
                region: region.to_string(),
                source,
            },
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

impl From<SyncError> for Status {
    fn from(error: SyncError) -> Self {
        match error {
            SyncError::InvalidArgument(message) => Status::invalid_argument(message),
            SyncError::NotFound(message) => Status::not_found(message),
            e @ SyncError::MissingHydration { .. } => {
                tracing::error!(error = %e, "Change log references a missing row");
                Status::internal(e.to_string())
            }
            SyncError::Store {
                operation,
                region,
                source,
            } => {
                tracing::error!(error = %source, operation, region = %region, "Store operation failed");
                Status::internal(format!("{operation} failed for region {region}"))
            }
            e @ SyncError::NoConnections { .. } => Status::unavailable(e.to_string()),
            SyncError::ClientGone => Status::cancelled("client disconnected"),
        }
    }
}
