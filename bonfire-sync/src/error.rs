//! Error types for the sync layer.

use bonfire_store::StorageError;
use bonfire_types::{Channel, ChannelName};
use std::fmt;
use thiserror::Error;

/// Result type for aggregate streams.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that end an aggregate stream.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The store failed an ID-set subscription.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// One step of a multi-step write pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteStep {
    /// The channel's own record.
    ChannelRecord,
    /// The global public-channel index.
    PublicIndex,
    /// The channel's owner index.
    OwnerIndex,
    /// The user's private-channel index.
    UserPrivateIndex,
}

impl fmt::Display for WriteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ChannelRecord => "channel record",
            Self::PublicIndex => "public channel index",
            Self::OwnerIndex => "owner index",
            Self::UserPrivateIndex => "user private index",
        };
        f.write_str(name)
    }
}

/// Errors returned by write pipelines.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The channel name failed validation. Nothing was written.
    #[error("invalid channel name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// The channel name is already in use. Nothing was written.
    #[error("channel name already taken: {0}")]
    NameTaken(ChannelName),

    /// The first step failed. Nothing was written.
    #[error("failed to write {step}: {source}")]
    Failed {
        step: WriteStep,
        #[source]
        source: StorageError,
    },

    /// Earlier steps succeeded and a later one failed. The store is left in a
    /// degraded state that callers may want to repair.
    #[error("partial write of {}: {completed:?} written, {failed} failed: {source}", .channel.name)]
    Partial {
        channel: Channel,
        completed: Vec<WriteStep>,
        failed: WriteStep,
        #[source]
        source: StorageError,
    },
}

impl WriteError {
    /// Whether the store may hold some, but not all, of the write.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial { .. })
    }
}
