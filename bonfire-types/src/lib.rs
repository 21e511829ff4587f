//! Core type definitions for Bonfire.
//!
//! This crate defines the data model mirrored from the remote store:
//! - User and channel identifiers
//! - Resolved [`User`] and [`Channel`] records
//! - The [`Users`] and [`Channels`] aggregates emitted to view layers
//!
//! Records are immutable snapshots. A remote change produces a new record,
//! never a patch of an existing one.

mod channel;
mod ids;
mod user;

pub use channel::{Access, Channel, Channels};
pub use ids::{ChannelName, UserId};
pub use user::{User, Users};

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("empty {0} identifier")]
    EmptyIdentifier(&'static str),
}
