//! Remote store port for Bonfire.
//!
//! The canonical users, channels and ownership indexes live in a remote,
//! eventually-consistent document store. This crate defines the interface
//! the sync engine consumes ([`ChannelsDatabase`], [`UserDatabase`]) and ships
//! [`MemoryDatabase`], an in-process implementation used by tests and the CLI.
//!
//! # Shape of the port
//!
//! - Observations return a [`futures::stream::BoxStream`]. Each stream is one live
//!   subscription and dropping it cancels the subscription.
//! - Index observations yield complete snapshots, never deltas.
//! - Writes are async and resolve once the store acknowledges them.

mod database;
mod error;
mod memory;
mod seed;

pub use database::{ChannelsDatabase, EntityStream, IdStream, UserDatabase};
pub use error::{StorageError, StorageResult};
pub use memory::{IndexKey, MemoryDatabase, Operation};
pub use seed::Seed;
