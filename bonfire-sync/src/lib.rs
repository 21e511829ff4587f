//! Reactive join engine for Bonfire.
//!
//! The remote store keeps users, channels and the ownership relation
//! normalized: records plus index streams of identifiers. This crate
//! re-projects them into live, denormalized aggregates ("channels visible to
//! a user", "users of a channel") that follow the indexes as they change.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Tracker** ([`IdSetTracker`]): live union of identifier-set sources
//! - **Resolver** ([`LiveResolver`]): one subscription per tracked identifier,
//!   recombined into an aggregate on every change
//! - **Services** ([`ChannelsService`], [`UsersService`]): compose the two
//!   against the store, and run the multi-step write pipelines
//!
//! ## Data flow
//!
//! 1. **Index snapshots**: the store emits complete identifier sets
//! 2. **Set algebra**: the tracker unions and deduplicates them
//! 3. **Diffing**: the resolver subscribes to new identifiers and cancels
//!    departed ones
//! 4. **Resolution**: each subscription yields its record
//! 5. **Emit**: the aggregate is rebuilt in identifier order
//!
//! Every stream is driven by its consumer. Nothing is spawned, and dropping an
//! aggregate stream cancels every subscription it opened.
//!
//! # Example
//!
//! ```
//! use bonfire_store::MemoryDatabase;
//! use bonfire_sync::{AggregationConfig, ChannelsService};
//! use std::sync::Arc;
//!
//! let db = Arc::new(MemoryDatabase::new());
//! let service = ChannelsService::with_config(db, AggregationConfig::default());
//! assert!(service.config().log_resolution_failures);
//! ```

mod channels;
mod config;
mod error;
mod naming;
pub mod resolver;
pub mod tracker;
mod users;

pub use channels::ChannelsService;
pub use config::AggregationConfig;
pub use error::{SyncError, SyncResult, WriteError, WriteStep};
pub use naming::validate_channel_name;
pub use resolver::{resolve, LiveResolver, ResolutionFailure, ResolveOne};
pub use tracker::{track, IdSet, IdSetTracker};
pub use users::UsersService;
