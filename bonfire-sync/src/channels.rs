//! Channels aggregation service.
//!
//! Reads: "channels visible to a user" is the union of the public index and
//! the user's private index, resolved against channel records.
//!
//! Writes: channel creation and ownership changes are multi-step pipelines
//! over the store's record and index mutators. Steps run in order and stop at
//! the first failure. A failure after a completed step is reported as
//! [`WriteError::Partial`] and left for the caller to repair.

use crate::config::AggregationConfig;
use crate::error::{SyncError, SyncResult, WriteError, WriteStep};
use crate::naming::validate_channel_name;
use crate::resolver::{LiveResolver, ResolutionFailure};
use crate::tracker::IdSetTracker;
use bonfire_store::{ChannelsDatabase, StorageError, StorageResult};
use bonfire_types::{Channel, ChannelName, Channels, User};
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Tracks completed steps so a failure can be classified.
struct Pipeline<'a> {
    channel: &'a Channel,
    completed: Vec<WriteStep>,
}

impl<'a> Pipeline<'a> {
    fn new(channel: &'a Channel) -> Self {
        Self {
            channel,
            completed: Vec::new(),
        }
    }

    fn step<T>(&mut self, step: WriteStep, result: StorageResult<T>) -> Result<(), WriteError> {
        match result {
            Ok(_) => {
                debug!("Wrote {} for channel {}", step, self.channel.name);
                self.completed.push(step);
                Ok(())
            }
            Err(source) => Err(self.fail(step, source)),
        }
    }

    fn fail(&mut self, step: WriteStep, source: StorageError) -> WriteError {
        if self.completed.is_empty() {
            return match source {
                StorageError::AlreadyExists(_) if step == WriteStep::ChannelRecord => {
                    WriteError::NameTaken(self.channel.name.clone())
                }
                source => WriteError::Failed { step, source },
            };
        }
        warn!(
            "Partial write for channel {}: {:?} written, {} failed: {}",
            self.channel.name, self.completed, step, source
        );
        WriteError::Partial {
            channel: self.channel.clone(),
            completed: std::mem::take(&mut self.completed),
            failed: step,
            source,
        }
    }
}

/// Live channel lists and channel writes.
pub struct ChannelsService {
    db: Arc<dyn ChannelsDatabase>,
    config: AggregationConfig,
    failure_sink: Option<UnboundedSender<ResolutionFailure<ChannelName, StorageError>>>,
}

impl ChannelsService {
    /// Creates a service with the default config.
    pub fn new(db: Arc<dyn ChannelsDatabase>) -> Self {
        Self::with_config(db, AggregationConfig::default())
    }

    /// Creates a service with a custom config.
    pub fn with_config(db: Arc<dyn ChannelsDatabase>, config: AggregationConfig) -> Self {
        Self {
            db,
            config,
            failure_sink: None,
        }
    }

    /// Reports channels that fail to resolve in any session opened afterwards.
    pub fn set_failure_sink(
        &mut self,
        sink: UnboundedSender<ResolutionFailure<ChannelName, StorageError>>,
    ) {
        self.failure_sink = Some(sink);
    }

    /// Returns the config.
    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Live list of channels visible to `user`: every public channel plus the
    /// private channels the user owns.
    ///
    /// Ends with an error if either index subscription fails. Dropping the
    /// stream cancels every subscription it opened.
    pub fn channels_for(&self, user: &User) -> BoxStream<'static, SyncResult<Channels>> {
        debug!("Opening channels session for user {}", user.id);
        let ids = IdSetTracker::new(vec![
            self.db.observe_public_channel_ids(),
            self.db.observe_private_channel_ids_for(user),
        ]);

        let db = self.db.clone();
        let mut resolver = LiveResolver::new(ids, move |name: &ChannelName| {
            db.read_channel_for(name)
        })
        .with_config(self.config.clone());
        if let Some(sink) = &self.failure_sink {
            resolver = resolver.with_failure_sink(sink.clone());
        }

        resolver
            .map(|result| result.map(Channels::from).map_err(SyncError::from))
            .boxed()
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Creates a public channel: writes the record, then adds it to the
    /// public index.
    pub async fn create_public_channel(&self, name: &str) -> Result<Channel, WriteError> {
        let channel = Channel::public(validate_channel_name(name)?);
        info!("Creating public channel {}", channel.name);

        let mut pipeline = Pipeline::new(&channel);
        pipeline.step(
            WriteStep::ChannelRecord,
            self.db.write_channel(&channel).await,
        )?;
        pipeline.step(
            WriteStep::PublicIndex,
            self.db.write_channel_to_public_index(&channel).await,
        )?;
        Ok(channel)
    }

    /// Creates a private channel owned by `owner`: writes the record, then
    /// the owner index, then the owner's private index.
    ///
    /// The record goes first so a taken name fails before any index changes.
    pub async fn create_private_channel(
        &self,
        name: &str,
        owner: &User,
    ) -> Result<Channel, WriteError> {
        let channel = Channel::private(validate_channel_name(name)?);
        info!("Creating private channel {} for {}", channel.name, owner.id);

        let mut pipeline = Pipeline::new(&channel);
        pipeline.step(
            WriteStep::ChannelRecord,
            self.db.write_channel(&channel).await,
        )?;
        pipeline.step(
            WriteStep::OwnerIndex,
            self.db.add_owner_to_private_channel(owner, &channel).await,
        )?;
        pipeline.step(
            WriteStep::UserPrivateIndex,
            self.db.add_channel_to_user_private_index(owner, &channel).await,
        )?;
        Ok(channel)
    }

    /// Grants `user` ownership of a private channel.
    pub async fn add_owner_to_private_channel(
        &self,
        channel: &Channel,
        user: &User,
    ) -> Result<User, WriteError> {
        info!("Adding owner {} to channel {}", user.id, channel.name);
        let mut pipeline = Pipeline::new(channel);
        pipeline.step(
            WriteStep::OwnerIndex,
            self.db.add_owner_to_private_channel(user, channel).await,
        )?;
        pipeline.step(
            WriteStep::UserPrivateIndex,
            self.db.add_channel_to_user_private_index(user, channel).await,
        )?;
        Ok(user.clone())
    }

    /// Revokes `user`'s ownership of a private channel.
    pub async fn remove_owner_from_private_channel(
        &self,
        channel: &Channel,
        user: &User,
    ) -> Result<User, WriteError> {
        info!("Removing owner {} from channel {}", user.id, channel.name);
        let mut pipeline = Pipeline::new(channel);
        pipeline.step(
            WriteStep::OwnerIndex,
            self.db.remove_owner_from_private_channel(user, channel).await,
        )?;
        pipeline.step(
            WriteStep::UserPrivateIndex,
            self.db
                .remove_channel_from_user_private_index(user, channel)
                .await,
        )?;
        Ok(user.clone())
    }
}
