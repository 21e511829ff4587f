//! Users aggregation service.

use crate::config::AggregationConfig;
use crate::error::{SyncError, SyncResult};
use crate::resolver::{LiveResolver, ResolutionFailure};
use crate::tracker::IdSetTracker;
use bonfire_store::{ChannelsDatabase, StorageError, UserDatabase};
use bonfire_types::{Channel, User, UserId, Users};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Live user lists.
pub struct UsersService {
    channels_db: Arc<dyn ChannelsDatabase>,
    users_db: Arc<dyn UserDatabase>,
    config: AggregationConfig,
    failure_sink: Option<UnboundedSender<ResolutionFailure<UserId, StorageError>>>,
}

impl UsersService {
    /// Creates a service with the default config.
    pub fn new(channels_db: Arc<dyn ChannelsDatabase>, users_db: Arc<dyn UserDatabase>) -> Self {
        Self::with_config(channels_db, users_db, AggregationConfig::default())
    }

    /// Creates a service with a custom config.
    pub fn with_config(
        channels_db: Arc<dyn ChannelsDatabase>,
        users_db: Arc<dyn UserDatabase>,
        config: AggregationConfig,
    ) -> Self {
        Self {
            channels_db,
            users_db,
            config,
            failure_sink: None,
        }
    }

    /// Reports users that fail to resolve in any session opened afterwards.
    pub fn set_failure_sink(
        &mut self,
        sink: UnboundedSender<ResolutionFailure<UserId, StorageError>>,
    ) {
        self.failure_sink = Some(sink);
    }

    /// Live list of the owners of `channel`.
    ///
    /// An owner list that is empty or not yet populated yields an empty list.
    pub fn users_for(&self, channel: &Channel) -> BoxStream<'static, SyncResult<Users>> {
        debug!("Opening users session for channel {}", channel.name);
        let ids = IdSetTracker::single(self.channels_db.observe_owner_ids_for(channel));

        let db = self.users_db.clone();
        let mut resolver = LiveResolver::new(ids, move |id: &UserId| db.read_user_from(id))
            .with_config(self.config.clone());
        if let Some(sink) = &self.failure_sink {
            resolver = resolver.with_failure_sink(sink.clone());
        }

        resolver
            .map(|result| result.map(Users::from).map_err(SyncError::from))
            .boxed()
    }

    /// Live list of every user in the store. Ends after the first error.
    pub fn all_users(&self) -> BoxStream<'static, SyncResult<Users>> {
        // The source is dropped as soon as an error has been yielded.
        let source = self.users_db.observe_users();
        stream::unfold(Some(source), |source| async move {
            let mut source = source?;
            let item = source.next().await?;
            let next = if item.is_ok() { Some(source) } else { None };
            Some((item.map_err(SyncError::from), next))
        })
        .boxed()
    }

    /// Upserts the signed-in user. Fire-and-forget.
    pub fn write_current_user(&self, user: &User) {
        debug!("Writing current user {}", user.id);
        self.users_db.write_current_user(user);
    }
}
