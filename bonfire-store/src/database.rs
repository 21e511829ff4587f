//! The Entity Database Port.
//!
//! Implemented by remote-store adapters. The engine only ever talks to the
//! store through these traits, so every adapter is interchangeable.

use crate::error::StorageResult;
use async_trait::async_trait;
use bonfire_types::{Channel, ChannelName, User, UserId, Users};
use futures::stream::BoxStream;

/// A live stream of identifier-set snapshots.
pub type IdStream<K> = BoxStream<'static, StorageResult<Vec<K>>>;

/// A live stream of resolved records for one key.
pub type EntityStream<T> = BoxStream<'static, StorageResult<T>>;

/// Channel records plus the public, per-user private and per-channel owner
/// indexes.
#[async_trait]
pub trait ChannelsDatabase: Send + Sync {
    /// Observes the global index of public channel names.
    fn observe_public_channel_ids(&self) -> IdStream<ChannelName>;

    /// Observes the names of private channels the user owns.
    fn observe_private_channel_ids_for(&self, user: &User) -> IdStream<ChannelName>;

    /// Reads a channel record. Emits again whenever the record changes and
    /// emits nothing while the record is absent.
    fn read_channel_for(&self, name: &ChannelName) -> EntityStream<Channel>;

    /// Observes the owner IDs of a channel.
    fn observe_owner_ids_for(&self, channel: &Channel) -> IdStream<UserId>;

    /// Writes the channel record. Fails with `AlreadyExists` if the name is
    /// taken.
    async fn write_channel(&self, channel: &Channel) -> StorageResult<Channel>;

    /// Adds the channel to the global public index.
    async fn write_channel_to_public_index(&self, channel: &Channel) -> StorageResult<Channel>;

    /// Adds `user` to the channel's owner index.
    async fn add_owner_to_private_channel(
        &self,
        user: &User,
        channel: &Channel,
    ) -> StorageResult<Channel>;

    /// Removes `user` from the channel's owner index.
    async fn remove_owner_from_private_channel(
        &self,
        user: &User,
        channel: &Channel,
    ) -> StorageResult<Channel>;

    /// Adds the channel to the user's private-channel index.
    async fn add_channel_to_user_private_index(
        &self,
        user: &User,
        channel: &Channel,
    ) -> StorageResult<Channel>;

    /// Removes the channel from the user's private-channel index.
    async fn remove_channel_from_user_private_index(
        &self,
        user: &User,
        channel: &Channel,
    ) -> StorageResult<Channel>;
}

/// User records.
pub trait UserDatabase: Send + Sync {
    /// Observes every user in the store.
    fn observe_users(&self) -> EntityStream<Users>;

    /// Reads a user record. Emits nothing while the record is absent.
    fn read_user_from(&self, id: &UserId) -> EntityStream<User>;

    /// Upserts the signed-in user. Fire-and-forget: failures are only logged.
    fn write_current_user(&self, user: &User);
}
