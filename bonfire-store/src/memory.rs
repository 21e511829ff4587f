//! In-memory reference store.
//!
//! Every record and index sits behind a `tokio::sync::watch` channel, so an
//! observer sees the current snapshot immediately and then each change.
//! Fault hooks let tests drive transport and per-record failures.

use crate::database::{ChannelsDatabase, EntityStream, IdStream, UserDatabase};
use crate::error::{StorageError, StorageResult};
use crate::seed::Seed;
use async_trait::async_trait;
use bonfire_types::{Channel, ChannelName, User, UserId, Users};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A write operation that can be made to fail with [`MemoryDatabase::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    WriteChannel,
    WritePublicIndex,
    AddOwner,
    RemoveOwner,
    AddToUserPrivateIndex,
    RemoveFromUserPrivateIndex,
    WriteUser,
}

/// Identifies one index in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    /// The global public-channel index.
    Public,
    /// A user's private-channel index.
    PrivateFor(UserId),
    /// A channel's owner index.
    OwnersOf(ChannelName),
}

#[derive(Debug, Default)]
struct Faults {
    writes: VecDeque<(Operation, StorageError)>,
    indexes: HashSet<IndexKey>,
    channel_reads: HashSet<ChannelName>,
    user_reads: HashSet<UserId>,
}

#[derive(Debug)]
struct Inner {
    users: BTreeMap<UserId, watch::Sender<Option<User>>>,
    all_users: watch::Sender<Users>,
    channels: HashMap<ChannelName, watch::Sender<Option<Channel>>>,
    public_index: watch::Sender<BTreeSet<ChannelName>>,
    private_index: HashMap<UserId, watch::Sender<BTreeSet<ChannelName>>>,
    owners: HashMap<ChannelName, watch::Sender<BTreeSet<UserId>>>,
    faults: Faults,
    writes: usize,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            users: BTreeMap::new(),
            all_users: watch::channel(Users::new()).0,
            channels: HashMap::new(),
            public_index: watch::channel(BTreeSet::new()).0,
            private_index: HashMap::new(),
            owners: HashMap::new(),
            faults: Faults::default(),
            writes: 0,
        }
    }
}

impl Inner {
    fn user_slot(&mut self, id: &UserId) -> &watch::Sender<Option<User>> {
        self.users
            .entry(id.clone())
            .or_insert_with(|| watch::channel(None).0)
    }

    fn channel_slot(&mut self, name: &ChannelName) -> &watch::Sender<Option<Channel>> {
        self.channels
            .entry(name.clone())
            .or_insert_with(|| watch::channel(None).0)
    }

    fn private_slot(&mut self, id: &UserId) -> &watch::Sender<BTreeSet<ChannelName>> {
        self.private_index
            .entry(id.clone())
            .or_insert_with(|| watch::channel(BTreeSet::new()).0)
    }

    fn owners_slot(&mut self, name: &ChannelName) -> &watch::Sender<BTreeSet<UserId>> {
        self.owners
            .entry(name.clone())
            .or_insert_with(|| watch::channel(BTreeSet::new()).0)
    }

    /// Counts the attempt and consumes a matching injected fault, if any.
    fn begin_write(&mut self, op: Operation) -> StorageResult<()> {
        self.writes += 1;
        if let Some(pos) = self.faults.writes.iter().position(|(o, _)| *o == op) {
            if let Some((_, err)) = self.faults.writes.remove(pos) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn upsert_user(&mut self, user: User) {
        self.user_slot(&user.id).send_replace(Some(user));
        let users: Users = self
            .users
            .values()
            .filter_map(|tx| tx.borrow().clone())
            .collect();
        self.all_users.send_replace(users);
    }
}

/// Bumps the live-observer count for as long as an observation stream lives.
struct ObserverGuard(Arc<AtomicUsize>);

impl ObserverGuard {
    fn new(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count.clone())
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Current value first, then one item per change. Ends if the sender goes away.
fn watch_stream<T>(rx: watch::Receiver<T>, guard: ObserverGuard) -> BoxStream<'static, T>
where
    T: Clone + Send + Sync + 'static,
{
    stream::unfold((rx, guard, true), |(mut rx, guard, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let value = rx.borrow_and_update().clone();
        Some((value, (rx, guard, false)))
    })
    .boxed()
}

fn failed<T: Send + 'static>(err: StorageError) -> BoxStream<'static, StorageResult<T>> {
    stream::once(async move { Err(err) }).boxed()
}

/// In-process store implementing both [`ChannelsDatabase`] and [`UserDatabase`].
///
/// Clones share the same state, so a test can keep one handle for setup and
/// fault injection while the services under test hold another.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Mutex<Inner>>,
    observers: Arc<AtomicUsize>,
}

impl MemoryDatabase {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store populated from a seed.
    ///
    /// Public channels go into the public index. Each owner entry goes into
    /// the channel's owner index and, unless the channel is public, into the
    /// owner's private-channel index.
    pub fn from_seed(seed: Seed) -> Self {
        let db = Self::new();
        {
            let mut inner = db.lock();
            for user in seed.users {
                inner.upsert_user(user);
            }

            let mut public = HashSet::new();
            for channel in seed.channels {
                let name = channel.name.clone();
                if !channel.is_private() {
                    public.insert(name.clone());
                    inner.public_index.send_modify(|set| {
                        set.insert(name.clone());
                    });
                }
                inner.channel_slot(&name).send_replace(Some(channel));
            }

            for (name, owners) in seed.owners {
                for owner in owners {
                    inner.owners_slot(&name).send_modify(|set| {
                        set.insert(owner.clone());
                    });
                    if !public.contains(&name) {
                        inner.private_slot(&owner).send_modify(|set| {
                            set.insert(name.clone());
                        });
                    }
                }
            }
            info!(
                "Seeded memory store: {} users, {} channels",
                inner.users.len(),
                inner.channels.len()
            );
        }
        db
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn observe<T>(&self, rx: watch::Receiver<T>) -> BoxStream<'static, T>
    where
        T: Clone + Send + Sync + 'static,
    {
        watch_stream(rx, ObserverGuard::new(&self.observers))
    }

    fn observe_index<K>(&self, rx: watch::Receiver<BTreeSet<K>>) -> IdStream<K>
    where
        K: Clone + Send + Sync + 'static,
    {
        self.observe(rx)
            .map(|ids| Ok(ids.into_iter().collect()))
            .boxed()
    }

    /// Takes a pending index fault for `key`, returning the failure stream.
    fn index_fault<K: Send + 'static>(inner: &mut Inner, key: &IndexKey) -> Option<IdStream<K>> {
        if inner.faults.indexes.remove(key) {
            warn!("Injected failure on index {:?}", key);
            return Some(failed(StorageError::Transport(format!(
                "listener cancelled for {key:?}"
            ))));
        }
        None
    }

    // ── Direct mutation (bypasses fault injection) ───────────────

    /// Inserts or replaces a user record.
    pub fn put_user(&self, user: User) {
        self.lock().upsert_user(user);
    }

    /// Inserts or replaces a channel record without touching any index.
    pub fn put_channel(&self, channel: Channel) {
        let name = channel.name.clone();
        self.lock().channel_slot(&name).send_replace(Some(channel));
    }

    /// Replaces the public-channel index.
    pub fn set_public_channel_ids(&self, names: impl IntoIterator<Item = ChannelName>) {
        let names: BTreeSet<_> = names.into_iter().collect();
        self.lock().public_index.send_replace(names);
    }

    /// Replaces a user's private-channel index.
    pub fn set_private_channel_ids(
        &self,
        user: &UserId,
        names: impl IntoIterator<Item = ChannelName>,
    ) {
        let names: BTreeSet<_> = names.into_iter().collect();
        self.lock().private_slot(user).send_replace(names);
    }

    /// Replaces a channel's owner index.
    pub fn set_owner_ids(&self, channel: &ChannelName, ids: impl IntoIterator<Item = UserId>) {
        let ids: BTreeSet<_> = ids.into_iter().collect();
        self.lock().owners_slot(channel).send_replace(ids);
    }

    /// Deletes a channel record and every index entry that refers to it.
    pub fn remove_channel(&self, name: &ChannelName) {
        let inner = self.lock();
        if let Some(slot) = inner.channels.get(name) {
            slot.send_replace(None);
        }
        inner.public_index.send_if_modified(|set| set.remove(name));
        for slot in inner.private_index.values() {
            slot.send_if_modified(|set| set.remove(name));
        }
        if let Some(slot) = inner.owners.get(name) {
            slot.send_replace(BTreeSet::new());
        }
        debug!("Removed channel {}", name);
    }

    // ── Inspection ───────────────────────────────────────────────

    /// Returns the stored channel record, if any.
    pub fn channel(&self, name: &ChannelName) -> Option<Channel> {
        self.lock()
            .channels
            .get(name)
            .and_then(|slot| slot.borrow().clone())
    }

    /// Returns the stored user record, if any.
    pub fn user(&self, id: &UserId) -> Option<User> {
        self.lock()
            .users
            .get(id)
            .and_then(|slot| slot.borrow().clone())
    }

    pub fn public_channel_ids(&self) -> Vec<ChannelName> {
        self.lock().public_index.borrow().iter().cloned().collect()
    }

    pub fn private_channel_ids(&self, user: &UserId) -> Vec<ChannelName> {
        self.lock()
            .private_index
            .get(user)
            .map(|slot| slot.borrow().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn owner_ids(&self, channel: &ChannelName) -> Vec<UserId> {
        self.lock()
            .owners
            .get(channel)
            .map(|slot| slot.borrow().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of write attempts that reached the store, failed ones included.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// Number of observation streams currently alive.
    pub fn active_observers(&self) -> usize {
        self.observers.load(Ordering::SeqCst)
    }

    // ── Fault injection ──────────────────────────────────────────

    /// Makes the next `op` fail with `err`. Faults queue per operation.
    pub fn fail_next(&self, op: Operation, err: StorageError) {
        self.lock().faults.writes.push_back((op, err));
    }

    /// Makes the next observation of `key` yield a transport error and end.
    pub fn fail_index(&self, key: IndexKey) {
        self.lock().faults.indexes.insert(key);
    }

    /// Makes every read of this channel yield a permission error.
    pub fn fail_reads_for_channel(&self, name: &ChannelName) {
        self.lock().faults.channel_reads.insert(name.clone());
    }

    /// Makes every read of this user yield a permission error.
    pub fn fail_reads_for_user(&self, id: &UserId) {
        self.lock().faults.user_reads.insert(id.clone());
    }
}

#[async_trait]
impl ChannelsDatabase for MemoryDatabase {
    fn observe_public_channel_ids(&self) -> IdStream<ChannelName> {
        let mut inner = self.lock();
        if let Some(stream) = Self::index_fault(&mut inner, &IndexKey::Public) {
            return stream;
        }
        let rx = inner.public_index.subscribe();
        drop(inner);
        self.observe_index(rx)
    }

    fn observe_private_channel_ids_for(&self, user: &User) -> IdStream<ChannelName> {
        let mut inner = self.lock();
        let key = IndexKey::PrivateFor(user.id.clone());
        if let Some(stream) = Self::index_fault(&mut inner, &key) {
            return stream;
        }
        let rx = inner.private_slot(&user.id).subscribe();
        drop(inner);
        self.observe_index(rx)
    }

    fn read_channel_for(&self, name: &ChannelName) -> EntityStream<Channel> {
        let mut inner = self.lock();
        if inner.faults.channel_reads.contains(name) {
            return failed(StorageError::PermissionDenied(format!("channel {name}")));
        }
        let rx = inner.channel_slot(name).subscribe();
        drop(inner);
        self.observe(rx)
            .filter_map(|channel| async move { channel.map(Ok::<_, StorageError>) })
            .boxed()
    }

    fn observe_owner_ids_for(&self, channel: &Channel) -> IdStream<UserId> {
        let mut inner = self.lock();
        let key = IndexKey::OwnersOf(channel.name.clone());
        if let Some(stream) = Self::index_fault(&mut inner, &key) {
            return stream;
        }
        let rx = inner.owners_slot(&channel.name).subscribe();
        drop(inner);
        self.observe_index(rx)
    }

    async fn write_channel(&self, channel: &Channel) -> StorageResult<Channel> {
        let mut inner = self.lock();
        inner.begin_write(Operation::WriteChannel)?;
        let slot = inner.channel_slot(&channel.name);
        let exists = slot.borrow().is_some();
        if exists {
            return Err(StorageError::AlreadyExists(format!("channel {}", channel.name)));
        }
        slot.send_replace(Some(channel.clone()));
        debug!("Wrote channel record {}", channel.name);
        Ok(channel.clone())
    }

    async fn write_channel_to_public_index(&self, channel: &Channel) -> StorageResult<Channel> {
        let mut inner = self.lock();
        inner.begin_write(Operation::WritePublicIndex)?;
        inner
            .public_index
            .send_if_modified(|set| set.insert(channel.name.clone()));
        Ok(channel.clone())
    }

    async fn add_owner_to_private_channel(
        &self,
        user: &User,
        channel: &Channel,
    ) -> StorageResult<Channel> {
        let mut inner = self.lock();
        inner.begin_write(Operation::AddOwner)?;
        inner
            .owners_slot(&channel.name)
            .send_if_modified(|set| set.insert(user.id.clone()));
        Ok(channel.clone())
    }

    async fn remove_owner_from_private_channel(
        &self,
        user: &User,
        channel: &Channel,
    ) -> StorageResult<Channel> {
        let mut inner = self.lock();
        inner.begin_write(Operation::RemoveOwner)?;
        inner
            .owners_slot(&channel.name)
            .send_if_modified(|set| set.remove(&user.id));
        Ok(channel.clone())
    }

    async fn add_channel_to_user_private_index(
        &self,
        user: &User,
        channel: &Channel,
    ) -> StorageResult<Channel> {
        let mut inner = self.lock();
        inner.begin_write(Operation::AddToUserPrivateIndex)?;
        inner
            .private_slot(&user.id)
            .send_if_modified(|set| set.insert(channel.name.clone()));
        Ok(channel.clone())
    }

    async fn remove_channel_from_user_private_index(
        &self,
        user: &User,
        channel: &Channel,
    ) -> StorageResult<Channel> {
        let mut inner = self.lock();
        inner.begin_write(Operation::RemoveFromUserPrivateIndex)?;
        inner
            .private_slot(&user.id)
            .send_if_modified(|set| set.remove(&channel.name));
        Ok(channel.clone())
    }
}

impl UserDatabase for MemoryDatabase {
    fn observe_users(&self) -> EntityStream<Users> {
        let rx = self.lock().all_users.subscribe();
        self.observe(rx).map(Ok).boxed()
    }

    fn read_user_from(&self, id: &UserId) -> EntityStream<User> {
        let mut inner = self.lock();
        if inner.faults.user_reads.contains(id) {
            return failed(StorageError::PermissionDenied(format!("user {id}")));
        }
        let rx = inner.user_slot(id).subscribe();
        drop(inner);
        self.observe(rx)
            .filter_map(|user| async move { user.map(Ok::<_, StorageError>) })
            .boxed()
    }

    fn write_current_user(&self, user: &User) {
        let mut inner = self.lock();
        if let Err(e) = inner.begin_write(Operation::WriteUser) {
            warn!("Failed to write current user {}: {}", user.id, e);
            return;
        }
        inner.upsert_user(user.clone());
        debug!("Wrote current user {}", user.id);
    }
}
