use crate::ChannelName;
use serde::{Deserialize, Serialize};

/// Who can see a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    /// Visible to every user.
    Public,
    /// Visible only to the channel's owners.
    Private,
}

/// A resolved channel record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub name: ChannelName,
    pub access: Access,
}

impl Channel {
    pub fn new(name: impl Into<ChannelName>, access: Access) -> Self {
        Self {
            name: name.into(),
            access,
        }
    }

    pub fn public(name: impl Into<ChannelName>) -> Self {
        Self::new(name, Access::Public)
    }

    pub fn private(name: impl Into<ChannelName>) -> Self {
        Self::new(name, Access::Private)
    }

    pub fn is_private(&self) -> bool {
        self.access == Access::Private
    }
}

/// An ordered collection of channels with no duplicate names.
///
/// Equality ignores order, matching [`crate::Users`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channels(Vec<Channel>);

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Channel> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether a channel with this name is present.
    pub fn contains(&self, name: &ChannelName) -> bool {
        self.0.iter().any(|c| &c.name == name)
    }

    pub fn get(&self, name: &ChannelName) -> Option<&Channel> {
        self.0.iter().find(|c| &c.name == name)
    }

    pub fn as_slice(&self) -> &[Channel] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<Channel> {
        self.0
    }
}

impl PartialEq for Channels {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().all(|c| other.0.contains(c))
    }
}

impl Eq for Channels {}

impl From<Vec<Channel>> for Channels {
    /// Keeps the first occurrence of each name.
    fn from(channels: Vec<Channel>) -> Self {
        let mut unique: Vec<Channel> = Vec::with_capacity(channels.len());
        for channel in channels {
            if !unique.iter().any(|c| c.name == channel.name) {
                unique.push(channel);
            }
        }
        Self(unique)
    }
}

impl FromIterator<Channel> for Channels {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl IntoIterator for Channels {
    type Item = Channel;
    type IntoIter = std::vec::IntoIter<Channel>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Channels {
    type Item = &'a Channel;
    type IntoIter = std::slice::Iter<'a, Channel>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
