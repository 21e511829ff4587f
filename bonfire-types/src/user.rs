use crate::UserId;
use serde::{Deserialize, Serialize};

/// A resolved user record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl User {
    /// Creates a user without an avatar.
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            photo_url: None,
        }
    }

    /// Sets the avatar reference.
    #[must_use]
    pub fn with_photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }
}

/// An ordered collection of users with no duplicate identifiers.
///
/// Iteration follows insertion order so output stays deterministic, but two
/// collections compare equal whenever they hold the same users.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Users(Vec<User>);

impl Users {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, User> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether a user with this identifier is present.
    pub fn contains(&self, id: &UserId) -> bool {
        self.0.iter().any(|u| &u.id == id)
    }

    /// Looks up a user by identifier.
    pub fn get(&self, id: &UserId) -> Option<&User> {
        self.0.iter().find(|u| &u.id == id)
    }

    pub fn as_slice(&self) -> &[User] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<User> {
        self.0
    }
}

impl PartialEq for Users {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().all(|u| other.0.contains(u))
    }
}

impl Eq for Users {}

impl From<Vec<User>> for Users {
    /// Keeps the first occurrence of each identifier.
    fn from(users: Vec<User>) -> Self {
        let mut unique: Vec<User> = Vec::with_capacity(users.len());
        for user in users {
            if !unique.iter().any(|u| u.id == user.id) {
                unique.push(user);
            }
        }
        Self(unique)
    }
}

impl FromIterator<User> for Users {
    fn from_iter<I: IntoIterator<Item = User>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl IntoIterator for Users {
    type Item = User;
    type IntoIter = std::vec::IntoIter<User>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Users {
    type Item = &'a User;
    type IntoIter = std::slice::Iter<'a, User>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
