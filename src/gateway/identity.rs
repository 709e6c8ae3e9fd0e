//! Caller identities and permission sets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

/// A persisted account.
///
/// `password_hash` and `version` stay server-side; they are skipped when the
/// record is serialized into a response.
#[derive(ToSchema, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub activated: bool,
    #[serde(skip)]
    pub version: i32,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password_hash", &"***")
            .field("activated", &self.activated)
            .field("version", &self.version)
            .finish()
    }
}

/// Who is making the request.
///
/// `Anonymous` is a distinguished marker, never persisted. Two anonymous
/// identities compare equal to each other and never equal an account.
#[derive(Clone, Debug)]
pub enum Identity {
    Anonymous,
    User(Arc<User>),
}

impl Identity {
    #[must_use]
    pub fn user(user: User) -> Self {
        Self::User(Arc::new(user))
    }

    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// The backing account, if the caller authenticated.
    #[must_use]
    pub fn account(&self) -> Option<&User> {
        match self {
            Self::Anonymous => None,
            Self::User(user) => Some(user),
        }
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Anonymous, Self::Anonymous) => true,
            (Self::User(a), Self::User(b)) => a.id == b.id,
            _ => false,
        }
    }
}

impl Eq for Identity {}

/// Permission codes (e.g. `comments:write`) held by an account.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Permissions(BTreeSet<String>);

impl Permissions {
    #[must_use]
    pub fn include(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for Permissions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
pub(crate) fn test_user(activated: bool) -> User {
    User {
        id: Uuid::new_v4(),
        created_at: Utc::now(),
        username: "reader".to_string(),
        email: "reader@example.com".to_string(),
        password_hash: String::new(),
        activated,
        version: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_identities_are_indistinguishable() {
        assert_eq!(Identity::Anonymous, Identity::Anonymous);
        assert!(Identity::Anonymous.is_anonymous());
        assert!(Identity::Anonymous.account().is_none());
    }

    #[test]
    fn anonymous_never_equals_an_account() {
        let user = Identity::user(test_user(true));
        assert_ne!(Identity::Anonymous, user);
        assert_ne!(user, Identity::Anonymous);
    }

    #[test]
    fn accounts_compare_by_id() {
        let first = test_user(true);
        let mut renamed = first.clone();
        renamed.username = "someone-else".to_string();
        assert_eq!(Identity::user(first), Identity::user(renamed));
        assert_ne!(Identity::user(test_user(true)), Identity::user(test_user(true)));
    }

    #[test]
    fn user_serialization_hides_secrets() -> anyhow::Result<()> {
        let mut user = test_user(false);
        user.password_hash = "$argon2id$secret".to_string();
        let json = serde_json::to_value(&user)?;
        assert!(json.get("password_hash").is_none());
        assert!(json.get("version").is_none());
        assert_eq!(json["activated"], false);
        assert!(!format!("{user:?}").contains("secret"));
        Ok(())
    }

    #[test]
    fn permissions_membership() {
        let permissions: Permissions = ["comments:read", "reviews:write"].into_iter().collect();
        assert!(permissions.include("reviews:write"));
        assert!(!permissions.include("reviews:read"));
        assert_eq!(
            permissions.iter().collect::<Vec<_>>(),
            vec!["comments:read", "reviews:write"]
        );
        assert!(Permissions::default().is_empty());
    }
}
