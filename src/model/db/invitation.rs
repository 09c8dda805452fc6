use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{common::election::ElectionId, mongodb::Id};

/// An invitation to a private election.
///
/// A personal invitation (with an email) can be redeemed once; an open
/// invitation can be redeemed by any number of voters until it expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationCore {
    pub election_id: ElectionId,
    pub code: String,
    pub email: Option<String>,
    pub used: bool,
    pub used_by: Option<Id>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<mongodb::bson::DateTime>,
}

impl InvitationCore {
    /// Create a fresh invitation with a random code.
    pub fn new(
        election_id: ElectionId,
        email: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            election_id,
            code: Uuid::new_v4().to_string(),
            email,
            used: false,
            used_by: None,
            created_at: now,
            expires_at: expires_at.map(Into::into),
        }
    }

    /// Whether this invitation is personal, i.e. single-use.
    pub fn is_personal(&self) -> bool {
        self.email.is_some()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at.map(|at| at.to_chrono())
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        let expired = self.expires_at().map_or(false, |at| now >= at);
        let spent = self.is_personal() && self.used;
        !expired && !spent
    }
}

/// An invitation without an ID.
pub type NewInvitation = InvitationCore;

/// An invitation from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub invitation: InvitationCore,
}

impl Deref for Invitation {
    type Target = InvitationCore;

    fn deref(&self) -> &Self::Target {
        &self.invitation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    #[test]
    fn validity() {
        let now = Utc::now();
        let open = InvitationCore::new(1, None, Some(now + Duration::hours(1)), now);
        assert!(open.is_valid(now));
        assert!(!open.is_valid(now + Duration::hours(1)));

        let mut used_open = open.clone();
        used_open.used = true;
        assert!(used_open.is_valid(now));

        let mut personal = InvitationCore::new(1, Some("a@example.com".into()), None, now);
        assert!(personal.is_valid(now + Duration::days(365)));
        personal.used = true;
        assert!(!personal.is_valid(now));
    }

    #[test]
    fn codes_are_unique_uuids() {
        let now = Utc::now();
        let a = InvitationCore::new(1, None, None, now);
        let b = InvitationCore::new(1, None, None, now);
        assert_ne!(a.code, b.code);
        assert!(Uuid::parse_str(&a.code).is_ok());
    }
}
