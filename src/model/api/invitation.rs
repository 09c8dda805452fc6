use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{common::election::ElectionId, db::invitation::Invitation};

/// A request to invite voters to a private election.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvitationSpec {
    /// Makes the invitation personal and single-use.
    #[serde(default)]
    pub email: Option<String>,
    /// Defaults to the election's closing time.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationDescription {
    pub code: String,
    pub election_id: ElectionId,
    pub email: Option<String>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<Invitation> for InvitationDescription {
    fn from(invitation: Invitation) -> Self {
        Self {
            expires_at: invitation.expires_at(),
            code: invitation.invitation.code,
            election_id: invitation.invitation.election_id,
            email: invitation.invitation.email,
            used: invitation.invitation.used,
            created_at: invitation.invitation.created_at,
        }
    }
}
