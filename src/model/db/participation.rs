use std::ops::Deref;

use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};

use crate::model::{common::election::ElectionId, mongodb::Id};

/// Which voter took part in which election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participation {
    pub voter_id: Id,
    pub election_id: ElectionId,
}

/// Proof that a voter has cast their ballot in an election.
///
/// The `(voter_id, election_id)` pair is the document's `_id`, so inserting a
/// marker is the single check-and-set that prevents double voting. Markers are
/// kept apart from the votes and carry nothing else, not even a generated ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipationMarker {
    #[serde(rename = "_id")]
    pub id: Participation,
}

impl ParticipationMarker {
    pub fn new(voter_id: Id, election_id: ElectionId) -> Self {
        Self {
            id: Participation {
                voter_id,
                election_id,
            },
        }
    }

    /// Filter matching exactly this marker.
    pub fn filter(&self) -> Document {
        doc! {
            "_id": {
                "voter_id": self.voter_id,
                "election_id": self.election_id,
            }
        }
    }

    /// Filter matching every marker for the given election(s).
    pub fn election_filter(election_id: impl Into<mongodb::bson::Bson>) -> Document {
        doc! { "_id.election_id": election_id.into() }
    }

    /// Filter matching every marker left by the given voter.
    pub fn voter_filter(voter_id: Id) -> Document {
        doc! { "_id.voter_id": voter_id }
    }
}

impl Deref for ParticipationMarker {
    type Target = Participation;

    fn deref(&self) -> &Self::Target {
        &self.id
    }
}
