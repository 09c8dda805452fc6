use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::{
    doc, serde_helpers::chrono_datetime_as_bson_datetime, DateTime as BsonDateTime, Document,
};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{
        election::{CandidateId, ElectionId, ElectionState, Phase, Visibility},
        password::verify_password,
    },
    mongodb::Id,
};

/// Core election data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionCore {
    pub title: String,
    pub description: String,
    pub state: ElectionState,
    pub visibility: Visibility,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub opens_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub closes_at: DateTime<Utc>,
    /// Candidates in ballot order.
    pub candidates: Vec<CandidateId>,
    pub max_choices: u16,
    /// Voter groups whose members are eligible.
    pub groups: Vec<Id>,
    /// Argon2 hash of the optional password voters must supply to cast.
    pub password_hash: Option<String>,
    pub created_by: Id,
    /// Seeded by the operator tool, and removed by its purge.
    #[serde(default)]
    pub demo: bool,
}

impl ElectionCore {
    /// Where `now` falls relative to the voting window.
    pub fn phase(&self, now: DateTime<Utc>) -> Phase {
        Phase::at(now, self.opens_at, self.closes_at)
    }

    /// Elections may be changed while drafts, or published but not yet open.
    pub fn accepts_changes(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            ElectionState::Draft => true,
            ElectionState::Published => self.phase(now) == Phase::NotYetOpen,
            ElectionState::Archived => false,
        }
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    pub fn has_candidate(&self, candidate: &str) -> bool {
        self.candidates.iter().any(|c| c == candidate)
    }

    /// Check the election password, if it has one.
    pub fn admits_password(&self, password: Option<&str>) -> bool {
        match &self.password_hash {
            None => true,
            Some(hash) => password.map_or(false, |password| verify_password(hash, password)),
        }
    }
}

/// An election from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: ElectionId,
    #[serde(flatten)]
    pub election: ElectionCore,
}

impl Election {
    pub fn new(id: ElectionId, election: ElectionCore) -> Self {
        Self { id, election }
    }

    /// Filter matching the election only while it still accepts changes,
    /// mirroring [`ElectionCore::accepts_changes`].
    pub fn changeable_filter(id: ElectionId, now: DateTime<Utc>) -> Document {
        doc! {
            "_id": id,
            "$or": [
                { "state": ElectionState::Draft },
                {
                    "state": ElectionState::Published,
                    "opens_at": { "$gt": BsonDateTime::from_chrono(now) },
                },
            ],
        }
    }
}

impl Deref for Election {
    type Target = ElectionCore;

    fn deref(&self) -> &Self::Target {
        &self.election
    }
}

impl DerefMut for Election {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.election
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    use chrono::TimeZone;

    impl Election {
        /// A published, public election open from 09:00 to 17:00 on 1 May 2024.
        pub fn example() -> Self {
            Self {
                id: 1,
                election: ElectionCore {
                    title: "Board of Trustees".to_string(),
                    description: "Annual trustee election".to_string(),
                    state: ElectionState::Published,
                    visibility: Visibility::Public,
                    opens_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
                    closes_at: Utc.with_ymd_and_hms(2024, 5, 1, 17, 0, 0).unwrap(),
                    candidates: vec!["X".to_string(), "Y".to_string(), "Z".to_string()],
                    max_choices: 1,
                    groups: Vec::new(),
                    password_hash: None,
                    created_by: Id::new(),
                    demo: false,
                },
            }
        }

        /// Ten in the morning of [`Election::example`]'s voting day.
        pub fn example_now() -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
        }
    }
}
