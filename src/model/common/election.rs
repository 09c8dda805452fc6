use chrono::{DateTime, Utc};
use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

pub type ElectionId = u32;
pub type CandidateId = String;

/// States in the Election lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionState {
    /// Under construction, only visible to admins.
    Draft,
    /// Ready, in progress, or completed. Visible to all.
    Published,
    /// Completed, hidden by default, but retrievable by all.
    Archived,
}

impl From<ElectionState> for Bson {
    fn from(state: ElectionState) -> Self {
        to_bson(&state).expect("Serialisation is infallible")
    }
}

/// Who may vote in an election.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    /// Any registered voter.
    Public,
    /// Only voters with an eligibility record.
    Private,
}

impl From<Visibility> for Bson {
    fn from(visibility: Visibility) -> Self {
        to_bson(&visibility).expect("Serialisation is infallible")
    }
}

/// Where a point in time falls relative to an election's voting window.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    NotYetOpen,
    Open,
    Closed,
}

impl Phase {
    /// The window is half-open: `[opens_at, closes_at)`.
    pub fn at(now: DateTime<Utc>, opens_at: DateTime<Utc>, closes_at: DateTime<Utc>) -> Self {
        if now < opens_at {
            Self::NotYetOpen
        } else if now < closes_at {
            Self::Open
        } else {
            Self::Closed
        }
    }
}
