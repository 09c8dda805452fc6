use serde::{Deserialize, Serialize};

use crate::model::common::election::{CandidateId, ElectionId, Phase};

/// A ballot as submitted by a voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotSpec {
    /// Between one and the election's `max_choices` distinct candidates.
    pub choices: Vec<CandidateId>,
    /// Required only for password-protected elections.
    #[serde(default)]
    pub password: Option<String>,
}

impl BallotSpec {
    pub fn single(candidate: impl Into<CandidateId>) -> Self {
        Self {
            choices: vec![candidate.into()],
            password: None,
        }
    }
}

/// Whether a voter may still cast a ballot in an election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotStatus {
    pub election_id: ElectionId,
    pub phase: Phase,
    pub eligible: bool,
    pub has_voted: bool,
}
