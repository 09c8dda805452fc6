use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rocket::http::Status;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    common::{
        election::{CandidateId, ElectionId, ElectionState, Visibility},
        password::hash_password,
    },
    db::election::{Election, ElectionCore},
    mongodb::Id,
};

use super::id::ApiId;

fn one() -> u16 {
    1
}

fn public() -> Visibility {
    Visibility::Public
}

/// An election specification, as submitted by an admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "public")]
    pub visibility: Visibility,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub candidates: Vec<CandidateId>,
    #[serde(default = "one")]
    pub max_choices: u16,
    /// Voter groups whose members become eligible.
    #[serde(default)]
    pub groups: Vec<ApiId>,
    /// Plaintext password voters must supply to cast a ballot.
    #[serde(default)]
    pub password: Option<String>,
}

impl ElectionSpec {
    /// Check the request describes a well-formed election.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Err(Error::Status(Status::BadRequest, reason.to_string()));

        if self.title.trim().is_empty() {
            return invalid("Election title must not be empty");
        }
        if self.opens_at >= self.closes_at {
            return invalid("Election must open before it closes");
        }
        if self.candidates.is_empty() {
            return invalid("Election must have at least one candidate");
        }
        if self.candidates.iter().any(|c| c.trim().is_empty()) {
            return invalid("Candidate names must not be empty");
        }
        let unique: HashSet<&CandidateId> = self.candidates.iter().collect();
        if unique.len() != self.candidates.len() {
            return invalid("Candidate names must be unique");
        }
        if self.max_choices == 0 || usize::from(self.max_choices) > self.candidates.len() {
            return invalid("max_choices must be between 1 and the number of candidates");
        }
        Ok(())
    }

    /// Validate and convert into a new draft election.
    pub fn into_election(self, created_by: Id) -> Result<ElectionCore> {
        self.validate()?;
        let password_hash = match self.password.as_deref() {
            Some(password) if !password.is_empty() => Some(hash_password(password)?),
            _ => None,
        };
        Ok(ElectionCore {
            title: self.title.trim().to_string(),
            description: self.description,
            state: ElectionState::Draft,
            visibility: self.visibility,
            opens_at: self.opens_at,
            closes_at: self.closes_at,
            candidates: self.candidates,
            max_choices: self.max_choices,
            groups: self.groups.into_iter().map(Into::into).collect(),
            password_hash,
            created_by,
            demo: false,
        })
    }
}

/// An API-friendly election description, containing no sensitive data or weird formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionDescription {
    pub id: ElectionId,
    pub title: String,
    pub description: String,
    pub state: ElectionState,
    pub visibility: Visibility,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub candidates: Vec<CandidateId>,
    pub max_choices: u16,
    pub groups: Vec<ApiId>,
    /// Whether voters must supply a password to cast.
    pub password_protected: bool,
}

impl From<Election> for ElectionDescription {
    fn from(election: Election) -> Self {
        let Election { id, election } = election;
        Self {
            id,
            title: election.title,
            description: election.description,
            state: election.state,
            visibility: election.visibility,
            opens_at: election.opens_at,
            closes_at: election.closes_at,
            candidates: election.candidates,
            max_choices: election.max_choices,
            groups: election.groups.into_iter().map(Into::into).collect(),
            password_protected: election.password_hash.is_some(),
        }
    }
}

/// A summary of an election, shorter than the full `ElectionDescription`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSummary {
    pub id: ElectionId,
    pub title: String,
    pub state: ElectionState,
    pub visibility: Visibility,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
}

impl From<Election> for ElectionSummary {
    fn from(election: Election) -> Self {
        let Election { id, election } = election;
        Self {
            id,
            title: election.title,
            state: election.state,
            visibility: election.visibility,
            opens_at: election.opens_at,
            closes_at: election.closes_at,
        }
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    use chrono::Duration;

    impl ElectionSpec {
        /// A public election that is open now.
        pub fn current_example() -> Self {
            let now = Utc::now();
            Self {
                title: "Student Council".to_string(),
                description: "Vote for your representatives".to_string(),
                visibility: Visibility::Public,
                opens_at: now - Duration::hours(1),
                closes_at: now + Duration::days(1),
                candidates: vec!["Alice".to_string(), "Bob".to_string(), "Carol".to_string()],
                max_choices: 2,
                groups: Vec::new(),
                password: None,
            }
        }

        /// A public election that opens tomorrow.
        pub fn future_example() -> Self {
            let now = Utc::now();
            Self {
                title: "Budget Referendum".to_string(),
                description: "Approve next year's budget".to_string(),
                visibility: Visibility::Public,
                opens_at: now + Duration::days(1),
                closes_at: now + Duration::days(2),
                candidates: vec!["Yes".to_string(), "No".to_string()],
                max_choices: 1,
                groups: Vec::new(),
                password: None,
            }
        }

        /// A private election that is open now.
        pub fn private_example() -> Self {
            Self {
                title: "Staff Ballot".to_string(),
                visibility: Visibility::Private,
                ..Self::current_example()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    #[test]
    fn valid_examples_pass() {
        ElectionSpec::current_example().validate().unwrap();
        ElectionSpec::future_example().validate().unwrap();
    }

    #[test]
    fn malformed_specs_are_refused() {
        let mut spec = ElectionSpec::current_example();
        spec.closes_at = spec.opens_at;
        assert!(spec.validate().is_err());

        let mut spec = ElectionSpec::current_example();
        spec.candidates.push("Alice".to_string());
        assert!(spec.validate().is_err());

        let mut spec = ElectionSpec::current_example();
        spec.candidates.clear();
        assert!(spec.validate().is_err());

        let mut spec = ElectionSpec::current_example();
        spec.max_choices = 0;
        assert!(spec.validate().is_err());
        spec.max_choices = 4;
        assert!(spec.validate().is_err());

        let mut spec = ElectionSpec::current_example();
        spec.title = " ".to_string();
        spec.opens_at = Utc::now() + Duration::days(1);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn password_is_hashed() {
        let mut spec = ElectionSpec::current_example();
        spec.password = Some("letmein".to_string());
        let election = spec.into_election(Id::new()).unwrap();
        assert_eq!(election.state, ElectionState::Draft);
        assert!(election.admits_password(Some("letmein")));
        assert!(!election.admits_password(Some("wrong")));
        assert!(!election.admits_password(None));
    }
}
