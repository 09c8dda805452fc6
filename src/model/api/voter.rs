use rocket::http::Status;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    common::{
        demographic::{AgeGroup, Demographic, Gender},
        election::ElectionId,
        password::{hash_password, MIN_PASSWORD_LENGTH},
    },
    db::voter::{NewVoter, Voter},
};

use super::id::ApiId;

fn unknown_country() -> String {
    Demographic::default().country
}

/// A voter's self-declared demographics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemographicSpec {
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub age_group: AgeGroup,
    #[serde(default = "unknown_country")]
    pub country: String,
    #[serde(default)]
    pub region: Option<String>,
}

impl DemographicSpec {
    pub fn demographic(&self) -> Demographic {
        Demographic {
            gender: self.gender,
            age_group: self.age_group,
            country: self.country.clone(),
        }
    }
}

/// A voter registration request.
#[derive(Clone, Serialize, Deserialize)]
pub struct VoterRegistration {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub password: String,
    #[serde(flatten)]
    pub demographic: DemographicSpec,
    /// An invitation code to redeem as soon as the account exists.
    #[serde(default)]
    pub invitation: Option<String>,
}

impl TryFrom<VoterRegistration> for NewVoter {
    type Error = Error;

    /// Hash the password and check the username and password are acceptable.
    fn try_from(registration: VoterRegistration) -> Result<Self> {
        if registration.username.trim().is_empty()
            || registration.password.len() < MIN_PASSWORD_LENGTH
        {
            return Err(Error::Status(
                Status::BadRequest,
                format!(
                    "Username must be non-empty and password at least {MIN_PASSWORD_LENGTH} characters"
                ),
            ));
        }

        Ok(Self {
            username: registration.username.trim().to_string(),
            email: registration.email,
            password_hash: hash_password(&registration.password)?,
            demographic: registration.demographic.demographic(),
            region: registration.demographic.region,
        })
    }
}

/// Voter login credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct VoterCredentials {
    pub username: String,
    pub password: String,
}

/// A voter's view of their own account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterProfile {
    pub id: ApiId,
    pub username: String,
    pub email: Option<String>,
    #[serde(flatten)]
    pub demographic: DemographicSpec,
    /// Elections this voter has cast a ballot in. Which choice they made is not recorded.
    pub voted_in: Vec<ElectionId>,
}

impl VoterProfile {
    pub fn new(voter: Voter, voted_in: Vec<ElectionId>) -> Self {
        Self {
            id: voter.id.into(),
            demographic: DemographicSpec {
                gender: voter.demographic.gender,
                age_group: voter.demographic.age_group,
                country: voter.voter.demographic.country,
                region: voter.voter.region,
            },
            username: voter.voter.username,
            email: voter.voter.email,
            voted_in,
        }
    }
}

#[cfg(test)]
mod examples {
    use super::*;

    impl VoterRegistration {
        pub fn example() -> Self {
            Self {
                username: "voter1".to_string(),
                email: Some("voter1@example.com".to_string()),
                password: "correct horse battery".to_string(),
                demographic: DemographicSpec {
                    gender: Gender::Male,
                    age_group: AgeGroup::From18To25,
                    country: "Cyprus".to_string(),
                    region: Some("Nicosia".to_string()),
                },
                invitation: None,
            }
        }
    }
}
