use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// A named set of voters that can be attached to private elections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterGroupCore {
    pub name: String,
    pub members: Vec<Id>,
    pub created_by: Id,
}

/// A group without an ID.
pub type NewVoterGroup = VoterGroupCore;

/// A voter group from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoterGroup {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub group: VoterGroupCore,
}

impl Deref for VoterGroup {
    type Target = VoterGroupCore;

    fn deref(&self) -> &Self::Target {
        &self.group
    }
}

impl DerefMut for VoterGroup {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.group
    }
}
