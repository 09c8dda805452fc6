use serde::{Deserialize, Serialize};

use crate::model::{
    db::group::{NewVoterGroup, VoterGroup},
    mongodb::Id,
};

use super::id::ApiId;

/// A request to create a voter group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    #[serde(default)]
    pub members: Vec<ApiId>,
}

impl GroupSpec {
    pub fn into_group(self, created_by: Id) -> NewVoterGroup {
        let mut members: Vec<Id> = self.members.into_iter().map(Into::into).collect();
        members.sort();
        members.dedup();
        NewVoterGroup {
            name: self.name.trim().to_string(),
            members,
            created_by,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescription {
    pub id: ApiId,
    pub name: String,
    pub members: Vec<ApiId>,
}

impl From<VoterGroup> for GroupDescription {
    fn from(group: VoterGroup) -> Self {
        Self {
            id: group.id.into(),
            members: group.members.iter().copied().map(Into::into).collect(),
            name: group.group.name,
        }
    }
}
