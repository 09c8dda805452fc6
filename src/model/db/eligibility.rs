use mongodb::{bson::doc, options::UpdateOptions};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{
    common::election::ElectionId,
    mongodb::{Coll, Id},
};

/// Permission for a voter to take part in a private election.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Eligibility {
    pub voter_id: Id,
    pub election_id: ElectionId,
}

impl Eligibility {
    pub fn new(voter_id: Id, election_id: ElectionId) -> Self {
        Self {
            voter_id,
            election_id,
        }
    }
}

/// Grant each of the given voters eligibility for an election, skipping
/// those already eligible. Returns the number of new grants.
pub async fn grant_eligibility(
    eligibility: &Coll<Eligibility>,
    election_id: ElectionId,
    voter_ids: impl IntoIterator<Item = Id>,
) -> Result<u64> {
    let options = UpdateOptions::builder().upsert(true).build();
    let mut granted = 0;
    for voter_id in voter_ids {
        let filter = doc! {
            "voter_id": voter_id,
            "election_id": election_id,
        };
        let update = doc! {
            "$setOnInsert": {
                "voter_id": voter_id,
                "election_id": election_id,
            }
        };
        let result = eligibility
            .update_one(filter, update, options.clone())
            .await?;
        if result.upserted_id.is_some() {
            granted += 1;
        }
    }
    Ok(granted)
}
