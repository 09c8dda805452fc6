use chrono::{DateTime, Utc};
use mongodb::bson::doc;
use rocket::{futures::TryStreamExt, http::Status};

use crate::error::{Error, Result};
use crate::model::{
    api::auth::AuthToken,
    common::election::{ElectionId, ElectionState},
    db::{
        election::Election,
        eligibility::{grant_eligibility, Eligibility},
        group::VoterGroup,
        invitation::Invitation,
        voter::Voter,
    },
    mongodb::{u32_id_filter, Coll, Id},
};

/// Load the voter a token was issued to.
pub async fn voter_by_token(token: &AuthToken<Voter>, voters: &Coll<Voter>) -> Result<Voter> {
    voters
        .find_one(token.id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Voter with ID '{}'", token.id)))
}

/// Load an election by ID, whatever its state.
pub async fn election_by_id(elections: &Coll<Election>, election_id: ElectionId) -> Result<Election> {
    elections
        .find_one(u32_id_filter(election_id), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election with ID '{election_id}'")))
}

/// Load an election by ID, unless it is still a draft.
pub async fn published_election_by_id(
    elections: &Coll<Election>,
    election_id: ElectionId,
) -> Result<Election> {
    let filter = doc! {
        "_id": election_id,
        "$or": [{"state": ElectionState::Published}, {"state": ElectionState::Archived}],
    };
    elections
        .find_one(filter, None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election with ID '{election_id}'")))
}

/// Grant eligibility for the election to every current member of its groups.
pub async fn grant_group_members(
    groups: &Coll<VoterGroup>,
    eligibility: &Coll<Eligibility>,
    election: &Election,
) -> Result<u64> {
    if election.groups.is_empty() {
        return Ok(0);
    }
    let filter = doc! {
        "_id": { "$in": election.groups.clone() },
    };
    let members: Vec<Id> = groups
        .find(filter, None)
        .await?
        .map_ok(|group| group.group.members)
        .try_concat()
        .await?;
    let granted = grant_eligibility(eligibility, election.id, members).await?;
    if granted > 0 {
        info!("Granted {granted} voter(s) eligibility for election {}", election.id);
    }
    Ok(granted)
}

/// Grant eligibility to the members of a group for every election using it
/// that has not yet closed.
pub async fn sync_group_eligibility(
    group: &VoterGroup,
    elections: &Coll<Election>,
    eligibility: &Coll<Eligibility>,
    now: DateTime<Utc>,
) -> Result<u64> {
    let filter = doc! {
        "groups": group.id,
        "state": { "$ne": ElectionState::Archived },
        "closes_at": { "$gt": now },
    };
    let affected: Vec<Election> = elections.find(filter, None).await?.try_collect().await?;
    let mut granted = 0;
    for election in affected {
        granted += grant_eligibility(eligibility, election.id, group.members.iter().copied()).await?;
    }
    Ok(granted)
}

/// Redeem an invitation on behalf of a voter, making them eligible for its election.
pub async fn redeem_invitation(
    invitations: &Coll<Invitation>,
    eligibility: &Coll<Eligibility>,
    code: &str,
    voter_id: Id,
    now: DateTime<Utc>,
) -> Result<ElectionId> {
    let spent = || {
        Error::Status(
            Status::Gone,
            "Invitation has expired or already been used".to_string(),
        )
    };

    let invitation = invitations
        .find_one(doc! { "code": code }, None)
        .await?
        .ok_or_else(|| Error::not_found("Invitation"))?;
    if !invitation.is_valid(now) {
        return Err(spent());
    }

    // Only unused invitations are claimed, so two voters racing for a
    // personal invitation cannot both succeed.
    let filter = if invitation.is_personal() {
        doc! { "_id": invitation.id, "used": false }
    } else {
        invitation.id.as_doc()
    };
    let update = doc! {
        "$set": { "used": true, "used_by": voter_id },
    };
    let result = invitations.update_one(filter, update, None).await?;
    if result.matched_count == 0 {
        return Err(spent());
    }

    grant_eligibility(eligibility, invitation.election_id, [voter_id]).await?;
    debug!("Invitation redeemed for election {}", invitation.election_id);
    Ok(invitation.election_id)
}
