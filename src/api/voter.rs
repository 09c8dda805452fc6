use chrono::Utc;
use mongodb::bson::{doc, to_bson};
use rocket::{futures::TryStreamExt, http::Status, serde::json::Json, Route, State};

use crate::ballot_box::{ballot_status, cast_ballot, MongoBallotBox};
use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::AuthToken,
        ballot::{BallotSpec, BallotStatus},
        receipt::Receipt,
        voter::{DemographicSpec, VoterProfile},
    },
    common::election::ElectionId,
    db::{
        eligibility::Eligibility, invitation::Invitation, participation::ParticipationMarker,
        voter::Voter,
    },
    mongodb::Coll,
};
use crate::Config;

use super::common::{redeem_invitation, voter_by_token};

pub fn routes() -> Vec<Route> {
    routes![
        get_profile,
        update_profile,
        accept_invitation,
        election_status,
        cast,
    ]
}

#[get("/voter/profile")]
async fn get_profile(
    token: AuthToken<Voter>,
    voters: Coll<Voter>,
    participation: Coll<ParticipationMarker>,
) -> Result<Json<VoterProfile>> {
    let voter = voter_by_token(&token, &voters).await?;
    let voted_in = voted_in(&participation, &voter).await?;
    Ok(Json(VoterProfile::new(voter, voted_in)))
}

#[put("/voter/profile", data = "<demographic>", format = "json")]
async fn update_profile(
    token: AuthToken<Voter>,
    demographic: Json<DemographicSpec>,
    voters: Coll<Voter>,
    participation: Coll<ParticipationMarker>,
) -> Result<Json<VoterProfile>> {
    // Votes already cast keep the demographic they were cast with.
    let update = doc! {
        "$set": {
            "gender": to_bson(&demographic.gender)
                .map_err(|e| Error::Status(Status::BadRequest, e.to_string()))?,
            "age_group": to_bson(&demographic.age_group)
                .map_err(|e| Error::Status(Status::BadRequest, e.to_string()))?,
            "country": demographic.demographic().country,
            "region": demographic.region.clone(),
        }
    };
    voters.update_one(token.id.as_doc(), update, None).await?;

    let voter = voter_by_token(&token, &voters).await?;
    let voted_in = voted_in(&participation, &voter).await?;
    Ok(Json(VoterProfile::new(voter, voted_in)))
}

#[post("/voter/invitations/<code>")]
async fn accept_invitation(
    token: AuthToken<Voter>,
    code: &str,
    invitations: Coll<Invitation>,
    eligibility: Coll<Eligibility>,
) -> Result<Json<ElectionId>> {
    let election_id = redeem_invitation(&invitations, &eligibility, code, token.id, Utc::now()).await?;
    Ok(Json(election_id))
}

#[get("/voter/elections/<election_id>/status")]
async fn election_status(
    token: AuthToken<Voter>,
    election_id: ElectionId,
    voters: Coll<Voter>,
    ballot_box: MongoBallotBox,
) -> Result<Json<BallotStatus>> {
    let voter = voter_by_token(&token, &voters).await?;
    let status = ballot_status(&ballot_box, &voter, election_id, Utc::now()).await?;
    Ok(Json(status))
}

#[post("/voter/elections/<election_id>/cast", data = "<ballot>", format = "json")]
async fn cast(
    token: AuthToken<Voter>,
    election_id: ElectionId,
    ballot: Json<BallotSpec>,
    voters: Coll<Voter>,
    ballot_box: MongoBallotBox,
    config: &State<Config>,
) -> Result<Json<Vec<Receipt>>> {
    let voter = voter_by_token(&token, &voters).await?;
    let receipts = cast_ballot(&ballot_box, &voter, election_id, ballot.0, Utc::now(), config).await?;
    Ok(Json(receipts))
}

/// Elections the voter has cast a ballot in, in ID order.
async fn voted_in(
    participation: &Coll<ParticipationMarker>,
    voter: &Voter,
) -> Result<Vec<ElectionId>> {
    let mut voted_in: Vec<ElectionId> = participation
        .find(ParticipationMarker::voter_filter(voter.id), None)
        .await?
        .map_ok(|marker| marker.election_id)
        .try_collect()
        .await?;
    voted_in.sort_unstable();
    Ok(voted_in)
}
