use chrono::Utc;
use mongodb::bson::doc;
use rocket::{futures::TryStreamExt, http::Status, serde::json::Json, Route};

use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::AuthToken,
        group::{GroupDescription, GroupSpec},
        id::ApiId,
    },
    db::{
        admin::Admin,
        election::Election,
        eligibility::Eligibility,
        group::{NewVoterGroup, VoterGroup},
        voter::Voter,
    },
    mongodb::{Coll, Id},
};

use super::common::sync_group_eligibility;

pub fn routes() -> Vec<Route> {
    routes![get_groups, create_group, replace_members]
}

#[get("/groups")]
async fn get_groups(
    _token: AuthToken<Admin>,
    groups: Coll<VoterGroup>,
) -> Result<Json<Vec<GroupDescription>>> {
    let all = groups
        .find(None, None)
        .await?
        .map_ok(GroupDescription::from)
        .try_collect()
        .await?;
    Ok(Json(all))
}

#[post("/groups", data = "<spec>", format = "json")]
async fn create_group(
    token: AuthToken<Admin>,
    spec: Json<GroupSpec>,
    new_groups: Coll<NewVoterGroup>,
    groups: Coll<VoterGroup>,
    voters: Coll<Voter>,
) -> Result<Json<GroupDescription>> {
    let group = spec.0.into_group(token.id);
    if group.name.is_empty() {
        return Err(Error::Status(
            Status::BadRequest,
            "Group name must not be empty".to_string(),
        ));
    }
    ensure_voters_exist(&voters, &group.members).await?;

    let id: Id = new_groups
        .insert_one(&group, None)
        .await?
        .inserted_id
        .as_object_id()
        .ok_or_else(|| {
            Error::Status(
                Status::InternalServerError,
                "Group was stored without an object ID".to_string(),
            )
        })?
        .into();
    let group = groups
        .find_one(id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Group with ID '{id}'")))?;
    info!("Created voter group {id} with {} member(s)", group.group.members.len());
    Ok(Json(group.into()))
}

#[put("/groups/<group_id>/members", data = "<members>", format = "json")]
async fn replace_members(
    _token: AuthToken<Admin>,
    group_id: Id,
    members: Json<Vec<ApiId>>,
    groups: Coll<VoterGroup>,
    voters: Coll<Voter>,
    elections: Coll<Election>,
    eligibility: Coll<Eligibility>,
) -> Result<Json<GroupDescription>> {
    let mut members: Vec<Id> = members.0.into_iter().map(Into::into).collect();
    members.sort();
    members.dedup();
    ensure_voters_exist(&voters, &members).await?;

    let update = doc! {
        "$set": { "members": members },
    };
    let result = groups.update_one(group_id.as_doc(), update, None).await?;
    if result.matched_count == 0 {
        return Err(Error::not_found(format!("Group with ID '{group_id}'")));
    }
    let group = groups
        .find_one(group_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Group with ID '{group_id}'")))?;

    // New members become eligible for the group's elections that are still to come.
    sync_group_eligibility(&group, &elections, &eligibility, Utc::now()).await?;
    Ok(Json(group.into()))
}

async fn ensure_voters_exist(voters: &Coll<Voter>, ids: &[Id]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let filter = doc! {
        "_id": { "$in": ids.to_vec() },
    };
    let found = voters.count_documents(filter, None).await?;
    if found != ids.len() as u64 {
        return Err(Error::not_found("One or more voters"));
    }
    Ok(())
}
