use chrono::Utc;
use mongodb::bson::doc;
use rocket::{futures::TryStreamExt, http::Status, serde::json::Json, Route};

use crate::error::{Error, Result};
use crate::model::{
    api::{
        admin::AdminCredentials,
        auth::AuthToken,
        election::{ElectionDescription, ElectionSpec},
        id::ApiId,
        invitation::{InvitationDescription, InvitationSpec},
    },
    common::election::{ElectionId, ElectionState, Visibility},
    db::{
        admin::{Admin, NewAdmin},
        election::Election,
        eligibility::{grant_eligibility, Eligibility},
        group::VoterGroup,
        invitation::{Invitation, NewInvitation},
        voter::Voter,
    },
    mongodb::{Coll, Counter, Id, ELECTION_ID_COUNTER_ID},
};

use super::common::{election_by_id, grant_group_members};

pub fn routes() -> Vec<Route> {
    routes![
        get_admins,
        create_admin,
        delete_admin,
        create_election,
        modify_election,
        publish_election,
        archive_election,
        delete_election,
        grant_election_eligibility,
        get_invitations,
        create_invitation,
    ]
}

#[get("/admins")]
async fn get_admins(_token: AuthToken<Admin>, admins: Coll<Admin>) -> Result<Json<Vec<String>>> {
    let admin_list: Vec<Admin> = admins.find(None, None).await?.try_collect().await?;
    let admin_names = admin_list
        .into_iter()
        .map(|admin| admin.admin.username)
        .collect();
    Ok(Json(admin_names))
}

#[post("/admins", data = "<new_admin>", format = "json")]
async fn create_admin(
    _token: AuthToken<Admin>,
    new_admin: Json<AdminCredentials>,
    admins: Coll<NewAdmin>,
) -> Result<()> {
    // Check username uniqueness.
    let filter = doc! {
        "username": &new_admin.username,
    };
    let existing = admins.find_one(filter, None).await?;
    if existing.is_some() {
        return Err(Error::Status(
            Status::BadRequest,
            format!("Admin username already in use: {}", new_admin.username),
        ));
    }

    // Create and insert the admin.
    let admin = NewAdmin::try_from(new_admin.0)?;
    admins.insert_one(admin, None).await?;
    Ok(())
}

#[delete("/admins", data = "<username>", format = "json")]
async fn delete_admin(
    _token: AuthToken<Admin>,
    username: Json<String>,
    admins: Coll<Admin>,
) -> Result<()> {
    // Prevent deleting the last admin.
    let count = admins.count_documents(None, None).await?;
    if count == 1 {
        return Err(Error::Status(
            Status::UnprocessableEntity,
            "Cannot delete last admin!".to_string(),
        ));
    }

    let filter = doc! {
        "username": &*username,
    };
    let result = admins.delete_one(filter, None).await?;
    if result.deleted_count == 0 {
        Err(Error::not_found(format!("Admin {}", *username)))
    } else {
        Ok(())
    }
}

#[post("/elections", data = "<spec>", format = "json")]
async fn create_election(
    token: AuthToken<Admin>,
    spec: Json<ElectionSpec>,
    elections: Coll<Election>,
    counters: Coll<Counter>,
    groups: Coll<VoterGroup>,
    eligibility: Coll<Eligibility>,
    invitations: Coll<NewInvitation>,
) -> Result<Json<ElectionDescription>> {
    let core = spec.0.into_election(token.id)?;
    let id = Counter::next(&counters, ELECTION_ID_COUNTER_ID).await?;
    let election = Election::new(id, core);
    elections.insert_one(&election, None).await?;
    info!("Created election {} ({})", election.id, election.title);

    grant_group_members(&groups, &eligibility, &election).await?;

    // Private elections always start with one open invitation to share.
    if election.visibility == Visibility::Private {
        let invitation = NewInvitation::new(election.id, None, Some(election.closes_at), Utc::now());
        invitations.insert_one(invitation, None).await?;
    }

    Ok(Json(election.into()))
}

#[put("/elections/<election_id>", data = "<spec>", format = "json")]
async fn modify_election(
    _token: AuthToken<Admin>,
    election_id: ElectionId,
    spec: Json<ElectionSpec>,
    elections: Coll<Election>,
    groups: Coll<VoterGroup>,
    eligibility: Coll<Eligibility>,
) -> Result<Json<ElectionDescription>> {
    // Get the existing election.
    let existing = election_by_id(&elections, election_id).await?;

    // Check we are allowed to modify it.
    if !existing.accepts_changes(Utc::now()) {
        return Err(Error::Status(
            Status::BadRequest,
            format!("Cannot modify election {election_id} once voting has started"),
        ));
    }

    // Replace with the new spec, which returns the election to draft.
    let mut core = spec.0.into_election(existing.created_by)?;
    core.demo = existing.demo;
    let election = Election::new(election_id, core);
    // Voting may have opened since the check above.
    let result = elections
        .replace_one(Election::changeable_filter(election_id, Utc::now()), &election, None)
        .await?;
    if result.matched_count == 0 {
        return Err(Error::Status(
            Status::BadRequest,
            format!("Cannot modify election {election_id} once voting has started"),
        ));
    }

    grant_group_members(&groups, &eligibility, &election).await?;
    Ok(Json(election.into()))
}

#[post("/elections/<election_id>/publish")]
async fn publish_election(
    _token: AuthToken<Admin>,
    election_id: ElectionId,
    elections: Coll<Election>,
) -> Result<()> {
    // Update the state.
    let filter = doc! {
        "_id": election_id,
        "state": ElectionState::Draft,
    };
    let update = doc! {
        "$set": {
            "state": ElectionState::Published,
        }
    };
    let result = elections.update_one(filter, update, None).await?;
    if result.modified_count != 1 {
        return Err(Error::Status(
            Status::BadRequest,
            format!("Election {election_id} doesn't exist or isn't a draft; cannot publish."),
        ));
    }
    info!("Published election {election_id}");
    Ok(())
}

#[post("/elections/<election_id>/archive")]
async fn archive_election(
    _token: AuthToken<Admin>,
    election_id: ElectionId,
    elections: Coll<Election>,
) -> Result<()> {
    // Update the state.
    let filter = doc! {
        "_id": election_id,
        "$or": [{"state": ElectionState::Draft}, {"state": ElectionState::Published}],
    };
    let update = doc! {
        "$set": {
            "state": ElectionState::Archived,
        }
    };
    let result = elections.update_one(filter, update, None).await?;
    if result.modified_count != 1 {
        return Err(Error::Status(
            Status::BadRequest,
            format!("Election {election_id} doesn't exist or is already archived."),
        ));
    }
    info!("Archived election {election_id}");
    Ok(())
}

#[delete("/elections/<election_id>")]
async fn delete_election(
    _token: AuthToken<Admin>,
    election_id: ElectionId,
    elections: Coll<Election>,
    eligibility: Coll<Eligibility>,
    invitations: Coll<Invitation>,
) -> Result<()> {
    // Only drafts can be deleted: they have no ballots, and a ledger is never removed.
    let filter = doc! {
        "_id": election_id,
        "state": ElectionState::Draft,
    };
    let result = elections.delete_one(filter, None).await?;
    if result.deleted_count == 0 {
        // Distinguish a missing election from one past the draft stage.
        election_by_id(&elections, election_id).await?;
        return Err(Error::Status(
            Status::BadRequest,
            format!("Cannot delete election {election_id}; only drafts can be deleted"),
        ));
    }

    let filter = doc! {
        "election_id": election_id,
    };
    eligibility.delete_many(filter.clone(), None).await?;
    invitations.delete_many(filter, None).await?;
    info!("Deleted draft election {election_id}");
    Ok(())
}

#[post("/elections/<election_id>/eligibility", data = "<voter_ids>", format = "json")]
async fn grant_election_eligibility(
    _token: AuthToken<Admin>,
    election_id: ElectionId,
    voter_ids: Json<Vec<ApiId>>,
    elections: Coll<Election>,
    voters: Coll<Voter>,
    eligibility: Coll<Eligibility>,
) -> Result<Json<u64>> {
    election_by_id(&elections, election_id).await?;

    // Only grant to voters that exist.
    let mut requested: Vec<Id> = voter_ids.0.into_iter().map(Into::into).collect();
    requested.sort_unstable();
    requested.dedup();
    let filter = doc! {
        "_id": { "$in": requested.clone() },
    };
    let existing: Vec<Id> = voters
        .find(filter, None)
        .await?
        .map_ok(|voter| voter.id)
        .try_collect()
        .await?;
    if existing.len() != requested.len() {
        return Err(Error::not_found("One or more voters"));
    }

    let granted = grant_eligibility(&eligibility, election_id, existing).await?;
    Ok(Json(granted))
}

#[get("/elections/<election_id>/invitations")]
async fn get_invitations(
    _token: AuthToken<Admin>,
    election_id: ElectionId,
    invitations: Coll<Invitation>,
) -> Result<Json<Vec<InvitationDescription>>> {
    let list = invitations
        .find(doc! { "election_id": election_id }, None)
        .await?
        .map_ok(InvitationDescription::from)
        .try_collect()
        .await?;
    Ok(Json(list))
}

#[post("/elections/<election_id>/invitations", data = "<spec>", format = "json")]
async fn create_invitation(
    _token: AuthToken<Admin>,
    election_id: ElectionId,
    spec: Json<InvitationSpec>,
    elections: Coll<Election>,
    new_invitations: Coll<NewInvitation>,
    invitations: Coll<Invitation>,
) -> Result<Json<InvitationDescription>> {
    let election = election_by_id(&elections, election_id).await?;
    let now = Utc::now();
    if election.state == ElectionState::Archived || election.closes_at <= now {
        return Err(Error::Status(
            Status::BadRequest,
            format!("Election {election_id} has closed; cannot invite voters"),
        ));
    }

    let InvitationSpec { email, expires_at } = spec.0;
    let email = email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty());
    let expires_at = expires_at.unwrap_or(election.closes_at);
    let invitation = NewInvitation::new(election_id, email, Some(expires_at), now);

    let id: Id = new_invitations
        .insert_one(&invitation, None)
        .await?
        .inserted_id
        .as_object_id()
        .ok_or_else(|| {
            Error::Status(
                Status::InternalServerError,
                "Invitation was stored without an object ID".to_string(),
            )
        })?
        .into();
    let stored = invitations
        .find_one(id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found("Invitation"))?;
    Ok(Json(stored.into()))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use mongodb::Database;
    use rocket::{local::asynchronous::Client, serde::json::serde_json};

    use crate::model::db::{election::ElectionCore, voter::NewVoter};

    use super::*;

    async fn create(client: &Client, spec: &ElectionSpec) -> ElectionDescription {
        let response = client.post(uri!(create_election)).json(spec).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        serde_json::from_str(&response.into_string().await.unwrap()).unwrap()
    }

    #[backend_test(admin)]
    async fn admins_can_be_added_but_not_all_removed(client: Client) {
        let response = client
            .post(uri!(create_admin))
            .json(&AdminCredentials::example2())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        // Duplicate usernames are refused.
        let response = client
            .post(uri!(create_admin))
            .json(&AdminCredentials::example2())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());

        let response = client.get(uri!(get_admins)).dispatch().await;
        let names: Vec<String> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(names.len(), 2);

        let response = client
            .delete(uri!(delete_admin))
            .json(&AdminCredentials::example2().username)
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let response = client
            .delete(uri!(delete_admin))
            .json(&AdminCredentials::example1().username)
            .dispatch()
            .await;
        assert_eq!(Status::UnprocessableEntity, response.status());
    }

    #[backend_test(admin)]
    async fn private_elections_get_an_open_invitation(client: Client, invitations: Coll<Invitation>) {
        let election = create(&client, &ElectionSpec::private_example()).await;
        assert_eq!(election.state, ElectionState::Draft);

        let stored: Vec<Invitation> = invitations
            .find(doc! { "election_id": election.id }, None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].is_personal());
        // Stored datetimes keep millisecond precision.
        assert_eq!(
            stored[0].expires_at().map(|at| at.timestamp_millis()),
            Some(election.closes_at.timestamp_millis())
        );

        let response = client
            .post(uri!(create_invitation(election.id)))
            .json(&InvitationSpec {
                email: Some("guest@example.com".to_string()),
                expires_at: None,
            })
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let response = client.get(uri!(get_invitations(election.id))).dispatch().await;
        let listed: Vec<InvitationDescription> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[backend_test(admin)]
    async fn lifecycle(client: Client, elections: Coll<Election>) {
        let election = create(&client, &ElectionSpec::future_example()).await;

        // Drafts can be modified.
        let mut spec = ElectionSpec::future_example();
        spec.title = "Amended Referendum".to_string();
        let response = client
            .put(uri!(modify_election(election.id)))
            .json(&spec)
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let response = client.post(uri!(publish_election(election.id))).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let response = client.post(uri!(publish_election(election.id))).dispatch().await;
        assert_eq!(Status::BadRequest, response.status());

        // Published elections cannot be deleted, only archived.
        let response = client.delete(uri!(delete_election(election.id))).dispatch().await;
        assert_eq!(Status::BadRequest, response.status());
        let response = client.post(uri!(archive_election(election.id))).dispatch().await;
        assert_eq!(Status::Ok, response.status());

        let stored = election_by_id(&elections, election.id).await.unwrap();
        assert_eq!(stored.title, "Amended Referendum");
        assert_eq!(stored.state, ElectionState::Archived);
    }

    #[backend_test(admin)]
    async fn open_elections_cannot_be_modified(client: Client, db: Database) {
        let counters = Coll::<Counter>::from_db(&db);
        let id = Counter::next(&counters, ELECTION_ID_COUNTER_ID).await.unwrap();
        let mut core: ElectionCore = ElectionSpec::current_example().into_election(Id::new()).unwrap();
        core.state = ElectionState::Published;
        Coll::<Election>::from_db(&db)
            .insert_one(Election::new(id, core), None)
            .await
            .unwrap();

        let mut spec = ElectionSpec::current_example();
        spec.closes_at = spec.closes_at + Duration::days(1);
        let response = client.put(uri!(modify_election(id))).json(&spec).dispatch().await;
        assert_eq!(Status::BadRequest, response.status());
    }

    #[backend_test(admin)]
    async fn eligibility_only_for_existing_voters(
        client: Client,
        voters: Coll<NewVoter>,
        eligibility: Coll<Eligibility>,
    ) {
        let election = create(&client, &ElectionSpec::private_example()).await;
        let voter_id: Id = voters
            .insert_one(Voter::example().voter, None)
            .await
            .unwrap()
            .inserted_id
            .as_object_id()
            .unwrap()
            .into();

        let response = client
            .post(uri!(grant_election_eligibility(election.id)))
            .json(&vec![ApiId::from(voter_id), ApiId::from(Id::new())])
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());

        // Repeating a voter in one request grants once.
        let response = client
            .post(uri!(grant_election_eligibility(election.id)))
            .json(&vec![ApiId::from(voter_id), ApiId::from(voter_id)])
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(response.into_string().await.unwrap(), "1");
        let granted = eligibility
            .count_documents(doc! { "election_id": election.id }, None)
            .await
            .unwrap();
        assert_eq!(granted, 1);
    }

    #[backend_test(voter)]
    async fn voters_cannot_manage_elections(client: Client) {
        let response = client
            .post(uri!(create_election))
            .json(&ElectionSpec::current_example())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }
}
