use chrono::Utc;
use mongodb::bson::doc;
use rocket::{
    http::{Cookie, CookieJar, Status},
    serde::json::Json,
    Route, State,
};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            admin::AdminCredentials,
            auth::{AuthToken, AUTH_TOKEN_COOKIE},
            voter::{VoterCredentials, VoterProfile, VoterRegistration},
        },
        db::{
            admin::Admin,
            eligibility::Eligibility,
            invitation::Invitation,
            voter::{NewVoter, Voter},
        },
        mongodb::{is_duplicate_key_error, Coll, Id},
    },
    Config,
};

use super::common::redeem_invitation;

pub fn routes() -> Vec<Route> {
    routes![authenticate, register, login, logout]
}

#[post("/auth/admin", data = "<credentials>", format = "json")]
pub async fn authenticate(
    cookies: &CookieJar<'_>,
    credentials: Json<AdminCredentials>,
    admins: Coll<Admin>,
    config: &State<Config>,
) -> Result<()> {
    let with_username = doc! {
        "username": &credentials.username
    };

    let admin = admins
        .find_one(with_username, None)
        .await?
        .filter(|admin| admin.verify_password(&credentials.password))
        .ok_or_else(|| {
            Error::Status(
                Status::Unauthorized,
                "No admin found with the provided username and password combination.".to_string(),
            )
        })?;

    let token = AuthToken::new(&admin);
    cookies.add(token.into_cookie(config)?);

    Ok(())
}

#[post("/auth/voter/register", data = "<registration>", format = "json")]
pub async fn register(
    cookies: &CookieJar<'_>,
    registration: Json<VoterRegistration>,
    new_voters: Coll<NewVoter>,
    voters: Coll<Voter>,
    invitations: Coll<Invitation>,
    eligibility: Coll<Eligibility>,
    config: &State<Config>,
) -> Result<Json<VoterProfile>> {
    let invitation = registration.invitation.clone();
    let new_voter = NewVoter::try_from(registration.0)?;

    let inserted = match new_voters.insert_one(&new_voter, None).await {
        Ok(inserted) => inserted,
        Err(err) if is_duplicate_key_error(&err) => {
            return Err(Error::Status(
                Status::Conflict,
                format!("Username already in use: {}", new_voter.username),
            ));
        }
        Err(err) => return Err(err.into()),
    };
    let voter_id: Id = inserted
        .inserted_id
        .as_object_id()
        .ok_or_else(|| {
            Error::Status(
                Status::InternalServerError,
                "Voter was stored without an object ID".to_string(),
            )
        })?
        .into();
    let voter = voters
        .find_one(voter_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Voter with ID '{voter_id}'")))?;
    info!("Registered voter {voter_id}");

    // Sign in first, so a bad invitation code does not cost the new account its session.
    cookies.add(AuthToken::new(&voter).into_cookie(config)?);

    if let Some(code) = invitation {
        redeem_invitation(&invitations, &eligibility, &code, voter_id, Utc::now()).await?;
    }

    Ok(Json(VoterProfile::new(voter, Vec::new())))
}

#[post("/auth/voter", data = "<credentials>", format = "json")]
pub async fn login(
    cookies: &CookieJar<'_>,
    credentials: Json<VoterCredentials>,
    voters: Coll<Voter>,
    config: &State<Config>,
) -> Result<()> {
    let with_username = doc! {
        "username": credentials.username.trim(),
    };

    let voter = voters
        .find_one(with_username, None)
        .await?
        .filter(|voter| voter.verify_password(&credentials.password))
        .ok_or_else(|| {
            Error::Status(
                Status::Unauthorized,
                "No voter found with the provided username and password combination.".to_string(),
            )
        })?;

    cookies.add(AuthToken::new(&voter).into_cookie(config)?);
    Ok(())
}

#[delete("/auth")]
pub fn logout(cookies: &CookieJar) -> Status {
    cookies.remove(Cookie::named(AUTH_TOKEN_COOKIE));
    Status::Ok
}
