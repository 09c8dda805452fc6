use std::ops::Deref;

use mongodb::{
    bson::{doc, Document},
    error::Error as DbError,
    options::IndexOptions,
    Collection, Database, IndexModel,
};
use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::model::db::{
    admin::{Admin, NewAdmin},
    election::Election,
    eligibility::Eligibility,
    group::{NewVoterGroup, VoterGroup},
    invitation::{Invitation, NewInvitation},
    participation::ParticipationMarker,
    vote::VoteRecord,
    voter::{NewVoter, Voter},
};

use super::counter::Counter;

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database connection from the managed state and wrap it in a collection.
    ///
    /// Panics iff the [`Database`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let db = req.guard::<&State<Database>>().await.unwrap();
        request::Outcome::Success(Coll::from_db(db))
    }
}

macro_rules! collection {
    ($name:literal: $($ty:ty),+) => {
        $(
            impl MongoCollection for $ty {
                const NAME: &'static str = $name;
            }
        )+
    };
}

collection!("admins": Admin, NewAdmin);
collection!("voters": Voter, NewVoter);
collection!("elections": Election);
collection!("votes": VoteRecord);
collection!("participation": ParticipationMarker);
collection!("eligibility": Eligibility);
collection!("groups": VoterGroup, NewVoterGroup);
collection!("invitations": Invitation, NewInvitation);
collection!("counters": Counter);

/// Build an index over the given keys.
fn index(keys: Document, unique: bool) -> IndexModel {
    let options = IndexOptions::builder().unique(unique).build();
    IndexModel::builder().keys(keys).options(options).build()
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    Coll::<Voter>::from_db(db)
        .create_index(index(doc! {"username": 1}, true), None)
        .await?;

    Coll::<Admin>::from_db(db)
        .create_index(index(doc! {"username": 1}, true), None)
        .await?;

    let participation = Coll::<ParticipationMarker>::from_db(db);
    participation
        .create_index(index(doc! {"_id.election_id": 1}, false), None)
        .await?;
    participation
        .create_index(index(doc! {"_id.voter_id": 1}, false), None)
        .await?;

    let eligibility = Coll::<Eligibility>::from_db(db);
    eligibility
        .create_index(index(doc! {"voter_id": 1, "election_id": 1}, true), None)
        .await?;
    eligibility
        .create_index(index(doc! {"election_id": 1}, false), None)
        .await?;

    let votes = Coll::<VoteRecord>::from_db(db);
    votes
        .create_index(index(doc! {"election_id": 1, "cast_at": 1}, false), None)
        .await?;
    votes
        .create_index(index(doc! {"election_id": 1, "candidate": 1}, false), None)
        .await?;

    Coll::<VoterGroup>::from_db(db)
        .create_index(index(doc! {"name": 1}, true), None)
        .await?;

    Coll::<Invitation>::from_db(db)
        .create_index(index(doc! {"code": 1}, true), None)
        .await?;

    Ok(())
}
