use std::time::{Duration, Instant};

use mongodb::{
    bson::doc,
    error::{Error as DbError, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    options::{FindOptions, SessionOptions},
    Client, ClientSession, Database,
};
use rand::Rng;
use rocket::{
    futures::TryStreamExt,
    request::{self, FromRequest, Request},
    tokio::time::sleep,
    State,
};

use crate::error::{Error, Result};
use crate::model::{
    api::{receipt::PublicReceipt, results::LedgerDump},
    common::{election::ElectionId, tally::Tally},
    db::{
        election::Election,
        eligibility::Eligibility,
        participation::ParticipationMarker,
        vote::{NewVoteRecord, VoteRecord},
        voter::Voter,
    },
    mongodb::{
        is_duplicate_key_error, is_transient_transaction_error, u32_id_filter, Coll, Id,
    },
};

use super::{BallotBox, CastError};

/// How long a cast keeps retrying after write conflicts with concurrent casts.
const TRANSACTION_RETRY_LIMIT: Duration = Duration::from_secs(10);
const INITIAL_BACKOFF_MS: u64 = 5;
const MAX_BACKOFF_MS: u64 = 500;
/// How many times a commit with an unknown outcome is retried.
const MAX_COMMIT_ATTEMPTS: usize = 5;

/// Exponential backoff with jitter, bounded by a deadline.
struct Backoff {
    next_ms: u64,
    deadline: Instant,
}

impl Backoff {
    fn new(limit: Duration) -> Self {
        Self {
            next_ms: INITIAL_BACKOFF_MS,
            deadline: Instant::now() + limit,
        }
    }

    /// The pause before the next attempt, or `None` once the deadline has passed.
    fn next_delay(&mut self) -> Option<Duration> {
        if Instant::now() >= self.deadline {
            return None;
        }
        let base = self.next_ms;
        self.next_ms = (self.next_ms * 2).min(MAX_BACKOFF_MS);
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        Some(Duration::from_millis(base + jitter))
    }
}

/// A [`BallotBox`] backed by MongoDB, committing each ballot in a transaction.
pub struct MongoBallotBox {
    client: Client,
    db: Database,
}

impl MongoBallotBox {
    pub fn new(client: Client, db: Database) -> Self {
        Self { client, db }
    }

    /// Insert the marker and the votes within the session's open transaction.
    async fn insert_ballot(
        &self,
        marker: &ParticipationMarker,
        votes: &[NewVoteRecord],
        session: &mut ClientSession,
    ) -> Result<()> {
        Coll::<ParticipationMarker>::from_db(&self.db)
            .insert_one_with_session(marker, None, session)
            .await
            .map_err(|err| {
                if is_duplicate_key_error(&err) {
                    Error::Cast(CastError::AlreadyVoted)
                } else {
                    Error::Db(err)
                }
            })?;
        let votes = votes.iter().cloned().map(VoteRecord::from);
        Coll::<VoteRecord>::from_db(&self.db)
            .insert_many_with_session(votes, None, session)
            .await?;
        Ok(())
    }

    /// Run one attempt at the ballot transaction, aborting it on failure.
    async fn try_commit(
        &self,
        marker: &ParticipationMarker,
        votes: &[NewVoteRecord],
        session: &mut ClientSession,
    ) -> Result<()> {
        session.start_transaction(None).await?;
        if let Err(err) = self.insert_ballot(marker, votes, session).await {
            if let Err(abort_err) = session.abort_transaction().await {
                debug!("Failed to abort ballot transaction: {abort_err}");
            }
            return Err(err);
        }
        Self::commit_transaction(session).await?;
        Ok(())
    }

    /// Commit the session's transaction, retrying only if the outcome is unknown.
    async fn commit_transaction(session: &mut ClientSession) -> std::result::Result<(), DbError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match session.commit_transaction().await {
                Err(err)
                    if err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                        && attempts < MAX_COMMIT_ATTEMPTS =>
                {
                    warn!("Retrying ballot commit with unknown result: {err}");
                }
                result => return result,
            }
        }
    }

    /// Read a consistent snapshot of an election's full ledger.
    pub async fn ledger_dump(&self, election: &Election) -> Result<LedgerDump> {
        let options = SessionOptions::builder().snapshot(true).build();
        let mut session = self.client.start_session(Some(options)).await?;

        let filter = doc! { "election_id": election.id };
        let sort = FindOptions::builder()
            .sort(doc! { "cast_at": 1, "_id": 1 })
            .build();
        let mut cursor = Coll::<VoteRecord>::from_db(&self.db)
            .find_with_session(filter, sort, &mut session)
            .await?;
        let mut votes = Vec::new();
        while let Some(vote) = cursor.next(&mut session).await {
            votes.push(PublicReceipt::from(vote?));
        }
        let ballots_cast = Coll::<ParticipationMarker>::from_db(&self.db)
            .count_documents_with_session(
                ParticipationMarker::election_filter(election.id),
                None,
                &mut session,
            )
            .await?;

        let tally = Tally::count(
            &election.candidates,
            votes.iter().map(|vote| (vote.candidate.as_str(), None)),
        );
        Ok(LedgerDump {
            election_id: election.id,
            title: election.title.clone(),
            candidates: election.candidates.clone(),
            max_choices: election.max_choices,
            ballots_cast,
            votes,
            tally,
        })
    }
}

#[rocket::async_trait]
impl BallotBox for MongoBallotBox {
    async fn election(&self, election_id: ElectionId) -> Result<Option<Election>> {
        Ok(Coll::<Election>::from_db(&self.db)
            .find_one(u32_id_filter(election_id), None)
            .await?)
    }

    async fn has_eligibility(&self, voter_id: Id, election_id: ElectionId) -> Result<bool> {
        let filter = doc! {
            "voter_id": voter_id,
            "election_id": election_id,
        };
        Ok(Coll::<Eligibility>::from_db(&self.db)
            .find_one(filter, None)
            .await?
            .is_some())
    }

    async fn has_voted(&self, voter_id: Id, election_id: ElectionId) -> Result<bool> {
        let filter = ParticipationMarker::new(voter_id, election_id).filter();
        Ok(Coll::<ParticipationMarker>::from_db(&self.db)
            .find_one(filter, None)
            .await?
            .is_some())
    }

    async fn commit(&self, marker: ParticipationMarker, votes: Vec<NewVoteRecord>) -> Result<()> {
        let mut session = self.client.start_session(None).await?;
        let mut backoff = Backoff::new(TRANSACTION_RETRY_LIMIT);
        loop {
            let err = match self.try_commit(&marker, &votes, &mut session).await {
                Ok(()) => return Ok(()),
                Err(Error::Db(err)) if is_transient_transaction_error(&err) => err,
                Err(err) => return Err(err),
            };
            match backoff.next_delay() {
                Some(delay) => {
                    debug!("Retrying ballot transaction in {delay:?} after: {err}");
                    sleep(delay).await;
                }
                None => {
                    // A concurrent cast by the same voter that kept winning the
                    // conflict has most likely committed by now.
                    if self.has_voted(marker.voter_id, marker.election_id).await? {
                        return Err(CastError::AlreadyVoted.into());
                    }
                    warn!("Giving up on ballot transaction: {err}");
                    return Err(Error::Db(err));
                }
            }
        }
    }

    async fn votes(&self, election_id: ElectionId) -> Result<Vec<VoteRecord>> {
        let options = FindOptions::builder()
            .sort(doc! { "cast_at": 1, "_id": 1 })
            .build();
        let votes = Coll::<VoteRecord>::from_db(&self.db)
            .find(doc! { "election_id": election_id }, options)
            .await?
            .try_collect()
            .await?;
        Ok(votes)
    }

    async fn ballots_cast(&self, election_id: ElectionId) -> Result<u64> {
        Ok(Coll::<ParticipationMarker>::from_db(&self.db)
            .count_documents(ParticipationMarker::election_filter(election_id), None)
            .await?)
    }

    async fn eligible_voters(&self, election: &Election) -> Result<u64> {
        let count = if election.is_public() {
            Coll::<Voter>::from_db(&self.db)
                .count_documents(None, None)
                .await?
        } else {
            Coll::<Eligibility>::from_db(&self.db)
                .count_documents(doc! { "election_id": election.id }, None)
                .await?
        };
        Ok(count)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for MongoBallotBox {
    type Error = ();

    /// Build a ballot box over the managed client and database.
    ///
    /// Panics iff the [`Client`] or [`Database`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let client = req.guard::<&State<Client>>().await.unwrap();
        let db = req.guard::<&State<Database>>().await.unwrap();
        request::Outcome::Success(Self::new(client.inner().clone(), db.inner().clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use mongodb::Database;
    use rocket::tokio;

    use super::*;
    use crate::ballot_box::cast_ballot;
    use crate::model::{
        api::ballot::BallotSpec,
        mongodb::{Counter, ELECTION_ID_COUNTER_ID},
    };
    use crate::Config;

    async fn open_election(db: &Database) -> Election {
        let counters = Coll::<Counter>::from_db(db);
        let id = Counter::next(&counters, ELECTION_ID_COUNTER_ID).await.unwrap();
        let mut election = Election::example();
        election.id = id;
        election.opens_at = Utc::now() - chrono::Duration::hours(1);
        election.closes_at = Utc::now() + chrono::Duration::hours(1);
        Coll::<Election>::from_db(db)
            .insert_one(&election, None)
            .await
            .unwrap();
        election
    }

    #[test]
    fn backoff_grows_to_a_cap_then_stops_at_the_deadline() {
        let mut backoff = Backoff::new(Duration::from_secs(60));
        let first = backoff.next_delay().unwrap();
        assert!(first >= Duration::from_millis(INITIAL_BACKOFF_MS));
        assert!(first <= Duration::from_millis(INITIAL_BACKOFF_MS * 3 / 2));

        let delays: Vec<Duration> = (0..20).map(|_| backoff.next_delay().unwrap()).collect();
        let cap = Duration::from_millis(MAX_BACKOFF_MS * 3 / 2);
        assert!(delays.iter().all(|delay| *delay <= cap));
        assert!(*delays.last().unwrap() >= Duration::from_millis(MAX_BACKOFF_MS));

        let mut expired = Backoff::new(Duration::ZERO);
        assert_eq!(expired.next_delay(), None);
    }

    #[backend_test]
    async fn racing_casts_commit_once(db: Database) {
        let client = crate::db_client().await;
        let election = open_election(&db).await;
        let ballot_box = Arc::new(MongoBallotBox::new(client, db.clone()));
        let voter = Arc::new(Voter::example());
        let config = Arc::new(Config::example());
        let election_id = election.id;

        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let ballot_box = ballot_box.clone();
                let voter = voter.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    let ballot = BallotSpec::single("X");
                    cast_ballot(&*ballot_box, &voter, election_id, ballot, Utc::now(), &config).await
                })
            })
            .collect();

        let mut successes = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => successes += 1,
                Err(Error::Cast(CastError::AlreadyVoted)) => {}
                Err(err) => panic!("unexpected error: {err:?}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(ballot_box.ballots_cast(election.id).await.unwrap(), 1);
        assert_eq!(ballot_box.votes(election.id).await.unwrap().len(), 1);
    }

    #[backend_test]
    async fn dump_matches_ledger(db: Database) {
        let client = crate::db_client().await;
        let election = open_election(&db).await;
        let ballot_box = MongoBallotBox::new(client, db.clone());
        let config = Config::example();

        let mut receipts = Vec::new();
        for choice in ["X", "Y", "X"] {
            let mut voter = Voter::example();
            voter.id = Id::new();
            let ballot = BallotSpec::single(choice);
            receipts.extend(
                cast_ballot(&ballot_box, &voter, election.id, ballot, Utc::now(), &config)
                    .await
                    .unwrap(),
            );
        }

        let dump = ballot_box.ledger_dump(&election).await.unwrap();
        dump.verify().unwrap();
        assert_eq!(dump.ballots_cast, 3);
        assert_eq!(dump.tally.candidates[0].candidate, "X");
        for receipt in &receipts {
            dump.verify_receipt(receipt).unwrap();
        }
    }
}
