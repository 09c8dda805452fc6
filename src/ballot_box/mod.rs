//! Casting ballots and counting them.
//!
//! Everything here goes through a [`BallotBox`], so the same rules apply to
//! the HTTP API, the operator tool's demo seeding, and the tests.

use std::collections::HashSet;

use chrono::{DateTime, DurationRound, Utc};
use rand::Rng;
use rocket::http::Status;
use thiserror::Error;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    api::{
        ballot::{BallotSpec, BallotStatus},
        receipt::Receipt,
        results::ElectionResults,
    },
    common::{
        election::{ElectionId, ElectionState, Phase},
        receipt::{encode_salt, ReceiptHash, Salt, SALT_LENGTH},
        tally::Tally,
    },
    db::{
        election::Election,
        participation::ParticipationMarker,
        vote::{NewVoteRecord, VoteRecord},
        voter::Voter,
    },
    mongodb::Id,
};

#[cfg(test)]
mod memory;
mod mongo;

#[cfg(test)]
pub use memory::MemoryBallotBox;
pub use mongo::MongoBallotBox;

/// Why a ballot was refused. None of these leave anything behind in storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CastError {
    #[error("You have already voted in this election")]
    AlreadyVoted,
    #[error("This election is not open for voting yet")]
    ElectionNotYetOpen,
    #[error("This election is closed")]
    ElectionClosed,
    #[error("You are not eligible to vote in this election")]
    NotEligible,
    #[error("Incorrect election password")]
    WrongPassword,
    #[error("Invalid ballot: {0}")]
    InvalidBallot(String),
}

impl CastError {
    pub fn status(&self) -> Status {
        match self {
            Self::AlreadyVoted => Status::Conflict,
            Self::ElectionNotYetOpen | Self::ElectionClosed | Self::NotEligible => {
                Status::Forbidden
            }
            Self::WrongPassword => Status::Unauthorized,
            Self::InvalidBallot(_) => Status::BadRequest,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyVoted => "already_voted",
            Self::ElectionNotYetOpen => "not_yet_open",
            Self::ElectionClosed => "closed",
            Self::NotEligible => "not_eligible",
            Self::WrongPassword => "wrong_password",
            Self::InvalidBallot(_) => "invalid_ballot",
        }
    }
}

/// Storage for elections' ledgers and the record of who has voted where.
#[rocket::async_trait]
pub trait BallotBox: Send + Sync {
    /// Look up an election by ID.
    async fn election(&self, election_id: ElectionId) -> Result<Option<Election>>;

    /// Whether the voter holds an eligibility record for the election.
    async fn has_eligibility(&self, voter_id: Id, election_id: ElectionId) -> Result<bool>;

    /// Whether the voter has already cast a ballot in the election.
    async fn has_voted(&self, voter_id: Id, election_id: ElectionId) -> Result<bool>;

    /// Atomically record the marker together with the ballot's votes.
    ///
    /// Fails with [`CastError::AlreadyVoted`], writing nothing, if a marker
    /// for the same voter and election already exists, however many commits
    /// race.
    async fn commit(&self, marker: ParticipationMarker, votes: Vec<NewVoteRecord>) -> Result<()>;

    /// Every vote recorded in the election, in ledger order.
    async fn votes(&self, election_id: ElectionId) -> Result<Vec<VoteRecord>>;

    /// Number of voters who have cast a ballot in the election.
    async fn ballots_cast(&self, election_id: ElectionId) -> Result<u64>;

    /// Number of voters entitled to vote in the election.
    async fn eligible_voters(&self, election: &Election) -> Result<u64>;
}

/// Find an election voters are allowed to see. Drafts do not exist as far as they know.
async fn visible_election<B>(ballot_box: &B, election_id: ElectionId) -> Result<Election>
where
    B: BallotBox + ?Sized,
{
    ballot_box
        .election(election_id)
        .await?
        .filter(|election| election.state != ElectionState::Draft)
        .ok_or_else(|| Error::not_found(format!("Election with ID '{election_id}'")))
}

async fn is_eligible<B>(ballot_box: &B, voter: &Voter, election: &Election) -> Result<bool>
where
    B: BallotBox + ?Sized,
{
    Ok(election.is_public() || ballot_box.has_eligibility(voter.id, election.id).await?)
}

/// Check a ballot's choices against the election.
fn check_choices(election: &Election, choices: &[String]) -> std::result::Result<(), CastError> {
    if choices.is_empty() {
        return Err(CastError::InvalidBallot(
            "at least one choice is required".to_string(),
        ));
    }
    if choices.len() > usize::from(election.max_choices) {
        return Err(CastError::InvalidBallot(format!(
            "at most {} choices are allowed",
            election.max_choices
        )));
    }
    let mut seen = HashSet::new();
    for choice in choices {
        if !election.has_candidate(choice) {
            return Err(CastError::InvalidBallot(format!("unknown candidate {choice:?}")));
        }
        if !seen.insert(choice) {
            return Err(CastError::InvalidBallot(format!("{choice:?} chosen twice")));
        }
    }
    Ok(())
}

/// Cast a voter's ballot, returning one receipt per choice.
///
/// Checks run in order: the election is published, `now` is inside the
/// voting window, the voter is eligible, the election password matches, and
/// the choices are well-formed. Only then is the ballot committed, at most
/// once per voter and election.
pub async fn cast_ballot<B>(
    ballot_box: &B,
    voter: &Voter,
    election_id: ElectionId,
    ballot: BallotSpec,
    now: DateTime<Utc>,
    config: &Config,
) -> Result<Vec<Receipt>>
where
    B: BallotBox + ?Sized,
{
    let election = visible_election(ballot_box, election_id).await?;
    if election.state == ElectionState::Archived {
        return Err(CastError::ElectionClosed.into());
    }
    match election.phase(now) {
        Phase::NotYetOpen => return Err(CastError::ElectionNotYetOpen.into()),
        Phase::Closed => return Err(CastError::ElectionClosed.into()),
        Phase::Open => {}
    }
    if !is_eligible(ballot_box, voter, &election).await? {
        return Err(CastError::NotEligible.into());
    }
    if !election.admits_password(ballot.password.as_deref()) {
        return Err(CastError::WrongPassword.into());
    }
    check_choices(&election, &ballot.choices)?;

    // The receipt hash covers whole milliseconds, as does the stored timestamp.
    let cast_at = now
        .duration_trunc(chrono::Duration::milliseconds(1))
        .map_err(|e| Error::Status(Status::InternalServerError, e.to_string()))?;

    // `ThreadRng` is not `Send`, so it must be dropped before the next await.
    let salts: Vec<Salt> = {
        let mut rng = rand::thread_rng();
        ballot
            .choices
            .iter()
            .map(|_| {
                let mut salt = [0_u8; SALT_LENGTH];
                rng.fill(&mut salt);
                salt
            })
            .collect()
    };

    let mut votes = Vec::with_capacity(ballot.choices.len());
    let mut receipts = Vec::with_capacity(ballot.choices.len());
    for (candidate, salt) in ballot.choices.into_iter().zip(salts) {
        let receipt_hash = ReceiptHash::compute(election.id, &candidate, cast_at, &salt);
        votes.push(NewVoteRecord {
            election_id: election.id,
            candidate: candidate.clone(),
            cast_at,
            receipt_hash,
            demographic: Some(voter.demographic.clone()),
        });
        receipts.push(Receipt {
            election_id: election.id,
            candidate,
            cast_at,
            salt: encode_salt(&salt),
            receipt_hash,
            signature: receipt_hash.sign(config.hmac_secret()),
        });
    }

    ballot_box
        .commit(ParticipationMarker::new(voter.id, election.id), votes)
        .await?;
    info!(
        "Ballot cast in election {} with {} choice(s)",
        election.id,
        receipts.len()
    );
    Ok(receipts)
}

/// Report whether the voter may still vote in the election.
pub async fn ballot_status<B>(
    ballot_box: &B,
    voter: &Voter,
    election_id: ElectionId,
    now: DateTime<Utc>,
) -> Result<BallotStatus>
where
    B: BallotBox + ?Sized,
{
    let election = visible_election(ballot_box, election_id).await?;
    let eligible = is_eligible(ballot_box, voter, &election).await?;
    if !eligible && !election.is_public() {
        // Private elections stay hidden from voters who cannot take part.
        return Err(Error::not_found(format!("Election with ID '{election_id}'")));
    }
    Ok(BallotStatus {
        election_id,
        phase: election.phase(now),
        eligible,
        has_voted: ballot_box.has_voted(voter.id, election_id).await?,
    })
}

/// Aggregate an election's ledger into its results.
pub async fn compute_results<B>(
    ballot_box: &B,
    election: &Election,
    now: DateTime<Utc>,
) -> Result<ElectionResults>
where
    B: BallotBox + ?Sized,
{
    if election.state == ElectionState::Draft {
        return Err(Error::Status(
            Status::BadRequest,
            format!("Election {} has not been published", election.id),
        ));
    }
    let votes = ballot_box.votes(election.id).await?;
    let tally = Tally::count(
        &election.candidates,
        votes
            .iter()
            .map(|vote| (vote.candidate.as_str(), vote.demographic.as_ref())),
    );
    let ballots_cast = ballot_box.ballots_cast(election.id).await?;
    let eligible_voters = ballot_box.eligible_voters(election).await?;
    Ok(ElectionResults::new(
        election,
        tally,
        ballots_cast,
        eligible_voters,
        now,
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use rocket::tokio;

    use super::*;
    use crate::model::common::{election::Visibility, password::hash_password};

    fn setup() -> (MemoryBallotBox, Election, Voter) {
        let ballot_box = MemoryBallotBox::new(3);
        let election = Election::example();
        ballot_box.add_election(election.clone());
        (ballot_box, election, Voter::example())
    }

    fn cast_error(result: Result<Vec<Receipt>>) -> CastError {
        match result {
            Err(Error::Cast(err)) => err,
            other => panic!("expected a cast error, got {other:?}"),
        }
    }

    #[rocket::async_test]
    async fn second_ballot_is_refused() {
        let (ballot_box, election, voter) = setup();
        let config = Config::example();
        let ten = Election::example_now();

        let ballot = BallotSpec::single("X");
        let receipts = cast_ballot(&ballot_box, &voter, election.id, ballot, ten, &config)
            .await
            .unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].candidate, "X");
        assert!(ballot_box.has_voted(voter.id, election.id).await.unwrap());

        let five_past = ten + Duration::minutes(5);
        let ballot = BallotSpec::single("Y");
        let err = cast_error(
            cast_ballot(&ballot_box, &voter, election.id, ballot, five_past, &config).await,
        );
        assert_eq!(err, CastError::AlreadyVoted);
        assert_eq!(ballot_box.votes(election.id).await.unwrap().len(), 1);
        assert_eq!(ballot_box.ballots_cast(election.id).await.unwrap(), 1);
    }

    #[rocket::async_test]
    async fn window_is_enforced() {
        let (ballot_box, election, voter) = setup();
        let config = Config::example();

        let attempt = |at| {
            cast_ballot(&ballot_box, &voter, election.id, BallotSpec::single("X"), at, &config)
        };

        let err = cast_error(attempt(election.opens_at - Duration::milliseconds(1)).await);
        assert_eq!(err, CastError::ElectionNotYetOpen);
        let err = cast_error(attempt(election.closes_at).await);
        assert_eq!(err, CastError::ElectionClosed);

        assert!(ballot_box.votes(election.id).await.unwrap().is_empty());
        assert!(!ballot_box.has_voted(voter.id, election.id).await.unwrap());
    }

    #[rocket::async_test]
    async fn unpublished_elections_refuse_ballots() {
        let (ballot_box, mut election, voter) = setup();
        let config = Config::example();
        let now = Election::example_now();

        election.id = 2;
        election.state = ElectionState::Draft;
        ballot_box.add_election(election.clone());
        let result = cast_ballot(&ballot_box, &voter, 2, BallotSpec::single("X"), now, &config).await;
        assert!(matches!(result, Err(ref e) if e.status() == Status::NotFound));

        election.id = 3;
        election.state = ElectionState::Archived;
        ballot_box.add_election(election);
        let result = cast_ballot(&ballot_box, &voter, 3, BallotSpec::single("X"), now, &config).await;
        let err = cast_error(result);
        assert_eq!(err, CastError::ElectionClosed);
    }

    #[rocket::async_test]
    async fn private_elections_need_eligibility() {
        let (ballot_box, mut election, voter) = setup();
        let config = Config::example();
        let now = Election::example_now();

        election.id = 2;
        election.visibility = Visibility::Private;
        ballot_box.add_election(election.clone());

        let result = cast_ballot(&ballot_box, &voter, 2, BallotSpec::single("X"), now, &config).await;
        assert_eq!(cast_error(result), CastError::NotEligible);
        assert!(ballot_status(&ballot_box, &voter, 2, now).await.is_err());

        ballot_box.grant(voter.id, 2);
        let status = ballot_status(&ballot_box, &voter, 2, now).await.unwrap();
        assert!(status.eligible && !status.has_voted);
        cast_ballot(&ballot_box, &voter, 2, BallotSpec::single("X"), now, &config)
            .await
            .unwrap();
        let status = ballot_status(&ballot_box, &voter, 2, now).await.unwrap();
        assert!(status.has_voted);
        assert_eq!(status.phase, Phase::Open);
    }

    #[rocket::async_test]
    async fn malformed_ballots_are_refused() {
        let (ballot_box, mut election, voter) = setup();
        let config = Config::example();
        let now = Election::example_now();

        election.id = 2;
        election.max_choices = 2;
        election.password_hash = Some(hash_password("letmein").unwrap());
        ballot_box.add_election(election);

        let ballot = |choices: &[&str], password: Option<&str>| BallotSpec {
            choices: choices.iter().map(|c| c.to_string()).collect(),
            password: password.map(str::to_string),
        };
        let attempt = |spec: BallotSpec| cast_ballot(&ballot_box, &voter, 2, spec, now, &config);

        let err = cast_error(attempt(ballot(&["X"], None)).await);
        assert_eq!(err, CastError::WrongPassword);
        let err = cast_error(attempt(ballot(&["X"], Some("guess"))).await);
        assert_eq!(err, CastError::WrongPassword);
        let err = cast_error(attempt(ballot(&[], Some("letmein"))).await);
        assert!(matches!(err, CastError::InvalidBallot(_)));
        let err = cast_error(attempt(ballot(&["X", "Y", "Z"], Some("letmein"))).await);
        assert!(matches!(err, CastError::InvalidBallot(_)));
        let err = cast_error(attempt(ballot(&["X", "X"], Some("letmein"))).await);
        assert!(matches!(err, CastError::InvalidBallot(_)));
        let err = cast_error(attempt(ballot(&["W"], Some("letmein"))).await);
        assert!(matches!(err, CastError::InvalidBallot(_)));
        assert!(ballot_box.votes(2).await.unwrap().is_empty());

        let receipts = attempt(ballot(&["X", "Z"], Some("letmein"))).await.unwrap();
        assert_eq!(receipts.len(), 2);
        assert_eq!(ballot_box.votes(2).await.unwrap().len(), 2);
        assert_eq!(ballot_box.ballots_cast(2).await.unwrap(), 1);
    }

    #[rocket::async_test]
    async fn receipts_match_the_ledger() {
        let (ballot_box, election, voter) = setup();
        let config = Config::example();
        let now = Election::example_now() + Duration::nanoseconds(123_456_789);

        let ballot = BallotSpec::single("Z");
        let receipts = cast_ballot(&ballot_box, &voter, election.id, ballot, now, &config)
            .await
            .unwrap();
        let receipt = &receipts[0];
        assert!(receipt.is_consistent());
        assert!(receipt
            .receipt_hash
            .verify_signature(config.hmac_secret(), &receipt.signature));
        assert_eq!(receipt.cast_at.timestamp_subsec_millis(), 123);

        let ledger = ballot_box.votes(election.id).await.unwrap();
        assert_eq!(ledger[0].receipt_hash, receipt.receipt_hash);
        assert_eq!(ledger[0].cast_at, receipt.cast_at);
        assert_eq!(ledger[0].demographic.as_ref(), Some(&voter.demographic));
    }

    #[rocket::async_test]
    async fn concurrent_casts_record_one_ballot() {
        let (ballot_box, election, voter) = setup();
        let ballot_box = Arc::new(ballot_box);
        let voter = Arc::new(voter);
        let config = Arc::new(Config::example());
        let now = Election::example_now();

        let attempts: Vec<_> = (0..32)
            .map(|i| {
                let ballot_box = ballot_box.clone();
                let voter = voter.clone();
                let config = config.clone();
                let ballot = BallotSpec::single(if i % 2 == 0 { "X" } else { "Y" });
                tokio::spawn(async move {
                    cast_ballot(&*ballot_box, &voter, 1, ballot, now, &config).await
                })
            })
            .collect();

        let mut successes = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => successes += 1,
                Err(err) => assert_eq!(cast_error(Err(err)), CastError::AlreadyVoted),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(ballot_box.votes(election.id).await.unwrap().len(), 1);
        assert_eq!(ballot_box.ballots_cast(election.id).await.unwrap(), 1);
    }

    #[rocket::async_test]
    async fn results_are_deterministic() {
        let (ballot_box, election, _) = setup();
        let config = Config::example();
        let now = Election::example_now();

        for choice in ["Y", "X", "Y"] {
            let mut voter = Voter::example();
            voter.id = Id::new();
            let ballot = BallotSpec::single(choice);
            cast_ballot(&ballot_box, &voter, election.id, ballot, now, &config)
                .await
                .unwrap();
        }

        let first = compute_results(&ballot_box, &election, now).await.unwrap();
        let second = compute_results(&ballot_box, &election, now).await.unwrap();
        assert_eq!(first, second);

        let rows: Vec<_> = first
            .candidates
            .iter()
            .map(|row| (row.candidate.as_str(), row.votes, row.percentage))
            .collect();
        assert_eq!(rows, vec![("Y", 2, 66.67), ("X", 1, 33.33), ("Z", 0, 0.0)]);
        assert_eq!(first.ballots_cast, 3);
        assert_eq!(first.eligible_voters, 3);
        assert_eq!(first.turnout, 100.0);
        assert_eq!(first.phase, Phase::Open);
        let gender = Voter::example().demographic.gender;
        assert_eq!(first.breakdown.by_gender[&gender], 3);
    }
}
