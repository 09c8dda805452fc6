use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::error::Result;
use crate::model::{
    common::election::ElectionId,
    db::{
        election::Election,
        participation::ParticipationMarker,
        vote::{NewVoteRecord, VoteRecord},
    },
    mongodb::Id,
};

use super::{BallotBox, CastError};

#[derive(Default)]
struct Inner {
    elections: HashMap<ElectionId, Election>,
    eligibility: HashSet<(Id, ElectionId)>,
    participation: HashSet<ParticipationMarker>,
    votes: Vec<VoteRecord>,
}

/// A [`BallotBox`] held entirely in memory, for exercising the casting
/// rules without a database.
pub struct MemoryBallotBox {
    registered_voters: u64,
    inner: Mutex<Inner>,
}

impl MemoryBallotBox {
    /// An empty ballot box for a population of `registered_voters`.
    pub fn new(registered_voters: u64) -> Self {
        Self {
            registered_voters,
            inner: Mutex::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("ballot box lock poisoned")
    }

    pub fn add_election(&self, election: Election) {
        self.lock().elections.insert(election.id, election);
    }

    pub fn grant(&self, voter_id: Id, election_id: ElectionId) {
        self.lock().eligibility.insert((voter_id, election_id));
    }
}

#[rocket::async_trait]
impl BallotBox for MemoryBallotBox {
    async fn election(&self, election_id: ElectionId) -> Result<Option<Election>> {
        Ok(self.lock().elections.get(&election_id).cloned())
    }

    async fn has_eligibility(&self, voter_id: Id, election_id: ElectionId) -> Result<bool> {
        Ok(self.lock().eligibility.contains(&(voter_id, election_id)))
    }

    async fn has_voted(&self, voter_id: Id, election_id: ElectionId) -> Result<bool> {
        let marker = ParticipationMarker::new(voter_id, election_id);
        Ok(self.lock().participation.contains(&marker))
    }

    async fn commit(&self, marker: ParticipationMarker, votes: Vec<NewVoteRecord>) -> Result<()> {
        let mut inner = self.lock();
        if !inner.participation.insert(marker) {
            return Err(CastError::AlreadyVoted.into());
        }
        inner.votes.extend(votes.into_iter().map(VoteRecord::from));
        Ok(())
    }

    async fn votes(&self, election_id: ElectionId) -> Result<Vec<VoteRecord>> {
        Ok(self
            .lock()
            .votes
            .iter()
            .filter(|vote| vote.election_id == election_id)
            .cloned()
            .collect())
    }

    async fn ballots_cast(&self, election_id: ElectionId) -> Result<u64> {
        let inner = self.lock();
        let count = inner
            .participation
            .iter()
            .filter(|marker| marker.election_id == election_id)
            .count();
        Ok(count as u64)
    }

    async fn eligible_voters(&self, election: &Election) -> Result<u64> {
        if election.is_public() {
            return Ok(self.registered_voters);
        }
        let inner = self.lock();
        let count = inner
            .eligibility
            .iter()
            .filter(|(_, election_id)| *election_id == election.id)
            .count();
        Ok(count as u64)
    }
}
