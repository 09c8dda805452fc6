use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    common::{
        election::{CandidateId, ElectionId, ElectionState, Phase},
        receipt::ReceiptHash,
        tally::{percentage, Breakdown, Tally},
    },
    db::election::Election,
};

use super::receipt::{PublicReceipt, Receipt};

/// One row of an election's results table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub candidate: CandidateId,
    pub votes: u64,
    /// Share of all recorded choices, to two decimal places.
    pub percentage: f64,
    pub breakdown: Breakdown,
}

/// Aggregated results of an election.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionResults {
    pub election_id: ElectionId,
    pub title: String,
    pub state: ElectionState,
    pub phase: Phase,
    /// Number of voters who cast a ballot.
    pub ballots_cast: u64,
    pub eligible_voters: u64,
    /// `ballots_cast` as a percentage of `eligible_voters`.
    pub turnout: f64,
    /// Number of recorded choices.
    pub total_votes: u64,
    /// Ordered by votes descending, ties in ballot order.
    pub candidates: Vec<CandidateResult>,
    pub breakdown: Breakdown,
}

impl ElectionResults {
    pub fn new(
        election: &Election,
        tally: Tally,
        ballots_cast: u64,
        eligible_voters: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let total_votes = tally.total_votes;
        Self {
            election_id: election.id,
            title: election.title.clone(),
            state: election.state,
            phase: election.phase(now),
            ballots_cast,
            eligible_voters,
            turnout: percentage(ballots_cast, eligible_voters),
            total_votes,
            candidates: tally
                .candidates
                .into_iter()
                .map(|row| CandidateResult {
                    percentage: percentage(row.votes, total_votes),
                    candidate: row.candidate,
                    votes: row.votes,
                    breakdown: row.breakdown,
                })
                .collect(),
            breakdown: tally.overall,
        }
    }
}

/// Everything needed to audit an election's ledger offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDump {
    pub election_id: ElectionId,
    pub title: String,
    pub candidates: Vec<CandidateId>,
    pub max_choices: u16,
    pub ballots_cast: u64,
    /// Every recorded choice, in ledger order.
    pub votes: Vec<PublicReceipt>,
    /// The tally the server computed from `votes`.
    pub tally: Tally,
}

/// Why a ledger dump or receipt failed verification.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("receipt hash {0} appears more than once in the ledger")]
    DuplicateReceipt(ReceiptHash),
    #[error("ledger records a vote for unknown candidate {0:?}")]
    UnknownCandidate(CandidateId),
    #[error("ledger holds {votes} votes, but {ballots} ballots allow between {ballots} and {max}")]
    VoteCountMismatch { votes: u64, ballots: u64, max: u64 },
    #[error("published tally does not match the ledger")]
    TallyMismatch,
    #[error("receipt is for election {receipt}, but the ledger is for election {ledger}")]
    WrongElection { receipt: ElectionId, ledger: ElectionId },
    #[error("receipt hash does not match its contents")]
    ReceiptInconsistent,
    #[error("receipt {0} is not in the ledger")]
    ReceiptMissing(ReceiptHash),
    #[error("ledger entry for receipt {0} does not match the receipt")]
    ReceiptAltered(ReceiptHash),
}

impl LedgerDump {
    /// Check the ledger is internally consistent and the tally was computed from it.
    pub fn verify(&self) -> Result<(), VerificationError> {
        let mut seen = HashSet::new();
        for vote in &self.votes {
            if !seen.insert(vote.receipt_hash) {
                return Err(VerificationError::DuplicateReceipt(vote.receipt_hash));
            }
            if !self.candidates.contains(&vote.candidate) {
                return Err(VerificationError::UnknownCandidate(vote.candidate.clone()));
            }
        }

        let votes = self.votes.len() as u64;
        let max = self.ballots_cast * u64::from(self.max_choices);
        if votes < self.ballots_cast || votes > max {
            return Err(VerificationError::VoteCountMismatch {
                votes,
                ballots: self.ballots_cast,
                max,
            });
        }

        // Demographics are not published per vote, so only the counts can be recomputed.
        let recount = Tally::count(
            &self.candidates,
            self.votes.iter().map(|v| (v.candidate.as_str(), None)),
        );
        let counts = |tally: &Tally| -> Vec<(CandidateId, u64)> {
            tally
                .candidates
                .iter()
                .map(|row| (row.candidate.clone(), row.votes))
                .collect()
        };
        if recount.total_votes != self.tally.total_votes || counts(&recount) != counts(&self.tally) {
            return Err(VerificationError::TallyMismatch);
        }
        Ok(())
    }

    /// Check a voter's receipt is well-formed and present, unaltered, in this ledger.
    pub fn verify_receipt(&self, receipt: &Receipt) -> Result<(), VerificationError> {
        if receipt.election_id != self.election_id {
            return Err(VerificationError::WrongElection {
                receipt: receipt.election_id,
                ledger: self.election_id,
            });
        }
        if !receipt.is_consistent() {
            return Err(VerificationError::ReceiptInconsistent);
        }
        let entry = self
            .votes
            .iter()
            .find(|v| v.receipt_hash == receipt.receipt_hash)
            .ok_or(VerificationError::ReceiptMissing(receipt.receipt_hash))?;
        if entry.candidate != receipt.candidate || entry.cast_at != receipt.cast_at {
            return Err(VerificationError::ReceiptAltered(receipt.receipt_hash));
        }
        Ok(())
    }
}
