use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{
        election::{CandidateId, ElectionId},
        receipt::{decode_salt, ReceiptHash},
    },
    db::vote::VoteRecord,
};

/// The voter's private copy of one recorded choice.
///
/// Holding the salt is what lets the voter, and only the voter, show that a
/// public ledger entry is theirs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub election_id: ElectionId,
    pub candidate: CandidateId,
    pub cast_at: DateTime<Utc>,
    /// Hex-encoded random salt. Never stored by the server.
    pub salt: String,
    pub receipt_hash: ReceiptHash,
    /// Hex-encoded HMAC of the receipt hash under the server's key.
    pub signature: String,
}

impl Receipt {
    /// Recompute the receipt hash from its parts, or `None` if the salt is malformed.
    pub fn recompute_hash(&self) -> Option<ReceiptHash> {
        let salt = decode_salt(&self.salt)?;
        Some(ReceiptHash::compute(
            self.election_id,
            &self.candidate,
            self.cast_at,
            &salt,
        ))
    }

    /// Whether the stated hash matches the receipt's contents.
    pub fn is_consistent(&self) -> bool {
        self.recompute_hash() == Some(self.receipt_hash)
    }
}

/// A ledger entry as published on the bulletin board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicReceipt {
    pub receipt_hash: ReceiptHash,
    pub candidate: CandidateId,
    pub cast_at: DateTime<Utc>,
}

impl From<VoteRecord> for PublicReceipt {
    fn from(vote: VoteRecord) -> Self {
        Self {
            receipt_hash: vote.record.receipt_hash,
            candidate: vote.record.candidate,
            cast_at: vote.record.cast_at,
        }
    }
}
