use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::common::{
    demographic::Demographic,
    election::{CandidateId, ElectionId},
    receipt::ReceiptHash,
};

/// One recorded choice in an election's ledger.
///
/// There is intentionally no field linking a record to the voter who cast it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVoteRecord {
    pub election_id: ElectionId,
    pub candidate: CandidateId,
    /// Truncated to whole milliseconds, the resolution the receipt hash covers.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
    pub receipt_hash: ReceiptHash,
    pub demographic: Option<Demographic>,
}

/// A ledger entry as stored, keyed by its receipt hash.
///
/// The key comes from the salted hash rather than the driver, so it says
/// nothing about which other documents were written alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    #[serde(rename = "_id")]
    pub id: ReceiptHash,
    #[serde(flatten)]
    pub record: NewVoteRecord,
}

impl From<NewVoteRecord> for VoteRecord {
    fn from(record: NewVoteRecord) -> Self {
        Self {
            id: record.receipt_hash,
            record,
        }
    }
}

impl Deref for VoteRecord {
    type Target = NewVoteRecord;

    fn deref(&self) -> &Self::Target {
        &self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;
    use mongodb::bson::to_document;

    use crate::model::common::receipt::SALT_LENGTH;

    #[test]
    fn stored_record_has_no_voter_field() {
        let cast_at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let record = NewVoteRecord {
            election_id: 1,
            candidate: "X".to_string(),
            cast_at,
            receipt_hash: ReceiptHash::compute(1, "X", cast_at, &[0; SALT_LENGTH]),
            demographic: Some(Demographic::default()),
        };
        let receipt_hash = record.receipt_hash.to_string();
        let doc = to_document(&VoteRecord::from(record)).unwrap();
        let keys: Vec<&str> = doc.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["_id", "election_id", "candidate", "cast_at", "receipt_hash", "demographic"]
        );
        assert_eq!(doc.get_str("_id").unwrap(), receipt_hash);
        assert!(doc.get_datetime("cast_at").is_ok());
    }
}
