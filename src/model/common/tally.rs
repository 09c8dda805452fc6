use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::demographic::{AgeGroup, Demographic, Gender};
use super::election::CandidateId;

/// Vote counts split by demographic bucket. Every bucket is present, even when empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakdown {
    pub by_gender: BTreeMap<Gender, u64>,
    pub by_age_group: BTreeMap<AgeGroup, u64>,
}

impl Default for Breakdown {
    fn default() -> Self {
        Self {
            by_gender: Gender::ALL.into_iter().map(|g| (g, 0)).collect(),
            by_age_group: AgeGroup::ALL.into_iter().map(|a| (a, 0)).collect(),
        }
    }
}

impl Breakdown {
    fn add(&mut self, demographic: Option<&Demographic>) {
        let (gender, age_group) = demographic
            .map(|d| (d.gender, d.age_group))
            .unwrap_or((Gender::Unknown, AgeGroup::Unknown));
        *self.by_gender.entry(gender).or_default() += 1;
        *self.by_age_group.entry(age_group).or_default() += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTally {
    pub candidate: CandidateId,
    pub votes: u64,
    pub breakdown: Breakdown,
}

/// The aggregate of an election's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Number of recorded choices, which exceeds ballots cast when `max_choices > 1`.
    pub total_votes: u64,
    /// Ordered by votes descending, ties in ballot order.
    pub candidates: Vec<CandidateTally>,
    pub overall: Breakdown,
}

impl Tally {
    /// Count the given recorded choices against the election's candidate list.
    /// Choices naming a candidate outside the list are ignored.
    pub fn count<'a, I>(candidates: &[CandidateId], votes: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Option<&'a Demographic>)>,
    {
        let mut tallies: Vec<CandidateTally> = candidates
            .iter()
            .map(|candidate| CandidateTally {
                candidate: candidate.clone(),
                votes: 0,
                breakdown: Breakdown::default(),
            })
            .collect();
        let mut overall = Breakdown::default();
        let mut total_votes = 0;

        for (candidate, demographic) in votes {
            if let Some(tally) = tallies.iter_mut().find(|t| t.candidate == candidate) {
                tally.votes += 1;
                tally.breakdown.add(demographic);
                overall.add(demographic);
                total_votes += 1;
            }
        }

        // Stable, so equal counts keep ballot order.
        tallies.sort_by(|a, b| b.votes.cmp(&a.votes));

        Self {
            total_votes,
            candidates: tallies,
            overall,
        }
    }
}

/// `part` as a percentage of `whole`, rounded to two decimal places.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 * 10_000.0 / whole as f64).round() / 100.0
}
