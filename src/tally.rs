use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One `VoteCast` event as indexed by the subgraph. All fields are the
/// decimal/hex strings the indexer returns.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    pub voter: String,
    pub election_id: String,
    pub presidential_candidate_id: String,
    pub parliamentary_candidate_id: String,
}

/// Per-candidate vote counts for one election.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCount {
    pub presidential_candidates: BTreeMap<String, u64>,
    pub parliamentary_candidates: BTreeMap<String, u64>,
}

impl VoteCount {
    pub fn total_presidential(&self) -> u64 {
        self.presidential_candidates.values().sum()
    }

    pub fn total_parliamentary(&self) -> u64 {
        self.parliamentary_candidates.values().sum()
    }
}

/// Counts every record once in each category. Candidates that received no
/// vote are absent from the maps.
pub fn tally<'a, I>(records: I) -> VoteCount
where
    I: IntoIterator<Item = &'a VoteRecord>,
{
    let mut count = VoteCount::default();
    for vote in records {
        *count
            .presidential_candidates
            .entry(vote.presidential_candidate_id.clone())
            .or_insert(0) += 1;
        *count
            .parliamentary_candidates
            .entry(vote.parliamentary_candidate_id.clone())
            .or_insert(0) += 1;
    }
    count
}
