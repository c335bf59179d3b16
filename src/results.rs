use std::{cmp::Ordering, collections::BTreeMap};

use serde::Serialize;

use crate::{
    elections::{Candidate, Category, ElectionBody},
    tally::VoteCount,
};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CandidateResult {
    pub id: u32,
    pub name: String,
    pub party: String,
    pub votes: u64,
    pub percentage: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategoryResults {
    pub candidates: Vec<CandidateResult>,
    pub winner: Option<CandidateResult>,
    pub total_votes: u64,
    /// Counts for ids that are not on the roster
    pub unlisted: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ElectionResults {
    pub election_id: Option<u32>,
    pub title: String,
    pub presidential: CategoryResults,
    pub parliamentary: CategoryResults,
}

impl ElectionResults {
    pub fn compile(roster: &ElectionBody, count: &VoteCount) -> Self {
        ElectionResults {
            election_id: roster.id(),
            title: roster.elections.title.clone(),
            presidential: CategoryResults::compile(
                roster.candidates(Category::Presidential),
                &count.presidential_candidates,
            ),
            parliamentary: CategoryResults::compile(
                roster.candidates(Category::Parliamentary),
                &count.parliamentary_candidates,
            ),
        }
    }
}

impl CategoryResults {
    fn compile(roster: &[Candidate], counts: &BTreeMap<String, u64>) -> Self {
        let mut unlisted = counts.clone();
        let mut candidates = vec![];
        for c in roster {
            let Some(id) = c.id else { continue };
            let votes = unlisted.remove(&id.to_string()).unwrap_or(0);
            candidates.push(CandidateResult {
                id,
                name: c.name.clone(),
                party: c.political_party.clone(),
                votes,
                percentage: 0.0,
            });
        }
        let total_votes: u64 = candidates.iter().map(|c| c.votes).sum();
        if total_votes > 0 {
            for c in candidates.iter_mut() {
                c.percentage = c.votes as f64 * 100.0 / total_votes as f64;
            }
        }
        let winner = candidates
            .iter()
            .filter(|c| c.votes > 0)
            .max_by(|a, b| a.votes.cmp(&b.votes).then(b.id.cmp(&a.id)))
            .cloned();

        CategoryResults {
            candidates,
            winner,
            total_votes,
            unlisted,
        }
    }
}

/// Integer ids sort before every other id and compare as numbers; the rest
/// compare as strings.
fn compare_ids(a: &str, b: &str) -> Ordering {
    let key = |id: &str| {
        let n = id.parse::<u128>().ok();
        (n.is_none(), n, id.to_string())
    };
    key(a).cmp(&key(b))
}

/// Picks the key with the most votes from a bare frequency map. Ties go to
/// the smallest id, integer ids first.
pub fn winner(counts: &BTreeMap<String, u64>) -> Option<(&str, u64)> {
    counts
        .iter()
        .max_by(|(ka, va), (kb, vb)| va.cmp(vb).then_with(|| compare_ids(kb, ka)))
        .map(|(k, v)| (k.as_str(), *v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::tests::sample_body,
        tally::{tally, VoteRecord},
    };

    fn with_ids(mut body: ElectionBody) -> ElectionBody {
        for (i, c) in body.pres_candidates.iter_mut().enumerate() {
            c.id = Some(i as u32 + 1);
        }
        for (i, c) in body.pal_candidates.iter_mut().enumerate() {
            c.id = Some(i as u32 + 10);
        }
        body
    }

    fn vote(pres: &str, parl: &str) -> VoteRecord {
        VoteRecord {
            voter: "0x1".to_string(),
            election_id: "1".to_string(),
            presidential_candidate_id: pres.to_string(),
            parliamentary_candidate_id: parl.to_string(),
        }
    }

    #[test]
    fn missing_candidates_get_zero() {
        let roster = with_ids(sample_body());
        let count = tally(&[vote("1", "10"), vote("1", "10"), vote("1", "10")]);
        let results = ElectionResults::compile(&roster, &count);

        let pres = &results.presidential;
        assert_eq!(pres.candidates.len(), 2);
        assert_eq!(pres.candidates[0].votes, 3);
        assert_eq!(pres.candidates[1].votes, 0);
        assert_eq!(pres.candidates[1].percentage, 0.0);
        assert_eq!(pres.candidates[0].percentage, 100.0);
        assert_eq!(pres.winner.as_ref().map(|w| w.id), Some(1));
        assert_eq!(pres.total_votes, 3);
        assert!(pres.unlisted.is_empty());
    }

    #[test]
    fn unlisted_ids_are_kept() {
        let roster = with_ids(sample_body());
        let count = tally(&[vote("1", "10"), vote("99", "10")]);
        let results = ElectionResults::compile(&roster, &count);
        assert_eq!(results.presidential.total_votes, 1);
        assert_eq!(results.presidential.unlisted.get("99"), Some(&1));
    }

    #[test]
    fn tie_goes_to_smallest_id() {
        let roster = with_ids(sample_body());
        let count = tally(&[vote("2", "10"), vote("1", "10")]);
        let results = ElectionResults::compile(&roster, &count);
        assert_eq!(results.presidential.winner.map(|w| w.id), Some(1));
        assert_eq!(results.presidential.candidates[0].percentage, 50.0);
    }

    #[test]
    fn no_votes_no_winner() {
        let roster = with_ids(sample_body());
        let results = ElectionResults::compile(&roster, &VoteCount::default());
        assert!(results.presidential.winner.is_none());
        assert!(results.parliamentary.winner.is_none());
        assert_eq!(results.parliamentary.candidates[0].votes, 0);
    }

    #[test]
    fn bare_map_winner() {
        let count = tally(&[vote("10", "a"), vote("9", "b"), vote("10", "b"), vote("9", "a")]);
        assert_eq!(winner(&count.presidential_candidates), Some(("9", 2)));
        assert_eq!(winner(&count.parliamentary_candidates), Some(("a", 2)));
        assert_eq!(winner(&BTreeMap::new()), None);

        let count = tally(&[vote("3", "x"), vote("3", "y"), vote("2", "y")]);
        assert_eq!(winner(&count.presidential_candidates), Some(("3", 2)));
        assert_eq!(winner(&count.parliamentary_candidates), Some(("y", 2)));
    }

    #[test]
    fn mixed_ids_order_consistently() {
        let ids = ["10", "9", "1a", "b", "007"];
        for a in ids {
            for b in ids {
                for c in ids {
                    if compare_ids(a, b) == Ordering::Less && compare_ids(b, c) == Ordering::Less {
                        assert_eq!(compare_ids(a, c), Ordering::Less, "{a} < {b} < {c}");
                    }
                }
            }
        }
        assert_eq!(compare_ids("9", "10"), Ordering::Less);
        assert_eq!(compare_ids("10", "1a"), Ordering::Less);
        assert_eq!(compare_ids("1a", "b"), Ordering::Less);

        let tied: BTreeMap<String, u64> = [("10", 4), ("9", 4), ("1a", 4)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(winner(&tied), Some(("9", 4)));
        let tied: BTreeMap<String, u64> = [("b", 1), ("1a", 1)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(winner(&tied), Some(("1a", 1)));
    }
}
