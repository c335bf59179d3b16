//! Vote events as indexed by the OpenBallot subgraph.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::tally::VoteRecord;

pub const PAGE_SIZE: usize = 1000;

/// Cursor before the first entity. Entity ids are `Bytes`, so every id sorts
/// after the empty value.
pub const FIRST_CURSOR: &str = "0x";

const VOTE_CASTS_QUERY: &str = "query VoteCasts($electionId: BigInt!, $first: Int!, $lastId: Bytes!) {
  voteCasts(where: {electionId: $electionId, id_gt: $lastId}, first: $first, orderBy: id, orderDirection: asc) {
    id
    voter
    electionId
    presidentialCandidateId
    parliamentaryCandidateId
  }
}";

#[derive(thiserror::Error, Debug)]
pub enum SubgraphError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("Subgraph returned [{0}]: {1}")]
    Status(u16, String),
    #[error("Subgraph query failed: {0}")]
    Query(String),
    #[error("Subgraph cursor stuck at {0}")]
    StuckCursor(String),
}

pub type Result<T> = std::result::Result<T, SubgraphError>;

/// A vote together with the id of the entity that stored it.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct IndexedVote {
    pub id: String,
    #[serde(flatten)]
    pub record: VoteRecord,
}

/// Source of cast votes for an election.
#[async_trait]
pub trait VoteSource: Send + Sync {
    /// At most `first` votes whose id sorts after `last_id`, in id order.
    async fn fetch_page(&self, election_id: u32, first: usize, last_id: &str) -> Result<Vec<IndexedVote>>;

    /// Every vote of the election. Pages are requested by id cursor until
    /// one comes back short.
    async fn fetch_votes(&self, election_id: u32) -> Result<Vec<VoteRecord>> {
        let mut votes = vec![];
        let mut cursor = FIRST_CURSOR.to_string();
        loop {
            let page = self.fetch_page(election_id, PAGE_SIZE, &cursor).await?;
            let done = page.len() < PAGE_SIZE;
            let next = page.last().map(|v| v.id.clone());
            votes.extend(page.into_iter().map(|v| v.record));
            if done {
                break;
            }
            match next {
                Some(next) if next > cursor => cursor = next,
                _ => return Err(SubgraphError::StuckCursor(cursor)),
            }
        }
        tracing::info!("Fetched {} votes for election {}", votes.len(), election_id);
        Ok(votes)
    }
}

#[derive(Deserialize)]
struct GraphQLResponse {
    data: Option<VoteCastsData>,
    #[serde(default)]
    errors: Vec<GraphQLError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteCastsData {
    vote_casts: Vec<IndexedVote>,
}

#[derive(Deserialize, Serialize)]
struct GraphQLError {
    message: String,
}

fn parse_response(body: &str) -> Result<Vec<IndexedVote>> {
    let response: GraphQLResponse =
        serde_json::from_str(body).map_err(|e| SubgraphError::Query(e.to_string()))?;
    if !response.errors.is_empty() {
        let messages = response
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(SubgraphError::Query(messages));
    }
    let data = response
        .data
        .ok_or_else(|| SubgraphError::Query("empty response".to_string()))?;
    Ok(data.vote_casts)
}

#[derive(Clone)]
pub struct SubgraphClient {
    client: Client,
    url: Url,
    token: Option<String>,
}

impl SubgraphClient {
    pub fn new(url: Url, token: Option<String>) -> Self {
        SubgraphClient {
            client: Client::new(),
            url,
            token,
        }
    }
}

#[async_trait]
impl VoteSource for SubgraphClient {
    async fn fetch_page(&self, election_id: u32, first: usize, last_id: &str) -> Result<Vec<IndexedVote>> {
        let body = json!({
            "query": VOTE_CASTS_QUERY,
            "variables": {
                "electionId": election_id.to_string(),
                "first": first,
                "lastId": last_id,
            },
        });
        let mut request = self.client.post(self.url.clone()).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SubgraphError::Status(status.as_u16(), text));
        }
        parse_response(&text)
    }
}

/// Fixed set of votes, for tests and offline tallies. A vote's id is its
/// position in the set.
pub struct StaticVotes(pub Vec<VoteRecord>);

pub fn static_vote_id(index: usize) -> String {
    format!("0x{index:08x}")
}

#[async_trait]
impl VoteSource for StaticVotes {
    async fn fetch_page(&self, election_id: u32, first: usize, last_id: &str) -> Result<Vec<IndexedVote>> {
        let election_id = election_id.to_string();
        Ok(self
            .0
            .iter()
            .enumerate()
            .map(|(i, v)| IndexedVote {
                id: static_vote_id(i),
                record: v.clone(),
            })
            .filter(|v| v.record.election_id == election_id && v.id.as_str() > last_id)
            .take(first)
            .collect())
    }
}
