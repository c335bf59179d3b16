//! JSON-RPC client of the OpenBallot voting contract.
//!
//! Reads go through `eth_call`. Writes are sent with `eth_sendTransaction` from
//! an account the node manages, so nothing is signed locally.

use std::{future::Future, time::Duration};

use alloy::{
    primitives::{Address, U256},
    sol,
    sol_types::SolCall,
};
use reqwest::{Client, Url};
use rocket::tokio::time::{sleep, timeout};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

sol! {
    function createElection(uint256 _electionId, uint256 _startTime, uint256 _endTime) external;
    function castVote(uint256 _electionId, uint256 _presidentialCandidateId, uint256 _parliamentaryCandidateId) external;
    function getVoteCount(uint256 _electionId) external view returns (uint256);
    function hasVoted(address voter, uint256 electionId) external view returns (bool);
    function elections(uint256 electionId) external view returns (uint256 startTime, uint256 endTime, bool isActive);
    function votes(uint256 index) external view returns (uint256 electionId, uint256 presidentialCandidateId, uint256 parliamentaryCandidateId, address voter);
}

pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(thiserror::Error, Debug)]
pub enum ContractError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Cannot decode {0}")]
    Decode(String),
    #[error("Transaction {0} not mined after {1:?}")]
    Timeout(String, Duration),
}

pub type Result<T> = std::result::Result<T, ContractError>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChainElection {
    pub start_time: u64,
    pub end_time: u64,
    pub is_active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChainVote {
    pub election_id: u64,
    pub presidential_candidate_id: u64,
    pub parliamentary_candidate_id: u64,
    pub voter: String,
}

/// Final state of a submitted transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum TxOutcome {
    Confirmed { block_number: u64 },
    Reverted { block_number: u64 },
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: String,
    pub block_number: Option<String>,
    pub status: Option<String>,
}

impl Receipt {
    pub fn outcome(&self) -> Result<TxOutcome> {
        let block_number = self
            .block_number
            .as_deref()
            .map(parse_quantity)
            .transpose()?
            .unwrap_or_default();
        match self.status.as_deref() {
            Some("0x1") => Ok(TxOutcome::Confirmed { block_number }),
            Some("0x0") => Ok(TxOutcome::Reverted { block_number }),
            other => Err(ContractError::Decode(format!("receipt status {other:?}"))),
        }
    }
}

pub fn parse_quantity(s: &str) -> Result<u64> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|_| ContractError::Decode(format!("quantity {s}")))
}

fn parse_bytes(s: &str) -> Result<Vec<u8>> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|_| ContractError::Decode(format!("data {s}")))
}

fn to_u64(v: U256) -> Result<u64> {
    u64::try_from(v).map_err(|_| ContractError::Decode(format!("{v} does not fit u64")))
}

pub fn parse_address(s: &str) -> Result<Address> {
    s.parse::<Address>()
        .map_err(|_| ContractError::Decode(format!("address {s}")))
}

/// Polls `fetch` until it yields a receipt, or fails with `Timeout` once
/// `deadline` has elapsed.
pub async fn poll_receipt<F, Fut>(
    tx_hash: &str,
    mut fetch: F,
    interval: Duration,
    deadline: Duration,
) -> Result<TxOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<Receipt>>>,
{
    let wait = async {
        loop {
            if let Some(receipt) = fetch().await? {
                return receipt.outcome();
            }
            sleep(interval).await;
        }
    };
    match timeout(deadline, wait).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ContractError::Timeout(tx_hash.to_string(), deadline)),
    }
}

#[derive(Clone)]
pub struct VotingContract {
    client: Client,
    rpc_url: Url,
    address: Address,
}

impl VotingContract {
    pub fn new(rpc_url: Url, address: Address) -> Self {
        VotingContract {
            client: Client::new(),
            rpc_url,
            address,
        }
    }

    async fn rpc<Res: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Res> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response: RpcResponse = self
            .client
            .post(self.rpc_url.clone())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if let Some(e) = response.error {
            return Err(ContractError::Rpc {
                code: e.code,
                message: e.message,
            });
        }
        serde_json::from_value(response.result.unwrap_or(Value::Null))
            .map_err(|e| ContractError::Decode(format!("{method} result: {e}")))
    }

    async fn call<C: SolCall>(&self, call: C) -> Result<C::Return> {
        let data = format!("0x{}", hex::encode(call.abi_encode()));
        let tx = json!({ "to": self.address.to_string(), "data": data });
        let output: String = self.rpc("eth_call", json!([tx, "latest"])).await?;
        let bytes = parse_bytes(&output)?;
        C::abi_decode_returns(&bytes).map_err(|e| ContractError::Decode(format!("{}: {e}", C::SIGNATURE)))
    }

    async fn send<C: SolCall>(&self, from: Address, call: C) -> Result<String> {
        let data = format!("0x{}", hex::encode(call.abi_encode()));
        let mut tx = json!({
            "from": from.to_string(),
            "to": self.address.to_string(),
            "data": data,
        });
        let gas: String = self.rpc("eth_estimateGas", json!([tx.clone()])).await?;
        let gas_price: String = self.rpc("eth_gasPrice", json!([])).await?;
        tx["gas"] = Value::String(gas);
        tx["gasPrice"] = Value::String(gas_price);
        let tx_hash: String = self.rpc("eth_sendTransaction", json!([tx])).await?;
        tracing::info!("{} sent as {}", C::SIGNATURE, tx_hash);
        Ok(tx_hash)
    }

    pub async fn create_election(&self, from: Address, election_id: u32, start_time: u64, end_time: u64) -> Result<String> {
        self.send(
            from,
            createElectionCall {
                _electionId: U256::from(election_id),
                _startTime: U256::from(start_time),
                _endTime: U256::from(end_time),
            },
        )
        .await
    }

    pub async fn cast_vote(
        &self,
        from: Address,
        election_id: u32,
        presidential_candidate_id: u32,
        parliamentary_candidate_id: u32,
    ) -> Result<String> {
        self.send(
            from,
            castVoteCall {
                _electionId: U256::from(election_id),
                _presidentialCandidateId: U256::from(presidential_candidate_id),
                _parliamentaryCandidateId: U256::from(parliamentary_candidate_id),
            },
        )
        .await
    }

    pub async fn vote_count(&self, election_id: u32) -> Result<u64> {
        let count = self
            .call(getVoteCountCall {
                _electionId: U256::from(election_id),
            })
            .await?;
        to_u64(count)
    }

    pub async fn has_voted(&self, voter: Address, election_id: u32) -> Result<bool> {
        self.call(hasVotedCall {
            voter,
            electionId: U256::from(election_id),
        })
        .await
    }

    pub async fn election(&self, election_id: u32) -> Result<ChainElection> {
        let r = self
            .call(electionsCall {
                electionId: U256::from(election_id),
            })
            .await?;
        Ok(ChainElection {
            start_time: to_u64(r.startTime)?,
            end_time: to_u64(r.endTime)?,
            is_active: r.isActive,
        })
    }

    pub async fn vote(&self, index: u64) -> Result<ChainVote> {
        let r = self.call(votesCall { index: U256::from(index) }).await?;
        Ok(ChainVote {
            election_id: to_u64(r.electionId)?,
            presidential_candidate_id: to_u64(r.presidentialCandidateId)?,
            parliamentary_candidate_id: to_u64(r.parliamentaryCandidateId)?,
            voter: r.voter.to_string(),
        })
    }

    pub async fn receipt(&self, tx_hash: &str) -> Result<Option<Receipt>> {
        self.rpc("eth_getTransactionReceipt", json!([tx_hash])).await
    }

    /// Waits until the transaction is mined, for at most `deadline`.
    pub async fn wait_for_receipt(&self, tx_hash: &str, deadline: Duration) -> Result<TxOutcome> {
        let outcome = poll_receipt(tx_hash, || self.receipt(tx_hash), RECEIPT_POLL_INTERVAL, deadline).await?;
        tracing::info!("{} -> {:?}", tx_hash, outcome);
        Ok(outcome)
    }
}
