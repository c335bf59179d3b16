use std::sync::Arc;

use async_trait::async_trait;
use open_ballot::{
    config::AppConfig,
    contract::{parse_address, VotingContract},
    db::{create_db, DbPool},
    elections::{Candidate, Election, ElectionBody},
    face::{FaceError, FaceMatch, FaceOracle, Image},
    server::{build_rocket, AppState},
    subgraph::{IndexedVote, StaticVotes, SubgraphError, VoteSource},
    tally::VoteRecord,
};
use r2d2_sqlite::SqliteConnectionManager;
use rocket::{
    http::{ContentType, Header, Status},
    local::blocking::Client,
};
use serde_json::Value;

const BOUNDARY: &str = "openballot-test-boundary";
const HASH: &str = "0110100111";

struct FixedFace {
    accept: bool,
}

#[async_trait]
impl FaceOracle for FixedFace {
    async fn average_hash(&self, images: Vec<Image>) -> Result<String, FaceError> {
        assert!(images.iter().all(|i| !i.bytes.is_empty()));
        Ok(HASH.to_string())
    }

    async fn compare(&self, _image: Image, target_hash: &str) -> Result<FaceMatch, FaceError> {
        assert_eq!(target_hash, HASH);
        Ok(FaceMatch {
            is_match: self.accept,
            hamming_distance: if self.accept { 3 } else { 40 },
        })
    }
}

struct DownIndexer;

#[async_trait]
impl VoteSource for DownIndexer {
    async fn fetch_page(&self, _election_id: u32, _first: usize, _last_id: &str) -> Result<Vec<IndexedVote>, SubgraphError> {
        Err(SubgraphError::Query("indexer unavailable".to_string()))
    }
}

fn memory_pool() -> DbPool {
    let pool = r2d2::Pool::builder()
        .max_size(1)
        .build(SqliteConnectionManager::memory())
        .unwrap();
    create_db(&pool.get().unwrap()).unwrap();
    pool
}

fn client_with(votes: Arc<dyn VoteSource>, accept_face: bool) -> Client {
    let config = AppConfig::default();
    let contract = VotingContract::new(
        config.rpc_url.parse().unwrap(),
        parse_address(&config.contract_address).unwrap(),
    );
    let state = AppState {
        config,
        pool: memory_pool(),
        face: Arc::new(FixedFace { accept: accept_face }),
        votes,
        contract,
    };
    let figment = rocket::Config::figment().merge(("log_level", "off"));
    Client::tracked(build_rocket(figment, state).unwrap()).unwrap()
}

fn client() -> Client {
    client_with(Arc::new(StaticVotes(vec![])), true)
}

fn candidate(name: &str, party: &str) -> Candidate {
    Candidate {
        id: None,
        name: name.to_string(),
        political_party: party.to_string(),
        election_id: None,
    }
}

fn election_body() -> ElectionBody {
    ElectionBody {
        elections: Election {
            id: None,
            title: "General Election".to_string(),
            description: "Presidential and parliamentary".to_string(),
            start_time: 1_700_000_000,
            end_time: 1_700_086_400,
            status: "pending".to_string(),
        },
        pres_candidates: vec![candidate("Ama", "NDC"), candidate("Kofi", "NPP")],
        pal_candidates: vec![candidate("Esi", "CPP")],
    }
}

fn vote(pres: &str, parl: &str) -> VoteRecord {
    VoteRecord {
        voter: "0x66e456a52e0bdef0d7dbe2f7e88edbc5da7f93c6".to_string(),
        election_id: "1".to_string(),
        presidential_candidate_id: pres.to_string(),
        parliamentary_candidate_id: parl.to_string(),
    }
}

enum Field<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a [u8]),
}

fn multipart(fields: &[Field]) -> (ContentType, Vec<u8>) {
    let mut body = vec![];
    for field in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match field {
            Field::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
                );
            }
            Field::File(name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"face.jpg\"\r\n\
                        Content-Type: image/jpeg\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    let content_type = ContentType::new("multipart", "form-data").with_params(("boundary", BOUNDARY));
    (content_type, body)
}

fn register(client: &Client, voter_id: &str, images: usize) -> Status {
    let mut fields = vec![Field::Text("name", "Ama Mensah"), Field::Text("voter_id", voter_id)];
    for _ in 0..images {
        fields.push(Field::File("images", b"\xff\xd8\xff\xe0 jpeg"));
    }
    let (content_type, body) = multipart(&fields);
    client.post("/register").header(content_type).body(body).dispatch().status()
}

fn login(client: &Client, voter_id: &str) -> Status {
    let (content_type, body) = multipart(&[
        Field::Text("voter_id", voter_id),
        Field::File("image", b"\xff\xd8\xff\xe0 jpeg"),
    ]);
    client.post("/login").header(content_type).body(body).dispatch().status()
}

#[test]
fn create_and_fetch_election() {
    let client = client();
    let response = client.post("/election").json(&election_body()).dispatch();
    assert_eq!(response.status(), Status::Ok);
    let created: ElectionBody = response.into_json().unwrap();
    let id = created.id().unwrap();
    assert_eq!(created.pres_candidates.len(), 2);

    let fetched: ElectionBody = client
        .get(format!("/election/{id}"))
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(fetched, created);

    let all: Vec<ElectionBody> = client.get("/election").dispatch().into_json().unwrap();
    assert_eq!(all, vec![created]);

    assert_eq!(client.get("/election/999").dispatch().status(), Status::NotFound);
}

#[test]
fn invalid_election_is_rejected() {
    let client = client();
    let mut body = election_body();
    body.elections.end_time = body.elections.start_time - 1;
    let response = client.post("/election").json(&body).dispatch();
    assert_eq!(response.status(), Status::BadRequest);
    let all: Vec<ElectionBody> = client.get("/election").dispatch().into_json().unwrap();
    assert!(all.is_empty());
}

#[test]
fn results_join_roster_and_votes() {
    let votes = vec![vote("2", "1"), vote("2", "1"), vote("1", "1"), vote("7", "1")];
    let client = client_with(Arc::new(StaticVotes(votes)), true);
    client.post("/election").json(&election_body()).dispatch();

    let tally: Value = client.get("/election/1/tally").dispatch().into_json().unwrap();
    assert_eq!(tally["presidentialCandidates"]["2"], 2);
    assert_eq!(tally["presidentialCandidates"]["7"], 1);
    assert_eq!(tally["parliamentaryCandidates"]["1"], 4);

    let results: Value = client.get("/election/1/results").dispatch().into_json().unwrap();
    let pres = &results["presidential"];
    assert_eq!(pres["winner"]["id"], 2);
    assert_eq!(pres["winner"]["name"], "Kofi");
    assert_eq!(pres["total_votes"], 3);
    assert_eq!(pres["unlisted"]["7"], 1);
    assert_eq!(results["parliamentary"]["candidates"][0]["votes"], 4);

    assert_eq!(client.get("/election/2/results").dispatch().status(), Status::NotFound);
}

#[test]
fn indexer_failure_is_not_zero_votes() {
    let client = client_with(Arc::new(DownIndexer), true);
    client.post("/election").json(&election_body()).dispatch();
    assert_eq!(client.get("/election/1/results").dispatch().status(), Status::BadGateway);
    assert_eq!(client.get("/election/1/tally").dispatch().status(), Status::BadGateway);
}

#[test]
fn registration_and_login() {
    let client = client();
    assert_eq!(register(&client, "42", 1), Status::BadRequest);
    assert_eq!(register(&client, "42", 2), Status::Ok);
    assert_eq!(register(&client, "42", 3), Status::Conflict);

    assert_eq!(client.get("/").dispatch().status(), Status::Unauthorized);
    assert_eq!(login(&client, "43"), Status::NotFound);
    assert_eq!(login(&client, "42"), Status::Ok);

    let me: Value = client.get("/").dispatch().into_json().unwrap();
    assert_eq!(me["voter_id"], 42);
    assert_eq!(me["facial_hash"], HASH);

    assert_eq!(client.post("/logout").dispatch().status(), Status::NoContent);
    assert_eq!(client.get("/").dispatch().status(), Status::Unauthorized);
}

#[test]
fn face_mismatch_denies_login() {
    let client = client_with(Arc::new(StaticVotes(vec![])), false);
    assert_eq!(register(&client, "7", 2), Status::Ok);
    assert_eq!(login(&client, "7"), Status::NotFound);
    assert_eq!(client.get("/").dispatch().status(), Status::Unauthorized);
}

#[test]
fn wallet_linking() {
    let client = client();
    assert_eq!(register(&client, "42", 2), Status::Ok);
    let link = |voter_id: u32, address: &str| {
        client
            .post("/users/link-wallet")
            .json(&serde_json::json!({ "walletAddress": address, "voterId": voter_id }))
            .dispatch()
            .status()
    };
    assert_eq!(link(42, "0x66e456A52E0bdef0d7dbE2F7e88EDBC5da7F93C6"), Status::Ok);
    assert_eq!(link(42, "not-a-wallet"), Status::BadRequest);
    assert_eq!(link(43, "0x66e456A52E0bdef0d7dbE2F7e88EDBC5da7F93C6"), Status::NotFound);

    assert_eq!(login(&client, "42"), Status::Ok);
    let me: Value = client.get("/").dispatch().into_json().unwrap();
    assert_eq!(me["address"], "0x66e456A52E0bdef0d7dbE2F7e88EDBC5da7F93C6");
}

#[test]
fn constituencies() {
    let client = client();
    let response = client
        .post("/constituency")
        .json(&serde_json::json!({ "region": "Greater Accra", "name": "Ayawaso West" }))
        .dispatch();
    assert_eq!(response.status(), Status::Ok);
    let bad = client
        .post("/constituency")
        .json(&serde_json::json!({ "region": "", "name": "Nowhere" }))
        .dispatch();
    assert_eq!(bad.status(), Status::BadRequest);
    let all: Value = client.get("/constituency").dispatch().into_json().unwrap();
    assert_eq!(all.as_array().map(|a| a.len()), Some(1));
}

#[test]
fn cors_allows_only_get_and_post() {
    let client = client();
    let preflight = |method: &str| {
        client
            .options("/election")
            .header(Header::new("Origin", "http://localhost:5173"))
            .header(Header::new("Access-Control-Request-Method", method.to_string()))
            .dispatch()
    };
    let allowed = preflight("POST");
    assert!(allowed.status().class().is_success());
    let methods = allowed.headers().get_one("Access-Control-Allow-Methods").unwrap_or_default();
    assert!(methods.contains("POST"));
    assert!(!methods.contains("PATCH"));
    assert_eq!(preflight("PATCH").status(), Status::Forbidden);
}
