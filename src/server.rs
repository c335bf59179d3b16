use std::sync::Arc;

use anyhow::Result;
use rocket::{
    data::{Limits, ToByteUnit as _},
    fairing::{Fairing, Info, Kind},
    figment::Figment,
    form::Form,
    http::{CookieJar, Method, Status},
    request::{FromRequest, Outcome},
    response::status::Custom,
    serde::json::Json,
    Build, Request, Response, Rocket, State,
};
use rocket_cors::{AllowedOrigins, CorsOptions};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    config::AppConfig,
    contract::{parse_address, ChainElection, ContractError, VotingContract},
    db::{self, DbError, DbPool, User},
    elections::{Constituency, ElectionBody},
    execute,
    face::{FaceClient, FaceError, FaceMatch, FaceOracle, Image},
    results::ElectionResults,
    subgraph::{SubgraphClient, SubgraphError, VoteSource},
    tally::{tally, VoteCount},
    validate::{validate_election, validate_enrolment, validate_wallet, ValidationError},
};

pub const AUTH_COOKIE: &str = "auth-token";

/// Everything the handlers share. Built once at startup and handed to Rocket
/// as managed state.
pub struct AppState {
    pub config: AppConfig,
    pub pool: DbPool,
    pub face: Arc<dyn FaceOracle>,
    pub votes: Arc<dyn VoteSource>,
    pub contract: VotingContract,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        let pool = db::open_pool(&config.db_file)?;
        let face = FaceClient::new(Url::parse(&config.face_api_url)?);
        let votes = SubgraphClient::new(Url::parse(&config.subgraph_url)?, config.subgraph_token.clone());
        let contract = VotingContract::new(
            Url::parse(&config.rpc_url)?,
            parse_address(&config.contract_address)?,
        );
        Ok(AppState {
            config,
            pool,
            face: Arc::new(face),
            votes: Arc::new(votes),
            contract,
        })
    }
}

fn bad_request(e: ValidationError) -> Custom<String> {
    Custom(Status::BadRequest, e.to_string())
}

fn db_error(e: DbError) -> Custom<String> {
    let status = match &e {
        DbError::NotFound(_) => Status::NotFound,
        DbError::Duplicate(_) => Status::Conflict,
        _ => Status::InternalServerError,
    };
    if status == Status::InternalServerError {
        tracing::error!("{e}");
    }
    Custom(status, e.to_string())
}

fn face_error(e: FaceError) -> Custom<String> {
    tracing::warn!("{e}");
    match e {
        FaceError::Service(status, body) if status.is_client_error() => Custom(Status::BadRequest, body),
        e => Custom(Status::BadGateway, e.to_string()),
    }
}

fn subgraph_error(e: SubgraphError) -> Custom<String> {
    tracing::warn!("{e}");
    Custom(Status::BadGateway, e.to_string())
}

fn contract_error(e: ContractError) -> Custom<String> {
    tracing::warn!("{e}");
    Custom(Status::BadGateway, e.to_string())
}

fn not_found(what: String) -> Custom<String> {
    Custom(Status::NotFound, format!("{what} not found"))
}

/// Runs a database call on the blocking pool so that async handlers do not
/// stall a runtime worker on SQLite.
async fn run_blocking<T, F>(pool: &DbPool, f: F) -> Result<T, Custom<String>>
where
    F: FnOnce(&DbPool) -> db::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    rocket::tokio::task::spawn_blocking(move || f(&pool))
        .await
        .map_err(|e| Custom(Status::InternalServerError, e.to_string()))?
        .map_err(db_error)
}

/// Signed-in voter, resolved from the private `auth-token` cookie.
pub struct AuthUser(pub User);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = String;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let id = req
            .cookies()
            .get_private(AUTH_COOKIE)
            .and_then(|c| c.value().parse::<u32>().ok());
        let Some(id) = id else {
            return Outcome::Error((Status::Unauthorized, "Not signed in".to_string()));
        };
        let Some(state) = req.rocket().state::<AppState>() else {
            return Outcome::Error((Status::InternalServerError, "No state".to_string()));
        };
        match run_blocking(&state.pool, move |pool| db::find_user(id, pool)).await {
            Ok(Some(user)) => Outcome::Success(AuthUser(user)),
            Ok(None) => Outcome::Error((Status::Unauthorized, "Unknown user".to_string())),
            Err(Custom(status, message)) => Outcome::Error((status, message)),
        }
    }
}

#[get("/")]
fn me(user: AuthUser) -> Json<User> {
    Json(user.0)
}

#[get("/election")]
fn list_elections(state: &State<AppState>) -> Result<Json<Vec<ElectionBody>>, Custom<String>> {
    execute!({
        let elections = db::list_elections(&state.pool)?;
        Ok(Json(elections))
    })
}

#[get("/election/<id>")]
fn get_election(id: u32, state: &State<AppState>) -> Result<Json<ElectionBody>, Custom<String>> {
    let election = db::get_election(id, &state.pool)
        .map_err(db_error)?
        .ok_or_else(|| not_found(format!("Election {id}")))?;
    Ok(Json(election))
}

#[post("/election", data = "<body>")]
fn create_election(
    body: Json<ElectionBody>,
    state: &State<AppState>,
) -> Result<Json<ElectionBody>, Custom<String>> {
    validate_election(&body).map_err(bad_request)?;
    let election = db::create_election(&body, &state.pool).map_err(db_error)?;
    Ok(Json(election))
}

async fn fetch_tally(id: u32, state: &AppState) -> Result<VoteCount, Custom<String>> {
    let votes = state.votes.fetch_votes(id).await.map_err(subgraph_error)?;
    Ok(tally(&votes))
}

#[get("/election/<id>/tally")]
async fn election_tally(id: u32, state: &State<AppState>) -> Result<Json<VoteCount>, Custom<String>> {
    Ok(Json(fetch_tally(id, state).await?))
}

#[get("/election/<id>/results")]
async fn election_results(
    id: u32,
    state: &State<AppState>,
) -> Result<Json<ElectionResults>, Custom<String>> {
    let roster = run_blocking(&state.pool, move |pool| db::get_election(id, pool))
        .await?
        .ok_or_else(|| not_found(format!("Election {id}")))?;
    let count = fetch_tally(id, state).await?;
    Ok(Json(ElectionResults::compile(&roster, &count)))
}

#[derive(Serialize)]
struct ChainStatus {
    election: ChainElection,
    vote_count: u64,
}

#[get("/election/<id>/chain")]
async fn election_chain(id: u32, state: &State<AppState>) -> Result<Json<ChainStatus>, Custom<String>> {
    let election = state.contract.election(id).await.map_err(contract_error)?;
    let vote_count = state.contract.vote_count(id).await.map_err(contract_error)?;
    Ok(Json(ChainStatus {
        election,
        vote_count,
    }))
}

#[get("/election/<id>/voted/<address>")]
async fn has_voted(id: u32, address: &str, state: &State<AppState>) -> Result<Json<bool>, Custom<String>> {
    let voter = parse_address(address).map_err(|e| Custom(Status::BadRequest, e.to_string()))?;
    let voted = state.contract.has_voted(voter, id).await.map_err(contract_error)?;
    Ok(Json(voted))
}

#[get("/constituency")]
fn list_constituencies(state: &State<AppState>) -> Result<Json<Vec<Constituency>>, Custom<String>> {
    execute!({
        let constituencies = db::list_constituencies(&state.pool)?;
        Ok(Json(constituencies))
    })
}

#[post("/constituency", data = "<body>")]
fn create_constituency(
    body: Json<Constituency>,
    state: &State<AppState>,
) -> Result<Json<Constituency>, Custom<String>> {
    if body.name.trim().is_empty() || body.region.trim().is_empty() {
        return Err(bad_request(ValidationError("Constituency needs a name and a region".to_string())));
    }
    let c = db::insert_constituency(&body, &state.pool).map_err(db_error)?;
    Ok(Json(c))
}

#[derive(FromForm)]
struct Registration<'r> {
    name: String,
    voter_id: u32,
    images: Vec<&'r [u8]>,
}

#[post("/register", data = "<form>")]
async fn register(
    form: Form<Registration<'_>>,
    state: &State<AppState>,
) -> Result<Json<User>, Custom<String>> {
    validate_enrolment(form.images.len()).map_err(bad_request)?;
    let images = form.images.iter().map(|b| Image::jpeg(b.to_vec())).collect();
    let facial_hash = state.face.average_hash(images).await.map_err(face_error)?;
    let (name, voter_id) = (form.name.clone(), form.voter_id);
    let user = run_blocking(&state.pool, move |pool| db::insert_user(&name, voter_id, &facial_hash, pool)).await?;
    Ok(Json(user))
}

#[derive(FromForm)]
struct Login<'r> {
    voter_id: u32,
    image: &'r [u8],
}

#[derive(Serialize)]
struct LoginResponse {
    user: User,
    #[serde(rename = "match")]
    face_match: FaceMatch,
}

#[post("/login", data = "<form>")]
async fn login(
    form: Form<Login<'_>>,
    cookies: &CookieJar<'_>,
    state: &State<AppState>,
) -> Result<Json<LoginResponse>, Custom<String>> {
    let voter_id = form.voter_id;
    let user = run_blocking(&state.pool, move |pool| db::find_user_by_voter_id(voter_id, pool))
        .await?
        .ok_or_else(|| not_found(format!("Voter {voter_id}")))?;
    let face_match = state
        .face
        .compare(Image::jpeg(form.image.to_vec()), &user.facial_hash)
        .await
        .map_err(face_error)?;
    if !face_match.is_match {
        tracing::info!("Face mismatch for voter {}", user.voter_id);
        return Err(Custom(
            Status::NotFound,
            "Sorry Your image does not match the user".to_string(),
        ));
    }
    cookies.add_private((AUTH_COOKIE, user.id.to_string()));
    tracing::info!("Voter {} signed in", user.voter_id);
    Ok(Json(LoginResponse { user, face_match }))
}

#[post("/logout")]
fn logout(cookies: &CookieJar<'_>) -> Status {
    cookies.remove_private(AUTH_COOKIE);
    Status::NoContent
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkWallet {
    wallet_address: String,
    voter_id: u32,
}

#[post("/users/link-wallet", data = "<body>")]
fn link_wallet(body: Json<LinkWallet>, state: &State<AppState>) -> Result<&'static str, Custom<String>> {
    validate_wallet(&body.wallet_address).map_err(bad_request)?;
    db::link_wallet(body.voter_id, &body.wallet_address, &state.pool).map_err(db_error)?;
    Ok("done")
}

/// Logs every request with the status it got.
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request logger",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        tracing::info!("{} {} -> {}", req.method(), req.uri(), res.status());
    }
}

pub fn build_rocket(figment: Figment, state: AppState) -> Result<Rocket<Build>> {
    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::some_exact(&[state.config.cors_origin.as_str()]))
        .allowed_methods(
            vec![Method::Get, Method::Post]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allow_credentials(true);
    let limits = Limits::default()
        .limit("bytes", 10.mebibytes())
        .limit("data-form", 64.mebibytes());

    let rocket = rocket::custom(figment.merge(("limits", limits)))
        .manage(state)
        .mount(
            "/",
            routes![
                me,
                list_elections,
                get_election,
                create_election,
                election_tally,
                election_results,
                election_chain,
                has_voted,
                list_constituencies,
                create_constituency,
                register,
                login,
                logout,
                link_wallet,
            ],
        )
        .attach(cors.to_cors()?)
        .attach(RequestLogger);
    Ok(rocket)
}

pub async fn start_server() -> Result<()> {
    let figment = AppConfig::figment();
    let config = AppConfig::load(&figment)?;
    tracing::info!("Using database {}", config.db_file);
    let state = AppState::new(config)?;
    build_rocket(figment, state)?.launch().await?;
    Ok(())
}
