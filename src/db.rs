use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension as _, Row, Transaction};
use serde::{Deserialize, Serialize};

use crate::elections::{Candidate, Category, Constituency, Election, ElectionBody};

pub const DB_FILE: &str = "openballot.db";

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Pool(#[from] r2d2::Error),
    #[error("{0} already exists")]
    Duplicate(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Row id {0} does not fit in 32 bits")]
    IdOverflow(i64),
}

pub type Result<T> = std::result::Result<T, DbError>;

fn row_id(connection: &Connection) -> Result<u32> {
    let id = connection.last_insert_rowid();
    u32::try_from(id).map_err(|_| DbError::IdOverflow(id))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u32,
    pub name: String,
    pub voter_id: u32,
    pub facial_hash: String,
    pub address: Option<String>,
}

pub fn create_db(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS users(
            id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            name TEXT NOT NULL,
            voter_id INTEGER NOT NULL UNIQUE,
            facial_hash TEXT NOT NULL,
            address TEXT);
        CREATE TABLE IF NOT EXISTS elections(
            id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            start_time INTEGER NOT NULL,
            end_time INTEGER NOT NULL,
            status TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS constituency(
            id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            region TEXT NOT NULL,
            name TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS pres_candidates(
            id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            name TEXT NOT NULL,
            political_party TEXT NOT NULL,
            election_id INTEGER NOT NULL REFERENCES elections(id));
        CREATE TABLE IF NOT EXISTS pal_candidates(
            id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            name TEXT NOT NULL,
            political_party TEXT NOT NULL,
            election_id INTEGER NOT NULL REFERENCES elections(id));",
    )?;
    Ok(())
}

pub fn open_pool(db_file: &str) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_file)
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::new(manager)?;
    let connection = pool.get()?;
    create_db(&connection)?;
    Ok(pool)
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

fn row_to_user(r: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: r.get(0)?,
        name: r.get(1)?,
        voter_id: r.get(2)?,
        facial_hash: r.get(3)?,
        address: r.get(4)?,
    })
}

pub fn insert_user(name: &str, voter_id: u32, facial_hash: &str, pool: &DbPool) -> Result<User> {
    let connection = pool.get()?;
    let user = connection
        .query_row(
            "INSERT INTO users(name, voter_id, facial_hash) VALUES (?1, ?2, ?3)
            RETURNING id, name, voter_id, facial_hash, address",
            params![name, voter_id, facial_hash],
            row_to_user,
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                DbError::Duplicate(format!("Voter {voter_id}"))
            } else {
                e.into()
            }
        })?;
    tracing::info!("Registered voter {}", voter_id);
    Ok(user)
}

pub fn find_user_by_voter_id(voter_id: u32, pool: &DbPool) -> Result<Option<User>> {
    let connection = pool.get()?;
    let user = connection
        .query_row(
            "SELECT id, name, voter_id, facial_hash, address FROM users WHERE voter_id = ?1",
            [voter_id],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

pub fn find_user(id: u32, pool: &DbPool) -> Result<Option<User>> {
    let connection = pool.get()?;
    let user = connection
        .query_row(
            "SELECT id, name, voter_id, facial_hash, address FROM users WHERE id = ?1",
            [id],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

/// Replaces the wallet address of a voter.
pub fn link_wallet(voter_id: u32, address: &str, pool: &DbPool) -> Result<()> {
    let connection = pool.get()?;
    let updated = connection.execute(
        "UPDATE users SET address = ?1 WHERE voter_id = ?2",
        params![address, voter_id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("Voter {voter_id}")));
    }
    tracing::info!("Linked wallet {} to voter {}", address, voter_id);
    Ok(())
}

fn insert_candidates(
    db_tx: &Transaction,
    category: Category,
    id_election: u32,
    candidates: &[Candidate],
) -> Result<Vec<Candidate>> {
    let mut s = db_tx.prepare(&format!(
        "INSERT INTO {}(name, political_party, election_id) VALUES (?1, ?2, ?3)",
        category.table()
    ))?;
    let mut stored = vec![];
    for c in candidates {
        s.execute(params![c.name, c.political_party, id_election])?;
        stored.push(Candidate {
            id: Some(row_id(db_tx)?),
            name: c.name.clone(),
            political_party: c.political_party.clone(),
            election_id: Some(id_election),
        });
    }
    Ok(stored)
}

/// Stores the election and both rosters atomically. Ids in the input are
/// ignored.
pub fn create_election(body: &ElectionBody, pool: &DbPool) -> Result<ElectionBody> {
    let mut connection = pool.get()?;
    let db_tx = connection.transaction()?;
    let e = &body.elections;
    db_tx.execute(
        "INSERT INTO elections(title, description, start_time, end_time, status)
        VALUES (?1, ?2, ?3, ?4, ?5)",
        params![e.title, e.description, e.start_time, e.end_time, e.status],
    )?;
    let id_election = row_id(&db_tx)?;
    let pres_candidates =
        insert_candidates(&db_tx, Category::Presidential, id_election, &body.pres_candidates)?;
    let pal_candidates =
        insert_candidates(&db_tx, Category::Parliamentary, id_election, &body.pal_candidates)?;
    db_tx.commit()?;
    tracing::info!(
        "Election {} created with {} presidential and {} parliamentary candidates",
        id_election,
        pres_candidates.len(),
        pal_candidates.len()
    );

    Ok(ElectionBody {
        elections: Election {
            id: Some(id_election),
            ..e.clone()
        },
        pres_candidates,
        pal_candidates,
    })
}

fn row_to_election(r: &Row) -> rusqlite::Result<Election> {
    Ok(Election {
        id: Some(r.get(0)?),
        title: r.get(1)?,
        description: r.get(2)?,
        start_time: r.get(3)?,
        end_time: r.get(4)?,
        status: r.get(5)?,
    })
}

fn get_candidates(
    connection: &Connection,
    category: Category,
    id_election: u32,
) -> Result<Vec<Candidate>> {
    let mut s = connection.prepare(&format!(
        "SELECT id, name, political_party, election_id FROM {} WHERE election_id = ?1 ORDER BY id",
        category.table()
    ))?;
    let rows = s.query_map([id_election], |r| {
        Ok(Candidate {
            id: Some(r.get(0)?),
            name: r.get(1)?,
            political_party: r.get(2)?,
            election_id: Some(r.get(3)?),
        })
    })?;
    let candidates = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(candidates)
}

fn load_body(connection: &Connection, election: Election) -> Result<ElectionBody> {
    let id = election.id.unwrap_or_default();
    Ok(ElectionBody {
        pres_candidates: get_candidates(connection, Category::Presidential, id)?,
        pal_candidates: get_candidates(connection, Category::Parliamentary, id)?,
        elections: election,
    })
}

pub fn get_election(id: u32, pool: &DbPool) -> Result<Option<ElectionBody>> {
    let connection = pool.get()?;
    let election = connection
        .query_row(
            "SELECT id, title, description, start_time, end_time, status
            FROM elections WHERE id = ?1",
            [id],
            row_to_election,
        )
        .optional()?;
    election.map(|e| load_body(&connection, e)).transpose()
}

pub fn list_elections(pool: &DbPool) -> Result<Vec<ElectionBody>> {
    let connection = pool.get()?;
    let mut s = connection.prepare(
        "SELECT id, title, description, start_time, end_time, status
        FROM elections ORDER BY id",
    )?;
    let elections = s
        .query_map([], row_to_election)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    elections
        .into_iter()
        .map(|e| load_body(&connection, e))
        .collect()
}

pub fn insert_constituency(c: &Constituency, pool: &DbPool) -> Result<Constituency> {
    let mut connection = pool.get()?;
    let db_tx = connection.transaction()?;
    db_tx.execute(
        "INSERT INTO constituency(region, name) VALUES (?1, ?2)",
        params![c.region, c.name],
    )?;
    let id = row_id(&db_tx)?;
    db_tx.commit()?;
    Ok(Constituency {
        id: Some(id),
        ..c.clone()
    })
}

pub fn list_constituencies(pool: &DbPool) -> Result<Vec<Constituency>> {
    let connection = pool.get()?;
    let mut s = connection.prepare("SELECT id, region, name FROM constituency ORDER BY id")?;
    let rows = s.query_map([], |r| {
        Ok(Constituency {
            id: Some(r.get(0)?),
            region: r.get(1)?,
            name: r.get(2)?,
        })
    })?;
    let constituencies = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(constituencies)
}
