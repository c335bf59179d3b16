use std::{path::PathBuf, time::Duration};

use anyhow::{anyhow, Result};
use clap::Parser;
use clap_repl::reedline::{DefaultPrompt, DefaultPromptSegment, FileBackedHistory};
use clap_repl::ClapEditor;
use console::style;
use open_ballot::{
    config::AppConfig,
    contract::{parse_address, TxOutcome},
    db,
    elections::load_election_files,
    results::winner,
    server::{start_server, AppState},
    subgraph::VoteSource as _,
    tally::tally,
};
use rocket::tokio;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_ansi(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    cli_main()?;

    Ok(())
}

#[derive(Parser, Clone, Debug)]
#[command(name = "")]
pub enum Command {
    StartServer,
    /// Tally the votes indexed for an election
    Tally {
        election_id: u32,
    },
    /// Import every *.vote election file of a directory
    ImportElections {
        dir: PathBuf,
    },
    /// Register a stored election on chain
    CreateElection {
        election_id: u32,
        from: String,
    },
    CastVote {
        election_id: u32,
        presidential_candidate_id: u32,
        parliamentary_candidate_id: u32,
        from: String,
    },
    VoteCount {
        election_id: u32,
    },
    HasVoted {
        election_id: u32,
        voter: String,
    },
    GetVote {
        index: u64,
    },
}

fn print_outcome(tx_hash: &str, outcome: TxOutcome) {
    match outcome {
        TxOutcome::Confirmed { block_number } => {
            println!("{} {} in block {}", style("confirmed").green(), tx_hash, block_number)
        }
        TxOutcome::Reverted { block_number } => {
            println!("{} {} in block {}", style("reverted").red(), tx_hash, block_number)
        }
    }
}

fn client_state() -> Result<(AppState, Duration)> {
    let config = AppConfig::load(&AppConfig::figment())?;
    let receipt_timeout = config.receipt_timeout();
    Ok((AppState::new(config)?, receipt_timeout))
}

#[tokio::main]
async fn process_command(command: Command) -> Result<()> {
    match command {
        Command::StartServer => {
            start_server().await?;
        }
        Command::Tally { election_id } => {
            let (state, _) = client_state()?;
            let votes = state.votes.fetch_votes(election_id).await?;
            let count = tally(&votes);
            println!("{}", style(format!("{} votes", votes.len())).bold());
            for (name, counts) in [
                ("Presidential", &count.presidential_candidates),
                ("Parliamentary", &count.parliamentary_candidates),
            ] {
                println!("{}", style(name).bold());
                for (candidate, n) in counts {
                    println!("  {candidate:>6} {n}");
                }
                if let Some((candidate, n)) = winner(counts) {
                    println!("  winner {} with {}", style(candidate).green(), n);
                }
            }
        }
        Command::ImportElections { dir } => {
            let (state, _) = client_state()?;
            for body in load_election_files(&dir)? {
                let stored = db::create_election(&body, &state.pool)?;
                println!("{} -> {:?}", stored.elections.title, stored.id());
            }
        }
        Command::CreateElection { election_id, from } => {
            let (state, receipt_timeout) = client_state()?;
            let body = db::get_election(election_id, &state.pool)?
                .ok_or(anyhow!("Election {election_id} not found"))?;
            let start_time = u64::try_from(body.elections.start_time)?;
            let end_time = u64::try_from(body.elections.end_time)?;
            let tx_hash = state
                .contract
                .create_election(parse_address(&from)?, election_id, start_time, end_time)
                .await?;
            let outcome = state.contract.wait_for_receipt(&tx_hash, receipt_timeout).await?;
            print_outcome(&tx_hash, outcome);
        }
        Command::CastVote {
            election_id,
            presidential_candidate_id,
            parliamentary_candidate_id,
            from,
        } => {
            let (state, receipt_timeout) = client_state()?;
            let tx_hash = state
                .contract
                .cast_vote(
                    parse_address(&from)?,
                    election_id,
                    presidential_candidate_id,
                    parliamentary_candidate_id,
                )
                .await?;
            let outcome = state.contract.wait_for_receipt(&tx_hash, receipt_timeout).await?;
            print_outcome(&tx_hash, outcome);
        }
        Command::VoteCount { election_id } => {
            let (state, _) = client_state()?;
            println!("{}", state.contract.vote_count(election_id).await?);
        }
        Command::HasVoted { election_id, voter } => {
            let (state, _) = client_state()?;
            println!("{}", state.contract.has_voted(parse_address(&voter)?, election_id).await?);
        }
        Command::GetVote { index } => {
            let (state, _) = client_state()?;
            println!("{}", serde_json::to_string_pretty(&state.contract.vote(index).await?)?);
        }
    }
    Ok(())
}

pub fn cli_main() -> Result<()> {
    let prompt = DefaultPrompt {
        left_prompt: DefaultPromptSegment::Basic("openballot".to_owned()),
        ..DefaultPrompt::default()
    };
    let rl = ClapEditor::<Command>::builder()
        .with_prompt(Box::new(prompt))
        .with_editor_hook(|reed| {
            reed.with_history(Box::new(
                FileBackedHistory::with_file(10000, "/tmp/openballot-history".into())
                    .expect("history file"),
            ))
        })
        .build();
    rl.repl(|command| {
        if let Err(e) = process_command(command) {
            tracing::error!("{e}");
        }
    });

    Ok(())
}
