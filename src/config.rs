use anyhow::{Context as _, Result};
use rocket::figment::{providers::Serialized, Figment};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::db::DB_FILE;

/// Application settings. Read from `Rocket.toml` and `ROCKET_*`
/// environment variables next to Rocket's own keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub db_file: String,
    pub face_api_url: String,
    pub subgraph_url: String,
    pub subgraph_token: Option<String>,
    pub rpc_url: String,
    pub contract_address: String,
    pub cors_origin: String,
    pub receipt_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            db_file: DB_FILE.to_string(),
            face_api_url: "http://localhost:3000/".to_string(),
            subgraph_url: "https://api.studio.thegraph.com/query/107428/open-ballot/version/latest"
                .to_string(),
            subgraph_token: None,
            rpc_url: "http://localhost:8545".to_string(),
            contract_address: "0x66e456A52E0bdef0d7dbE2F7e88EDBC5da7F93C6".to_string(),
            cors_origin: "http://localhost:5173".to_string(),
            receipt_timeout_secs: 120,
        }
    }
}

impl AppConfig {
    pub fn figment() -> Figment {
        rocket::Config::figment().join(Serialized::defaults(AppConfig::default()))
    }

    pub fn load(figment: &Figment) -> Result<Self> {
        figment.extract::<AppConfig>().context("Invalid configuration")
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
}
