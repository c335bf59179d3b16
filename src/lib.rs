#[macro_use]
extern crate rocket;

pub mod config;
pub mod contract;
pub mod db;
pub mod elections;
pub mod face;
pub mod results;
pub mod server;
pub mod subgraph;
pub mod tally;
pub mod validate;

/// Runs `$block` as an `anyhow::Result` closure and maps any error to a 500.
#[macro_export]
macro_rules! execute {
    ($block:block) => {
        {
            let res = || -> anyhow::Result<_> {
                $block
            };
            res().map_err(|e| {
                tracing::error!("{e}");
                rocket::response::status::Custom(rocket::http::Status::InternalServerError, e.to_string())
            })
        }
    };
}
