//! vcluster-syncer
//!
//! Reconciles a virtual cluster's object store against a packed namespace of
//! a host cluster. See `crate::operator::run` for the wiring entrypoint.

mod config;
mod consts;
mod context;
mod coredns;
mod defaultendpoint;
mod error;
mod framework;
mod lifecycle;
mod metrics;
mod nodeservice;
mod operator;
mod pluginhook;
mod queue;
mod resources;
mod router;
mod servicemapping;
mod watch;

use clap::Parser;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::parse();
    tracing::debug!(?config, "starting with config");

    operator::run(config).await
}
