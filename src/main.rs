//! # projectd
//!
//! Keeps the state of user-generated projects current by consuming lifecycle
//! events from the message bus, and serves that state over HTTP with a live
//! watch stream.
//!
//! ## Initialization Sequence
//!
//! 1. **Configuration** - defaults, TOML file, `PROJECTD_*` variables, CLI flags
//! 2. **Logging** - human-readable in `dev`, JSON lines in `prod`
//! 3. **Service** - see [`app::run`]

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod cli;
mod config;

use cli::Cli;
use config::{Config, Environment};

/// Default filter in `dev` when `RUST_LOG` is unset.
const DEV_FILTER: &str = "info,projectd=debug,projectd_core=debug,projectd_store=debug,\
                          projectd_events=debug,projectd_web=debug,tower_http=debug";
/// Default filter in `prod` when `RUST_LOG` is unset.
const PROD_FILTER: &str = "info";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    config
        .apply_env(std::env::vars())
        .context("invalid PROJECTD_* environment override")?;
    cli.apply_to(&mut config);
    config.validate().context("invalid configuration")?;

    init_tracing(config.env);
    info!(env = ?config.env, bind = %config.server.bind, "projectd starting");

    app::run(config).await
}

/// Initialize the tracing subscriber; `RUST_LOG` overrides the default filter.
fn init_tracing(env: Environment) {
    let default_filter = match env {
        Environment::Dev => DEV_FILTER,
        Environment::Prod => PROD_FILTER,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let json = env == Environment::Prod;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();
}
