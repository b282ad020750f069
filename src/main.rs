use color_eyre::Result;
use tracing_subscriber::prelude::*;

use crate::{config::Config, state::State};

#[macro_use]
extern crate tracing;

pub mod builtins;
pub mod cmd;
pub mod config;
pub mod history;
pub mod input;
pub mod jobs;
pub mod parse;
pub mod prelude;
pub mod process;
pub mod state;

pub const NAME: &str = env!("CARGO_PKG_NAME");

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    color_eyre::install()?;

    let config = Config::load()?;

    std::fs::create_dir_all(&config.log_dir)?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(
        &config.log_dir,
        "minish.log",
    ));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_error::ErrorLayer::default())
        .init();

    debug!(?config, "starting");

    let mut state = State::new(config)?;
    let code = state.run().await?;

    debug!(code, "exiting");
    drop(state);
    drop(guard);

    // a read may still be parked on the blocking pool
    std::process::exit(code);
}
