mod arg_parse;

use anyhow::Context;
use arg_parse::Args;
use clap::Parser;
use mpdsync_core::endpoint::Endpoint;
use mpdsync_core::supervisor::Supervisor;
use mpdsync_core::Error;
use std::sync::atomic::Ordering;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CONFIGURATION_EXIT_CODE: i32 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(shell) = args.completions {
        Args::print_completions(shell);
        return Ok(());
    }

    init_logging(args.verbosity());

    if let Err(error) = run(args).await {
        if let Some(Error::Configuration(_)) = error.downcast_ref::<Error>() {
            eprintln!("{error:#}");
            std::process::exit(CONFIGURATION_EXIT_CODE);
        }
        return Err(error);
    }

    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let leader = Endpoint::parse(&args.leader, args.password.clone())
        .context("invalid leader address")?;
    let followers = args
        .followers
        .iter()
        .map(|text| Endpoint::parse(text, args.password.clone()))
        .collect::<Result<Vec<_>, _>>()
        .context("invalid follower address")?;

    let supervisor = Supervisor::connect(&leader, &followers, args.drift).await?;

    let stop = supervisor.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received interrupt, shutting down");
            stop.store(true, Ordering::Relaxed);
        }
    });

    supervisor.run().await?;
    Ok(())
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
