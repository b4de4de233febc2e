mod cli;

use clap::Parser;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = cli.into_config();

    if let Err(err) = parallite_daemon::supervisor::run(config).await {
        tracing::error!("fatal: {err:#}");
        std::process::exit(1);
    }

    Ok(())
}
