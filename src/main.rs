use clap::Parser; // for cli
use marketplace_gateway::config::Args;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // parse cli arguments
    let args = Args::parse();

    if let Err(e) = marketplace_gateway::run(args).await {
        error!("Server failed: {e}");
        std::process::exit(1);
    }
}
