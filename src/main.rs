use clap::Parser;
use tracing_subscriber::EnvFilter;

use cardharvest::config::{self, Cli};
use cardharvest::context::OpContext;
use cardharvest::orchestrator::Orchestrator;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log);

    let config = match config::parse_config(cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };

    let orchestrator = match Orchestrator::build(&config).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize");
            std::process::exit(2);
        }
    };

    let ctx = OpContext::new();
    let outcome = orchestrator.run(&ctx, config).await;
    std::process::exit(outcome.exit_code());
}

/// `RUST_LOG` overrides `--log` when set, matching the `tracing-subscriber`
/// convention every other crate in this ecosystem follows.
fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}
