//! `pact` - publish, verify and mock consumer contracts.
//!
//! Broker settings come from the environment (`PACT_BROKER_BASE_URL`,
//! `PACT_BROKER_TOKEN`, `CONSUMER_VERSION`, `PROVIDER_VERSION`,
//! `GIT_BRANCH`, ...), optionally loaded from a `.env` file.

mod commands;
mod shutdown;

use clap::{Parser, Subcommand, ValueEnum};
use pact_engine::ConsumerVersionSelector;
use rust_common::{TracingConfig, init_tracing};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "pact")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Consumer-driven contract testing: publish, verify and mock contracts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Publish every contract file in a directory to the broker
    Publish {
        /// Directory holding contract files
        #[arg(default_value = pact_engine::consumer::DEFAULT_OUTPUT_DIR)]
        dir: PathBuf,
        /// Tag to apply to the consumer version (repeatable, defaults to main and latest)
        #[arg(short, long)]
        tag: Vec<String>,
    },
    /// Verify a provider against local contract files or the broker
    Verify {
        /// Base URL of the running provider
        #[arg(long, env = "PROVIDER_BASE_URL")]
        provider_base_url: String,
        /// Local contract files; when omitted, contracts are fetched from the broker
        files: Vec<PathBuf>,
        /// Provider state to accept with a logging no-op handler (repeatable)
        #[arg(long = "state")]
        states: Vec<String>,
        /// Consumer versions to verify when fetching from the broker (repeatable)
        #[arg(long = "selector", value_enum)]
        selectors: Vec<SelectorArg>,
        /// Publish verification results back to the broker
        #[arg(long)]
        publish_results: bool,
    },
    /// Serve a contract file as a mock provider until interrupted
    Mock {
        /// Contract file to serve
        file: PathBuf,
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },
}

/// Broker consumer version selectors expressible on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SelectorArg {
    /// Latest version on the consumer's main branch
    MainBranch,
    /// Versions currently deployed or released
    DeployedOrReleased,
}

impl SelectorArg {
    fn to_selector(self) -> ConsumerVersionSelector {
        match self {
            Self::MainBranch => ConsumerVersionSelector::main_branch(),
            Self::DeployedOrReleased => ConsumerVersionSelector::deployed_or_released(),
        }
    }
}

fn selectors_or_default(args: &[SelectorArg]) -> Vec<ConsumerVersionSelector> {
    if args.is_empty() {
        return vec![
            ConsumerVersionSelector::main_branch(),
            ConsumerVersionSelector::deployed_or_released(),
        ];
    }
    args.iter().map(|a| a.to_selector()).collect()
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut tracing_config = TracingConfig::default()
        .with_service_name("pact-cli")
        .with_log_level(&cli.log_level);
    if cli.json_logs {
        tracing_config = tracing_config.with_json_output();
    }
    init_tracing(&tracing_config);

    let outcome = match cli.command {
        Commands::Publish { dir, tag } => commands::publish(&dir, tag).await,
        Commands::Verify {
            provider_base_url,
            files,
            states,
            selectors,
            publish_results,
        } => {
            commands::verify(commands::VerifyArgs {
                provider_base_url,
                files,
                states,
                selectors: selectors_or_default(&selectors),
                publish_results,
            })
            .await
        }
        Commands::Mock { file, bind } => commands::mock(&file, bind).await,
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("Command failed: {e:#}");
            ExitCode::from(2)
        }
    }
}
