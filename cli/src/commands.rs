//! Subcommand implementations.
//!
//! Each command returns `Ok(true)` on success, `Ok(false)` when it ran but
//! the outcome is a failure (a provider that did not verify, a mock run
//! that was not clean) and `Err` when it could not run at all.

use anyhow::{Context, Result};
use pact_engine::{
    BrokerClient, BrokerConfig, ConsumerVersionSelector, ContractDocument, MockServer,
    MockServerConfig, PublishOptions, ResultOptions, StateHandlers, VerificationReport, Verifier,
    VerifierConfig,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::shutdown::wait_for_signal;

/// Arguments of the `verify` command.
#[derive(Debug)]
pub struct VerifyArgs {
    pub provider_base_url: String,
    pub files: Vec<PathBuf>,
    pub states: Vec<String>,
    pub selectors: Vec<ConsumerVersionSelector>,
    pub publish_results: bool,
}

pub async fn publish(dir: &Path, tags: Vec<String>) -> Result<bool> {
    let config = BrokerConfig::from_env().context("loading broker settings")?;
    let client = BrokerClient::from_config(&config)?;

    let options = publish_options(&config, tags);
    let published = client
        .publish_directory(dir, &options)
        .await
        .with_context(|| format!("publishing contracts from {}", dir.display()))?;

    for path in &published {
        println!("published {}", path.display());
    }
    Ok(true)
}

/// Tags applied when the command line names none.
pub const DEFAULT_TAGS: [&str; 2] = ["main", "latest"];

/// Publish options for `config`, restricted to its consumer when one is set.
fn publish_options(config: &BrokerConfig, tags: Vec<String>) -> PublishOptions {
    let tags = if tags.is_empty() {
        DEFAULT_TAGS.iter().map(ToString::to_string).collect()
    } else {
        tags
    };
    let options = tags.into_iter().fold(
        PublishOptions::new(&config.consumer_version).with_branch(&config.branch),
        PublishOptions::with_tag,
    );
    match &config.consumer_name {
        Some(consumer) => options.with_consumer(consumer),
        None => options,
    }
}

/// Handlers that accept each named state and only log it.
fn logging_handlers(states: &[String]) -> StateHandlers {
    states.iter().fold(StateHandlers::new(), |handlers, state| {
        let name = state.clone();
        handlers.with_handler(state.as_str(), move || {
            info!(state = %name, "Setting up provider state");
            async { Ok(()) }
        })
    })
}

pub async fn verify(args: VerifyArgs) -> Result<bool> {
    let verifier = Verifier::new(&VerifierConfig::from_env()?)?;
    let stop = verifier.stop_signal();
    let watcher = tokio::spawn(async move {
        wait_for_signal().await;
        stop.request_stop();
    });

    let handlers = logging_handlers(&args.states);
    let outcome = if args.files.is_empty() {
        verify_from_broker(&verifier, &args, &handlers).await
    } else {
        verify_files(&verifier, &args, &handlers).await
    };
    watcher.abort();
    outcome
}

async fn verify_files(
    verifier: &Verifier,
    args: &VerifyArgs,
    handlers: &StateHandlers,
) -> Result<bool> {
    let mut all_passed = true;
    for file in &args.files {
        let document = ContractDocument::load(file)
            .with_context(|| format!("loading {}", file.display()))?;
        let report = verifier
            .verify(&document, &args.provider_base_url, handlers)
            .await?;
        print_report(&report)?;
        all_passed &= report.passed();
    }
    if args.publish_results {
        warn!("Results for local files are not published; fetch from the broker to publish");
    }
    Ok(all_passed)
}

async fn verify_from_broker(
    verifier: &Verifier,
    args: &VerifyArgs,
    handlers: &StateHandlers,
) -> Result<bool> {
    let config = BrokerConfig::from_env().context("loading broker settings")?;
    let provider = config
        .provider_name
        .clone()
        .context("PROVIDER_NAME must be set to fetch contracts from the broker")?;
    let client = BrokerClient::from_config(&config)?;

    let contracts = client
        .fetch_for_verification(&provider, &args.selectors, Some(&config.branch))
        .await?;
    if contracts.is_empty() {
        warn!(%provider, "Broker returned no contracts to verify");
    }

    let publish = args.publish_results || config.publish_results;
    let options = ResultOptions::new(&config.provider_version).with_branch(&config.branch);
    let mut all_passed = true;
    for contract in &contracts {
        let report = verifier
            .verify(&contract.document, &args.provider_base_url, handlers)
            .await?;
        print_report(&report)?;
        all_passed &= report.passed();

        if publish {
            if let Err(e) = client.publish_results_for(contract, &report, &options).await {
                warn!(url = %contract.url, error = %e, "Failed to publish verification results");
            }
        }
    }
    Ok(all_passed)
}

fn print_report(report: &VerificationReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

pub async fn mock(file: &Path, bind: SocketAddr) -> Result<bool> {
    let document =
        ContractDocument::load(file).with_context(|| format!("loading {}", file.display()))?;
    let handle = MockServer::new(document.interactions)
        .with_config(MockServerConfig::default().with_bind_addr(bind))
        .start()
        .await?;
    println!("mock provider listening on {}", handle.url());

    wait_for_signal().await;

    let summary = handle.stop().await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(summary.is_clean())
}
