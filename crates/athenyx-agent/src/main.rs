//! Athenyx — research-assistant analysis driver.
//! Entry point for the agent binary: submits one document-analysis job and
//! drives it to a terminal state, printing progress and advisories.

mod config;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use athenyx_analysis::{
    AnalysisEvent, AnalysisRequest, HttpAnalysisApi, JobOrchestrator, OrchestratorState,
};
use athenyx_common::TokenStore;
use athenyx_gateway::RequestGateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("athenyx=debug,info")),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Athenyx analysis driver starting up");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let document_id = std::env::args()
        .nth(1)
        .context("usage: athenyx <document-id>")?;

    let config = config::Config::load()?;
    info!(server = %config.server.base_url, "Configuration loaded");

    let token = std::env::var("ATHENYX_API_TOKEN")
        .context("ATHENYX_API_TOKEN is not set; sign in and export the token")?;
    let tokens = TokenStore::with_token(token);

    let gateway = RequestGateway::new(config.gateway_config(), tokens);
    let api = HttpAnalysisApi::new(gateway);
    let mut orchestrator = JobOrchestrator::new(api, config.orchestrator_config());

    // Stream progress and advisories while the job runs.
    let mut events = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                AnalysisEvent::Progress { progress, .. } => info!(progress, "Analysis progress"),
                AnalysisEvent::ConnectivityDegraded { consecutive_failures, .. } => warn!(
                    consecutive_failures,
                    "Connectivity degraded; polling continues"
                ),
                AnalysisEvent::PartialResult { terminal, .. } => {
                    warn!(terminal, "Partial result stored")
                }
                other => info!(event = ?other, "Orchestrator event"),
            }
        }
    });

    // Ctrl+C cancels the in-flight call and stops the cadence.
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling the analysis job");
            cancel.cancel();
        }
    });

    orchestrator
        .submit(AnalysisRequest::new(document_id))
        .await?;
    let state = orchestrator.run().await;
    printer.abort();

    match state {
        OrchestratorState::Completed => {
            let handle = orchestrator.handle().expect("completed without a handle");
            if handle.partial {
                warn!("Analysis finished with a partial result");
            }
            println!(
                "{}",
                serde_json::to_string_pretty(handle.result.as_ref().unwrap_or(&serde_json::Value::Null))?
            );
            Ok(())
        }
        OrchestratorState::Cancelled => {
            warn!("Analysis cancelled");
            Ok(())
        }
        other => anyhow::bail!(
            "analysis ended in {:?}: {}",
            other,
            orchestrator.last_error().unwrap_or("no detail")
        ),
    }
}
