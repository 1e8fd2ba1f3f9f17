use std::sync::Arc;

use anyhow::Context;
use session::{RunStateHandle, TcpTransport};
use speller_server::{host::ConsoleHost, launcher, load_settings, Backends, SpellerApp};
use tokio::io::BufReader;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings().context("failed to load settings")?;
    let addr = settings.bind_addr()?;

    let run_state = RunStateHandle::new();
    let transport = Arc::new(TcpTransport::new(addr));
    let app = SpellerApp::build(
        &settings,
        transport,
        Arc::new(run_state.clone()),
        Backends::default(),
    )
    .context("invalid settings")?;

    let stimulus = settings.connection.stimulus_exe.clone().map(|exe| {
        let server = app.controller.server_state();
        tokio::spawn(async move { launcher::supervise(&exe, addr, server).await })
    });
    if stimulus.is_none() {
        info!(%addr, "no stimulus executable configured, waiting for an external client");
    }

    info!("type play, pause, resume or stop");
    let console_task = tokio::spawn(
        ConsoleHost::new(run_state).attach(
            BufReader::new(tokio::io::stdin()),
            app.orchestrator.phase(),
        ),
    );

    let outcome = app.run().await.context("session setup failed")?;
    console_task.abort();

    if let Some(error) = &outcome.aborted {
        error!(%error, "session aborted");
    }
    info!(
        session_id = %outcome.record.session_id,
        trials = outcome.record.trials.len(),
        selections = outcome.record.selections.len(),
        "session finished"
    );

    if let Some(stimulus) = stimulus {
        if let Err(error) = stimulus.await {
            warn!(%error, "stimulus supervisor task failed");
        }
    }
    Ok(())
}
