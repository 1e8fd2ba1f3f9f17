use std::{net::SocketAddr, path::Path};

use anyhow::Context;
use session::StateWatch;
use shared::domain::ServerState;
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

/// Starts the stimulus application with the address it must connect to.
pub fn spawn_stimulus(exe: &Path, addr: SocketAddr) -> anyhow::Result<Child> {
    let child = Command::new(exe)
        .arg(addr.ip().to_string())
        .arg(addr.port().to_string())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to launch stimulus app '{}'", exe.display()))?;
    info!(exe = %exe.display(), %addr, pid = ?child.id(), "stimulus app launched");
    Ok(child)
}

/// Waits for the session server to come up, launches the stimulus app and
/// waits for it to exit.
pub async fn supervise(exe: &Path, addr: SocketAddr, mut server: StateWatch<ServerState>) {
    if server
        .wait_until(|state| *state == ServerState::Up)
        .await
        .is_err()
    {
        warn!("session ended before the server came up, stimulus app not launched");
        return;
    }

    let mut child = match spawn_stimulus(exe, addr) {
        Ok(child) => child,
        Err(error) => {
            error!(%error, "stimulus app not started");
            return;
        }
    };
    match child.wait().await {
        Ok(status) => info!(%status, "stimulus app exited"),
        Err(error) => error!(%error, "failed to wait for the stimulus app"),
    }
}
