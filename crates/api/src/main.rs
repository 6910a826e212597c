use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::Context;

use printgate_api::app::{self, services::{InMemoryUserService, RecordingMaintenance}};
use printgate_core::PrincipalKey;
use printgate_infra::config::RuntimeConfig;

/// Comma-separated principals created at startup.
const ENV_SEED_USERS: &str = "PRINTGATE_SEED_USERS";

fn seed_users() -> anyhow::Result<InMemoryUserService> {
    let raw = std::env::var(ENV_SEED_USERS).unwrap_or_else(|_| "admin".to_string());
    let keys = raw
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(PrincipalKey::new)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid {ENV_SEED_USERS}"))?;
    Ok(InMemoryUserService::with_users(keys))
}

fn main() -> anyhow::Result<()> {
    printgate_observability::init();

    let config = RuntimeConfig::from_env().context("loading configuration")?;
    let app = app::build_app_with(
        &config,
        Arc::new(seed_users()?),
        Arc::new(RecordingMaintenance::new()),
    )?;

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line.context("reading request")?;
        if line.trim().is_empty() {
            continue;
        }
        let result = app.handle_line(&line);
        serde_json::to_writer(&mut stdout, &result)?;
        stdout.write_all(b"\n")?;
        stdout.flush()?;
    }

    tracing::info!("input closed, shutting down");
    app.shutdown();
    Ok(())
}
