use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use super::common::{build_backend, load_tutorial, parse_envars};
use crate::backend::DeployOptions;
use crate::cli::TestArgs;
use crate::settings::Settings;

/// Deploy headless, check the endpoint answers with the expected
/// status, then tear everything down again. Meant for CI.
pub async fn cmd_test(args: TestArgs, settings: &Settings, user: &str) -> Result<()> {
    let envars = parse_envars(&args.env)?;
    let tutorial = load_tutorial(&args.tutorial.repo, &args.tutorial.tutorial).await?;
    tutorial.check_envars(&envars)?;

    let backend = build_backend(args.tutorial.backend, settings, user).await?;
    info!(tutorial = %tutorial.name, backend = backend.name(), "test deploy");

    let options = DeployOptions { headless: true };
    let deployment = backend.deploy(&tutorial, &envars, &options).await?;
    let check = match deployment.endpoint {
        Some(url) => check_endpoint(&url, args.sleep_seconds, args.http_code).await,
        None => Err(anyhow::anyhow!("deployment produced no endpoint to test")),
    };

    // Tear down regardless of how the check went
    let stopped = backend.stop(&tutorial).await;
    check?;
    stopped?;
    info!(tutorial = %tutorial.name, "test passed");
    Ok(())
}

async fn check_endpoint(url: &str, sleep_seconds: u64, expected: u16) -> Result<()> {
    if sleep_seconds > 0 {
        info!(seconds = sleep_seconds, "letting the endpoint settle");
        tokio::time::sleep(Duration::from_secs(sleep_seconds)).await;
    }
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .context("building test client")?;
    let status = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("requesting {}", url))?
        .status();
    anyhow::ensure!(
        status.as_u16() == expected,
        "endpoint {} answered {} (expected {})",
        url,
        status,
        expected
    );
    Ok(())
}
