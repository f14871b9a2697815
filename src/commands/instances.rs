use anyhow::Result;

use super::common::build_backend;
use crate::cli::InstancesArgs;
use crate::settings::Settings;

pub async fn cmd_instances(args: InstancesArgs, settings: &Settings, user: &str) -> Result<()> {
    let backend = build_backend(args.backend, settings, user).await?;
    let instances = backend.instances().await?;
    println!("{}", serde_json::to_string_pretty(&instances)?);
    Ok(())
}
