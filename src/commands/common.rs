//! Shared plumbing for the subcommand handlers: resolving the backend,
//! loading the tutorial, and parsing KEY=VALUE environment pairs.

use std::collections::BTreeMap;

use anyhow::{Context, Result};

use crate::backend::{self, Backend, BackendKind};
use crate::settings::Settings;
use crate::tutorial::{Repository, Tutorial};

/// Resolve the backend choice: explicit flag wins, otherwise the
/// settings default.
pub fn resolve_backend(flag: Option<BackendKind>, settings: &Settings) -> Result<BackendKind> {
    if let Some(kind) = flag {
        return Ok(kind);
    }
    let name = settings.default_backend();
    BackendKind::from_name(name)
        .with_context(|| format!("settings default_backend {} is not a known backend", name))
}

pub async fn build_backend(
    flag: Option<BackendKind>,
    settings: &Settings,
    user: &str,
) -> Result<Box<dyn Backend>> {
    let kind = resolve_backend(flag, settings)?;
    backend::get_backend(kind, settings, user).await
}

/// Fetch the repository and pick out one tutorial by name.
pub async fn load_tutorial(repo: &str, name: &str) -> Result<Tutorial> {
    let repository = Repository::load(repo).await?;
    match repository.tutorials.get(name) {
        Some(tutorial) => Ok(tutorial.clone()),
        None => {
            let known: Vec<&str> = repository.tutorials.names().collect();
            anyhow::bail!(
                "tutorial {} not found in {} (known: {})",
                name,
                repo,
                known.join(", ")
            )
        }
    }
}

/// Parse repeated KEY=VALUE pairs; the value may itself contain '='.
pub fn parse_envars(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut envars = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("environment pair {} is not KEY=VALUE", pair))?;
        if key.is_empty() {
            anyhow::bail!("environment pair {} has an empty key", pair);
        }
        envars.insert(key.to_string(), value.to_string());
    }
    Ok(envars)
}
