use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::types::Tutorials;

/// A tutorial repository: GitHub org/repo serving tutorial metadata
/// from its GitHub Pages site.
#[derive(Debug, Clone)]
pub struct Repository {
    pub username: String,
    pub name: String,
    pub tutorials: Tutorials,
}

impl Repository {
    /// Parse an org/repo reference, with or without a github.com prefix.
    pub fn parse(uri: &str) -> Result<(String, String)> {
        let stripped = uri
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("github.com")
            .trim_matches('/');
        let mut parts = stripped.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(username), Some(name), None) if !username.is_empty() && !name.is_empty() => {
                Ok((username.to_string(), name.to_string()))
            }
            _ => anyhow::bail!(
                "repository uri {} does not parse, expected org/repo or https://github.com/org/repo",
                uri
            ),
        }
    }

    /// Fetch and validate tutorial metadata for a repository.
    ///
    /// Invalid tutorial entries are skipped with a warning rather than
    /// failing the whole set.
    pub async fn load(uri: &str) -> Result<Self> {
        let (username, name) = Repository::parse(uri)?;
        let url = format!("https://{}.github.io/{}/api/tutorials.json", username, name);
        debug!(url = %url, "fetching tutorial metadata");

        let response = reqwest::get(&url)
            .await
            .with_context(|| format!("fetching tutorial metadata from {}", url))?;
        if !response.status().is_success() {
            anyhow::bail!(
                "repository {} does not have valid tutorial metadata ({} from {})",
                uri,
                response.status(),
                url
            );
        }
        let metadata: serde_json::Map<String, serde_json::Value> = response
            .json()
            .await
            .context("parsing tutorial metadata as JSON")?;

        let mut tutorials = Tutorials::new();
        for (tutorial_name, value) in metadata {
            if value.get("tutorial").is_none() {
                warn!(tutorial = %tutorial_name, "entry is missing tutorial block, skipping");
                continue;
            }
            tutorials.add(&tutorial_name, value);
        }

        Ok(Repository {
            username,
            name,
            tutorials,
        })
    }
}
