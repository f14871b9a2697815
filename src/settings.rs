//! Per-backend defaults, loaded from a YAML settings file.
//!
//! The settings document is a nested key-value tree with dotted-path
//! get/set, so `--config aws.region=us-east-2` can override a value
//! for a single invocation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_yaml_ng::Value;
use tracing::debug;

use crate::readiness::ProbeConfig;

const DEFAULT_SETTINGS: &str = r#"
default_backend: docker
backends:
  - docker
  - podman
  - aws
  - google
aws:
  region: us-east-1
  zone: a
  instance: t2.large
google:
  zone: us-central1-a
  instance: n1-standard-2
readiness:
  initial_delay_ms: 2000
  max_attempts: 60
"#;

#[derive(Debug, Clone)]
pub struct Settings {
    doc: Value,
}

impl Default for Settings {
    fn default() -> Self {
        // The embedded defaults are valid YAML
        let doc = serde_yaml_ng::from_str(DEFAULT_SETTINGS).unwrap_or(Value::Null);
        Settings { doc }
    }
}

impl Settings {
    /// Load settings from an explicit file, the user settings file, or
    /// fall back to embedded defaults.
    pub fn load(settings_file: Option<&Path>) -> Result<Self> {
        let path = match settings_file {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let user_file = Settings::user_settings_file();
                user_file.filter(|p| p.exists())
            }
        };

        let Some(path) = path else {
            debug!("no settings file found, using defaults");
            return Ok(Settings::default());
        };

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        let doc: Value = serde_yaml_ng::from_str(&raw)
            .with_context(|| format!("parsing settings file {}", path.display()))?;
        debug!(path = %path.display(), "loaded settings");
        Ok(Settings { doc })
    }

    /// Default location of the user settings file (~/.tutorbox/settings.yml).
    pub fn user_settings_file() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".tutorbox").join("settings.yml"))
    }

    /// Look up a value by dotted path, e.g. "aws.region".
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.doc;
        for key in path.split('.') {
            current = current.get(key)?;
        }
        Some(current)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(|v| v.as_u64())
    }

    /// Set a value by dotted path, creating intermediate mappings.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        let keys: Vec<&str> = path.split('.').collect();
        anyhow::ensure!(!keys.is_empty(), "empty settings path");

        if !self.doc.is_mapping() {
            self.doc = Value::Mapping(Default::default());
        }
        let mut current = &mut self.doc;
        for key in &keys[..keys.len() - 1] {
            let mapping = current
                .as_mapping_mut()
                .with_context(|| format!("settings path {} does not traverse a mapping", path))?;
            let entry_key = Value::String(key.to_string());
            current = mapping
                .entry(entry_key)
                .or_insert_with(|| Value::Mapping(Default::default()));
        }
        let mapping = current
            .as_mapping_mut()
            .with_context(|| format!("settings path {} does not traverse a mapping", path))?;
        mapping.insert(Value::String(keys[keys.len() - 1].to_string()), value);
        Ok(())
    }

    /// Apply `key=value` overrides from the command line.
    pub fn update_params(&mut self, params: &[String]) -> Result<()> {
        for param in params {
            let (key, value) = param
                .split_once('=')
                .with_context(|| format!("config override {} is missing '='", param))?;
            self.set(key.trim(), Value::String(value.trim().to_string()))?;
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating settings directory {}", parent.display()))?;
        }
        let raw = serde_yaml_ng::to_string(&self.doc).context("serializing settings")?;
        std::fs::write(path, raw)
            .with_context(|| format!("writing settings file {}", path.display()))?;
        Ok(())
    }

    pub fn default_backend(&self) -> &str {
        self.get_str("default_backend").unwrap_or("docker")
    }

    /// Backends enabled in this installation.
    pub fn enabled_backends(&self) -> Vec<String> {
        self.get("backends")
            .and_then(|v| v.as_sequence())
            .map(|seq| {
                seq.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn aws_region(&self) -> String {
        self.get_str("aws.region").unwrap_or("us-east-1").to_string()
    }

    pub fn aws_zone(&self) -> String {
        self.get_str("aws.zone").unwrap_or("a").to_string()
    }

    pub fn aws_instance(&self) -> String {
        self.get_str("aws.instance").unwrap_or("t2.large").to_string()
    }

    pub fn google_zone(&self) -> String {
        self.get_str("google.zone")
            .unwrap_or("us-central1-a")
            .to_string()
    }

    pub fn google_project(&self) -> Option<String> {
        self.get_str("google.project").map(str::to_string)
    }

    pub fn google_instance(&self) -> String {
        self.get_str("google.instance")
            .unwrap_or("n1-standard-2")
            .to_string()
    }

    pub fn probe_config(&self) -> ProbeConfig {
        let mut config = ProbeConfig::default();
        if let Some(ms) = self.get_u64("readiness.initial_delay_ms") {
            config.initial_delay = Duration::from_millis(ms);
        }
        if let Some(attempts) = self.get_u64("readiness.max_attempts") {
            config.max_attempts = if attempts == 0 {
                None
            } else {
                Some(attempts as u32)
            };
        }
        config
    }
}
