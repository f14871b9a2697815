//! Local container runtime backend (docker or podman).
//!
//! The simplest backend: no remote state, the container name is the
//! tutorial uid so stop can always find what deploy started.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::backend::{Backend, DeployOptions, Deployment, InstanceInfo};
use crate::readiness::{self, ProbeConfig};
use crate::retry::TokioSleeper;
use crate::settings::Settings;
use crate::startup::masked;
use crate::tutorial::Tutorial;

pub struct LocalRuntime {
    program: PathBuf,
    name: &'static str,
    user: String,
    probe_config: ProbeConfig,
}

impl LocalRuntime {
    pub fn new(program: &'static str, settings: &Settings, user: &str) -> Result<Self> {
        let program_path = find_program(program).with_context(|| {
            format!("the executable '{}' is not available on this system", program)
        })?;
        Ok(LocalRuntime {
            program: program_path,
            name: program,
            user: user.to_string(),
            probe_config: settings.probe_config(),
        })
    }

    fn run_args(
        &self,
        tutorial: &Tutorial,
        envars: &BTreeMap<String, String>,
        headless: bool,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec!["run".into()];
        if headless {
            args.push("-d".into());
        } else {
            args.push("-it".into());
        }
        args.push("--rm".into());
        args.push("--name".into());
        args.push(tutorial.uid(&self.user));
        for portset in tutorial.container_ports() {
            args.push("-p".into());
            args.push(portset.clone());
        }
        for (key, value) in envars {
            args.push("--env".into());
            args.push(format!("{}={}", key, value));
        }
        args.push(tutorial.container_image().to_string());
        args
    }
}

#[async_trait]
impl Backend for LocalRuntime {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn deploy(
        &self,
        tutorial: &Tutorial,
        envars: &BTreeMap<String, String>,
        options: &DeployOptions,
    ) -> Result<Deployment> {
        // Always pull first; a bad image should fail before we run anything
        let status = Command::new(&self.program)
            .args(["pull", tutorial.container_image()])
            .status()
            .await
            .with_context(|| format!("running {} pull", self.name))?;
        if !status.success() {
            anyhow::bail!(
                "issue pulling container, return code {}",
                status.code().unwrap_or(-1)
            );
        }

        let args = self.run_args(tutorial, envars, options.headless);
        info!(
            command = %masked(&format!("{} {}", self.name, args.join(" ")), envars),
            "starting container"
        );

        if options.headless {
            let output = Command::new(&self.program)
                .args(&args)
                .output()
                .await
                .with_context(|| format!("running {} run", self.name))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                anyhow::bail!("container failed to start: {}", stderr.trim());
            }
            debug!(
                container = %String::from_utf8_lossy(&output.stdout).trim(),
                "container started detached"
            );

            let url = tutorial.endpoint_url("127.0.0.1");
            readiness::wait_until_ready(&url, self.probe_config, &TokioSleeper).await?;
            Ok(Deployment {
                endpoint: Some(url),
            })
        } else {
            // Attached: hand the terminal to the container until it exits
            let status = Command::new(&self.program)
                .args(&args)
                .status()
                .await
                .with_context(|| format!("running {} run", self.name))?;
            if !status.success() {
                anyhow::bail!(
                    "container exited with return code {}",
                    status.code().unwrap_or(-1)
                );
            }
            Ok(Deployment { endpoint: None })
        }
    }

    async fn stop(&self, tutorial: &Tutorial) -> Result<()> {
        let name = tutorial.uid(&self.user);
        info!(container = %name, "stopping container");
        let output = Command::new(&self.program)
            .args(["stop", &name])
            .output()
            .await
            .with_context(|| format!("running {} stop", self.name))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Already gone is the target state, not an error
            if stderr.to_lowercase().contains("no such container") {
                info!(container = %name, "container was not running");
                return Ok(());
            }
            anyhow::bail!("failed to stop container {}: {}", name, stderr.trim());
        }
        Ok(())
    }

    async fn instances(&self) -> Result<Vec<InstanceInfo>> {
        let output = Command::new(&self.program)
            .args(["ps", "--format", "{{.ID}}|{{.Names}}|{{.Status}}"])
            .output()
            .await
            .with_context(|| format!("running {} ps", self.name))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("failed to list containers: {}", stderr.trim());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut instances = Vec::new();
        for line in stdout.lines() {
            let mut fields = line.splitn(3, '|');
            let (Some(id), Some(name), Some(status)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            instances.push(InstanceInfo {
                id: id.to_string(),
                name: Some(name.to_string()),
                status: status.to_string(),
                created_at: None,
            });
        }
        Ok(instances)
    }
}

fn find_program(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tutorial() -> Tutorial {
        Tutorial::from_value(
            "flux",
            serde_json::json!({
                "tutorial": {
                    "title": "Flux Tutorial: Intro",
                    "container": {
                        "name": "ghcr.io/rse-ops/flux-tutorial:latest",
                        "ports": ["8080:80", "8443:443"],
                        "expose": 443,
                        "https": true
                    },
                    "project": {"github": "rse-ops/flux-tutorials"},
                    "notebooks": []
                }
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_run_args_attached() {
        let runtime = LocalRuntime {
            program: PathBuf::from("docker"),
            name: "docker",
            user: "dinosaur".to_string(),
            probe_config: ProbeConfig::default(),
        };
        let args = runtime.run_args(&tutorial(), &BTreeMap::new(), false);
        assert_eq!(args[0], "run");
        assert!(args.contains(&"-it".to_string()));
        assert!(args.contains(&"dinosaurflux-tutorial-intro".to_string()));
        assert!(args.contains(&"8080:80".to_string()));
        assert_eq!(args.last().unwrap(), "ghcr.io/rse-ops/flux-tutorial:latest");
    }

    #[test]
    fn test_run_args_headless_with_env() {
        let runtime = LocalRuntime {
            program: PathBuf::from("podman"),
            name: "podman",
            user: "dinosaur".to_string(),
            probe_config: ProbeConfig::default(),
        };
        let mut envars = BTreeMap::new();
        envars.insert("TOKEN".to_string(), "secret".to_string());
        let args = runtime.run_args(&tutorial(), &envars, true);
        assert!(args.contains(&"-d".to_string()));
        assert!(!args.contains(&"-it".to_string()));
        assert!(args.contains(&"TOKEN=secret".to_string()));
    }

    #[test]
    fn test_find_program_misses_fake() {
        assert!(find_program("definitely-not-a-real-program-xyz").is_none());
    }
}
