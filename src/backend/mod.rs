pub mod aws;
pub mod google;
pub mod local;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use clap::ValueEnum;

use crate::errors::TutorboxError;
use crate::settings::Settings;
use crate::tutorial::Tutorial;

pub use local::LocalRuntime;

/// Result of a successful deploy.
#[derive(Debug, Clone)]
pub struct Deployment {
    /// Reachable URL of the tutorial, when the backend has one.
    pub endpoint: Option<String>,
}

/// One running instance, as reported by a backend.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InstanceInfo {
    pub id: String,
    pub name: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Run detached and probe readiness instead of attaching stdio
    /// (local backends only; cloud deploys are always headless).
    pub headless: bool,
}

/// Contract every provisioning strategy implements.
///
/// `deploy` and `stop` are required; `instances` is optional and
/// defaults to a NotImplemented error.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deploy(
        &self,
        tutorial: &Tutorial,
        envars: &BTreeMap<String, String>,
        options: &DeployOptions,
    ) -> Result<Deployment>;

    async fn stop(&self, tutorial: &Tutorial) -> Result<()>;

    async fn instances(&self) -> Result<Vec<InstanceInfo>> {
        Err(TutorboxError::NotImplemented {
            backend: self.name(),
            operation: "instances",
        }
        .into())
    }
}

/// The fixed set of provisioning strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Docker,
    Podman,
    Aws,
    Google,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Docker => "docker",
            BackendKind::Podman => "podman",
            BackendKind::Aws => "aws",
            BackendKind::Google => "google",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "docker" => Some(BackendKind::Docker),
            "podman" => Some(BackendKind::Podman),
            "aws" => Some(BackendKind::Aws),
            "google" | "gcp" => Some(BackendKind::Google),
            _ => None,
        }
    }
}

/// Build the selected backend.
///
/// `user` is the invoking system user, threaded through explicitly from
/// the process environment at startup; it namespaces every cloud
/// resource name.
pub async fn get_backend(
    kind: BackendKind,
    settings: &Settings,
    user: &str,
) -> Result<Box<dyn Backend>> {
    let enabled = settings.enabled_backends();
    if !enabled.is_empty() && !enabled.iter().any(|b| b == kind.as_str()) {
        anyhow::bail!(
            "backend {} is not enabled in settings (enabled: {})",
            kind.as_str(),
            enabled.join(", ")
        );
    }

    match kind {
        BackendKind::Docker => Ok(Box::new(LocalRuntime::new("docker", settings, user)?)),
        BackendKind::Podman => Ok(Box::new(LocalRuntime::new("podman", settings, user)?)),
        BackendKind::Aws => Ok(Box::new(aws::AwsBackend::connect(settings, user).await?)),
        BackendKind::Google => Ok(Box::new(
            google::GoogleBackend::connect(settings, user).await?,
        )),
    }
}

/// A delete that answers "no such resource" has reached the target
/// state. Covers the EC2 error classes (`InvalidGroup.NotFound`,
/// `NatGatewayNotFound`, `Gateway.NotAttached`, ...) and the gcloud
/// error text.
pub fn is_already_gone(error: &anyhow::Error) -> bool {
    let text = error.to_string();
    if text.contains("NotFound") || text.contains("NotAttached") {
        return true;
    }
    let lower = text.to_lowercase();
    lower.contains("not found") || lower.contains("does not exist")
}

/// Resolve the invoking user from the process environment.
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "tutorbox".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_gone_recognizes_provider_errors() {
        for text in [
            "An error occurred (InvalidGroup.NotFound) when calling DeleteSecurityGroup",
            "An error occurred (NatGatewayNotFound) when calling DeleteNatGateway",
            "An error occurred (Gateway.NotAttached) when calling DetachInternetGateway",
            "The resource 'projects/p/global/networks/x' was not found",
            "The security group 'sg-1' does not exist",
        ] {
            assert!(is_already_gone(&anyhow::anyhow!("{}", text)), "{}", text);
        }
    }

    #[test]
    fn test_transient_errors_are_not_already_gone() {
        for text in [
            "An error occurred (RequestLimitExceeded) when calling DeleteVpc",
            "An error occurred (DependencyViolation) when calling DeleteSubnet",
            "connection reset by peer",
        ] {
            assert!(!is_already_gone(&anyhow::anyhow!("{}", text)), "{}", text);
        }
    }
}
