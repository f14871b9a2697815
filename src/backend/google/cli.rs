//! `GceApi` implementation backed by the gcloud command line tool.
//!
//! Every call shells out to `gcloud compute ... --format json`. A
//! describe of a missing resource is the normal "does not exist"
//! answer, recognized by the error text and mapped to `None`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use super::api::{GceApi, GceInstance, InsertInstanceRequest};

pub struct GcloudCli {
    zone: String,
    region: String,
    project: Option<String>,
}

impl GcloudCli {
    pub fn new(zone: String, project: Option<String>) -> Self {
        let region = region_of(&zone);
        GcloudCli {
            zone,
            region,
            project,
        }
    }

    /// Cheap authenticated call to find out whether credentials work.
    pub async fn probe_auth(&self) -> bool {
        self.compute(&["instances", "list", "--limit", "1"])
            .await
            .is_ok()
    }

    async fn compute(&self, args: &[&str]) -> Result<Value> {
        debug!(args = ?args, "gcloud compute");
        let mut command = Command::new("gcloud");
        command.arg("compute").args(args).args(["--format", "json"]);
        if let Some(project) = &self.project {
            command.args(["--project", project]);
        }
        let output = command
            .output()
            .await
            .context("executing gcloud cli (is it installed?)")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "gcloud compute {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            );
        }
        if output.stdout.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&output.stdout).context("parsing gcloud cli response")
    }

    /// Describe that treats "was not found" as an ordinary answer.
    async fn describe_optional(&self, args: &[&str]) -> Result<Option<Value>> {
        match self.compute(args).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn is_not_found(error: &anyhow::Error) -> bool {
    error.to_string().to_lowercase().contains("not found")
}

/// A zone like `us-central1-a` lives in region `us-central1`.
fn region_of(zone: &str) -> String {
    match zone.rsplit_once('-') {
        Some((region, _)) => region.to_string(),
        None => zone.to_string(),
    }
}

fn parse_instance(item: &Value) -> Option<GceInstance> {
    let name = item.get("name").and_then(|v| v.as_str())?;
    let status = item
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("UNKNOWN");
    let nat_ip = item
        .pointer("/networkInterfaces/0/accessConfigs/0/natIP")
        .and_then(|v| v.as_str())
        .map(String::from);
    let created_at = item
        .get("creationTimestamp")
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&chrono::Utc));
    Some(GceInstance {
        name: name.to_string(),
        status: status.to_string(),
        nat_ip,
        created_at,
    })
}

fn allow_list(ports: &[u16]) -> String {
    ports
        .iter()
        .map(|port| format!("tcp:{}", port))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl GceApi for GcloudCli {
    async fn list_instances(&self) -> Result<Vec<GceInstance>> {
        let response = self.compute(&["instances", "list"]).await?;
        Ok(response
            .as_array()
            .map(|items| items.iter().filter_map(parse_instance).collect())
            .unwrap_or_default())
    }

    async fn get_instance(&self, name: &str) -> Result<Option<GceInstance>> {
        let response = self
            .describe_optional(&["instances", "describe", name, "--zone", &self.zone])
            .await?;
        Ok(response.as_ref().and_then(parse_instance))
    }

    async fn insert_instance(&self, request: &InsertInstanceRequest) -> Result<()> {
        // gcloud parses inline --metadata values at commas, so the
        // startup script has to travel through a file
        let script_file = std::env::temp_dir().join(format!("{}-startup.sh", request.name));
        std::fs::write(&script_file, &request.startup_script)
            .with_context(|| format!("writing startup script {}", script_file.display()))?;
        let metadata = format!("startup-script={}", script_file.display());

        let result = self
            .compute(&[
                "instances",
                "create",
                &request.name,
                "--zone",
                &self.zone,
                "--machine-type",
                &request.machine_type,
                "--network",
                &request.network,
                "--subnet",
                &request.subnet,
                "--image-family",
                "debian-12",
                "--image-project",
                "debian-cloud",
                "--metadata-from-file",
                &metadata,
            ])
            .await;
        let _ = std::fs::remove_file(&script_file);
        result.map(|_| ())
    }

    async fn wait_instance_running(&self, name: &str) -> Result<GceInstance> {
        // gcloud has no wait verb for RUNNING, so this polls
        for _ in 0..60 {
            if let Some(instance) = self.get_instance(name).await? {
                if instance.status == "RUNNING" {
                    return Ok(instance);
                }
                debug!(name = name, status = %instance.status, "instance not running yet");
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        anyhow::bail!("instance {} did not reach RUNNING", name)
    }

    async fn delete_instance(&self, name: &str) -> Result<()> {
        match self
            .compute(&[
                "instances",
                "delete",
                name,
                "--zone",
                &self.zone,
                "--quiet",
            ])
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        let response = self.describe_optional(&["networks", "describe", name]).await?;
        Ok(response.is_some())
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        self.compute(&["networks", "create", name, "--subnet-mode", "custom"])
            .await?;
        Ok(())
    }

    async fn delete_network(&self, name: &str) -> Result<()> {
        match self.compute(&["networks", "delete", name, "--quiet"]).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn subnet_exists(&self, name: &str) -> Result<bool> {
        let response = self
            .describe_optional(&[
                "networks",
                "subnets",
                "describe",
                name,
                "--region",
                &self.region,
            ])
            .await?;
        Ok(response.is_some())
    }

    async fn create_subnet(&self, name: &str, network: &str, range: &str) -> Result<()> {
        self.compute(&[
            "networks",
            "subnets",
            "create",
            name,
            "--network",
            network,
            "--range",
            range,
            "--region",
            &self.region,
        ])
        .await?;
        Ok(())
    }

    async fn delete_subnet(&self, name: &str) -> Result<()> {
        match self
            .compute(&[
                "networks",
                "subnets",
                "delete",
                name,
                "--region",
                &self.region,
                "--quiet",
            ])
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn firewall_exists(&self, name: &str) -> Result<bool> {
        let response = self
            .describe_optional(&["firewall-rules", "describe", name])
            .await?;
        Ok(response.is_some())
    }

    async fn create_ingress_firewall(
        &self,
        name: &str,
        network: &str,
        ports: &[u16],
    ) -> Result<()> {
        let allow = allow_list(ports);
        self.compute(&[
            "firewall-rules",
            "create",
            name,
            "--network",
            network,
            "--direction",
            "INGRESS",
            "--allow",
            &allow,
            "--source-ranges",
            "0.0.0.0/0",
        ])
        .await?;
        Ok(())
    }

    async fn create_egress_firewall(&self, name: &str, network: &str, ports: &[u16]) -> Result<()> {
        let allow = allow_list(ports);
        self.compute(&[
            "firewall-rules",
            "create",
            name,
            "--network",
            network,
            "--direction",
            "EGRESS",
            "--allow",
            &allow,
            "--destination-ranges",
            "0.0.0.0/0",
        ])
        .await?;
        Ok(())
    }

    async fn delete_firewall(&self, name: &str) -> Result<()> {
        match self
            .compute(&["firewall-rules", "delete", name, "--quiet"])
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_of_zone() {
        assert_eq!(region_of("us-central1-a"), "us-central1");
        assert_eq!(region_of("europe-west4-b"), "europe-west4");
        assert_eq!(region_of("weird"), "weird");
    }

    #[test]
    fn test_not_found_detection() {
        let gone = anyhow::anyhow!(
            "gcloud compute instances failed: The resource 'dinosaurflux' was not found"
        );
        assert!(is_not_found(&gone));
        let other = anyhow::anyhow!("gcloud compute instances failed: permission denied");
        assert!(!is_not_found(&other));
    }

    #[test]
    fn test_allow_list() {
        assert_eq!(allow_list(&[80, 443, 8888]), "tcp:80,tcp:443,tcp:8888");
    }

    #[test]
    fn test_parse_instance() {
        let item: Value = serde_json::json!({
            "name": "dinosaurflux",
            "status": "RUNNING",
            "creationTimestamp": "2024-05-01T10:00:00.000-07:00",
            "networkInterfaces": [
                {"accessConfigs": [{"natIP": "34.1.2.3"}]}
            ],
        });
        let instance = parse_instance(&item).unwrap();
        assert_eq!(instance.name, "dinosaurflux");
        assert_eq!(instance.status, "RUNNING");
        assert_eq!(instance.nat_ip.as_deref(), Some("34.1.2.3"));
        assert!(instance.created_at.is_some());
    }
}
