//! The narrow Compute Engine surface the orchestrator programs against.
//!
//! Compute resources are addressed by name, not by tag: names are
//! deterministic functions of the tutorial and user, so a live lookup
//! by name answers every "does X exist" question.

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct GceInstance {
    pub name: String,
    pub status: String,
    /// External NAT address, present once networking is attached.
    pub nat_ip: Option<String>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl GceInstance {
    pub fn is_terminated(&self) -> bool {
        self.status == "TERMINATED" || self.status == "STOPPING"
    }
}

#[derive(Debug, Clone)]
pub struct InsertInstanceRequest {
    pub name: String,
    pub machine_type: String,
    pub network: String,
    pub subnet: String,
    /// Shell script run by the guest agent on first boot.
    pub startup_script: String,
}

#[async_trait]
pub trait GceApi: Send + Sync {
    // --- instances ---
    async fn list_instances(&self) -> Result<Vec<GceInstance>>;
    async fn get_instance(&self, name: &str) -> Result<Option<GceInstance>>;
    async fn insert_instance(&self, request: &InsertInstanceRequest) -> Result<()>;
    async fn wait_instance_running(&self, name: &str) -> Result<GceInstance>;
    async fn delete_instance(&self, name: &str) -> Result<()>;

    // --- networks ---
    async fn network_exists(&self, name: &str) -> Result<bool>;
    async fn create_network(&self, name: &str) -> Result<()>;
    async fn delete_network(&self, name: &str) -> Result<()>;

    // --- subnets ---
    async fn subnet_exists(&self, name: &str) -> Result<bool>;
    async fn create_subnet(&self, name: &str, network: &str, range: &str) -> Result<()>;
    async fn delete_subnet(&self, name: &str) -> Result<()>;

    // --- firewalls ---
    async fn firewall_exists(&self, name: &str) -> Result<bool>;
    async fn create_ingress_firewall(&self, name: &str, network: &str, ports: &[u16])
        -> Result<()>;
    async fn create_egress_firewall(&self, name: &str, network: &str, ports: &[u16]) -> Result<()>;
    async fn delete_firewall(&self, name: &str) -> Result<()>;
}
