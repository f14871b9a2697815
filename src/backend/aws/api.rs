//! The narrow EC2 API surface the orchestrator programs against.
//!
//! Keeping this behind a trait lets the deploy/teardown sequences run
//! against a scripted in-memory cloud in tests. The cloud itself is the
//! source of truth: every "does X exist" question is answered by a live
//! lookup keyed on the tutorial tag, never by local state.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::tutorial::ResourceRange;

/// Tag key that marks every resource created for a tutorial.
pub const TUTORIAL_TAG: &str = "tutorbox-tutorial";

#[derive(Debug, Clone)]
pub struct Ec2Instance {
    pub instance_id: String,
    pub state: String,
    pub public_ip: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub launch_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl Ec2Instance {
    pub fn is_terminated(&self) -> bool {
        self.state == "terminated" || self.state == "shutting-down"
    }
}

#[derive(Debug, Clone)]
pub struct SecurityGroup {
    pub group_id: String,
    pub group_name: String,
    /// Raw IpPermissions lists, passed back verbatim on revoke.
    pub ingress: serde_json::Value,
    pub egress: serde_json::Value,
}

impl SecurityGroup {
    pub fn has_ingress(&self) -> bool {
        self.ingress.as_array().is_some_and(|a| !a.is_empty())
    }

    pub fn has_egress(&self) -> bool {
        self.egress.as_array().is_some_and(|a| !a.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct Route {
    pub destination: String,
    pub gateway_id: Option<String>,
}

impl Route {
    /// The implicit local route cannot be deleted.
    pub fn is_local(&self) -> bool {
        self.gateway_id.as_deref() == Some("local")
    }
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    pub route_table_id: String,
    pub is_main: bool,
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone)]
pub struct RunInstanceRequest {
    pub image_id: String,
    pub instance_type: String,
    pub user_data: String,
    pub key_name: String,
    pub subnet_id: String,
    pub security_group_id: String,
    /// Tutorial uid, applied as both the tutorial tag and the Name tag.
    pub uid: String,
}

#[async_trait]
pub trait Ec2Api: Send + Sync {
    // --- instances ---
    async fn list_instances(&self) -> Result<Vec<Ec2Instance>>;
    async fn instances_by_tag(&self, uid: &str) -> Result<Vec<Ec2Instance>>;
    async fn instances_in_vpc(&self, vpc_id: &str) -> Result<Vec<Ec2Instance>>;
    async fn run_instance(&self, request: &RunInstanceRequest) -> Result<String>;
    async fn wait_instance_running(&self, instance_id: &str) -> Result<Ec2Instance>;
    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<()>;
    async fn wait_instances_terminated(&self, instance_ids: &[String]) -> Result<()>;

    // --- vpc ---
    async fn vpc_by_tag(&self, uid: &str) -> Result<Option<String>>;
    async fn create_vpc(&self, cidr_block: &str, uid: &str) -> Result<String>;
    async fn delete_vpc(&self, vpc_id: &str) -> Result<()>;

    // --- internet gateways and routing ---
    async fn internet_gateways_by_tag(&self, uid: &str) -> Result<Vec<String>>;
    async fn internet_gateways_for_vpc(&self, vpc_id: &str) -> Result<Vec<String>>;
    async fn create_internet_gateway(&self, uid: &str) -> Result<String>;
    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()>;
    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()>;
    async fn delete_internet_gateway(&self, gateway_id: &str) -> Result<()>;
    async fn create_route_table(&self, vpc_id: &str, uid: &str) -> Result<String>;
    async fn create_default_route(&self, route_table_id: &str, gateway_id: &str) -> Result<()>;
    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str) -> Result<()>;
    async fn route_tables_in_vpc(&self, vpc_id: &str) -> Result<Vec<RouteTable>>;
    async fn delete_route(&self, route_table_id: &str, destination: &str) -> Result<()>;
    async fn delete_route_table(&self, route_table_id: &str) -> Result<()>;

    // --- subnets ---
    async fn subnets_in_vpc(&self, vpc_id: &str) -> Result<Vec<String>>;
    async fn create_subnet(
        &self,
        vpc_id: &str,
        cidr_block: &str,
        availability_zone: &str,
        uid: &str,
    ) -> Result<String>;
    async fn delete_subnet(&self, subnet_id: &str) -> Result<()>;

    // --- security groups ---
    async fn security_groups_in_vpc(&self, vpc_id: &str) -> Result<Vec<SecurityGroup>>;
    async fn security_group_by_name(&self, name: &str) -> Result<Option<SecurityGroup>>;
    async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        vpc_id: &str,
        uid: &str,
    ) -> Result<String>;
    async fn authorize_ingress(&self, group_id: &str, permissions: &serde_json::Value)
        -> Result<()>;
    async fn authorize_egress(&self, group_id: &str, permissions: &serde_json::Value)
        -> Result<()>;
    async fn revoke_ingress(&self, group_id: &str, permissions: &serde_json::Value) -> Result<()>;
    async fn revoke_egress(&self, group_id: &str, permissions: &serde_json::Value) -> Result<()>;
    async fn delete_security_group(&self, group_id: &str) -> Result<()>;

    // --- key pairs ---
    async fn key_pair_exists(&self, name: &str) -> Result<bool>;
    /// Returns the private key material; only ever available at creation.
    async fn create_key_pair(&self, name: &str) -> Result<String>;
    async fn delete_key_pair(&self, name: &str) -> Result<()>;

    // --- teardown extras ---
    async fn addresses_in_vpc(&self, vpc_id: &str) -> Result<Vec<String>>;
    async fn release_address(&self, allocation_id: &str) -> Result<()>;
    async fn nat_gateways_in_vpc(&self, vpc_id: &str) -> Result<Vec<String>>;
    async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> Result<()>;
    async fn transit_gateway_attachments_for_vpc(&self, vpc_id: &str) -> Result<Vec<String>>;
    async fn delete_transit_gateway_attachment(&self, attachment_id: &str) -> Result<()>;
    async fn peering_connections_for_vpc(&self, vpc_id: &str) -> Result<Vec<String>>;
    async fn delete_peering_connection(&self, peering_id: &str) -> Result<()>;
    async fn vpc_endpoints_in_vpc(&self, vpc_id: &str) -> Result<Vec<String>>;
    async fn delete_vpc_endpoints(&self, endpoint_ids: &[String]) -> Result<()>;
    async fn network_interfaces_in_vpc(&self, vpc_id: &str) -> Result<Vec<String>>;
    async fn network_interfaces_in_subnet(&self, subnet_id: &str) -> Result<Vec<String>>;
    async fn delete_network_interface(&self, interface_id: &str) -> Result<()>;

    // --- selection ---
    /// Instance types fitting the range, smallest first.
    async fn select_instance_types(&self, range: &ResourceRange) -> Result<Vec<String>>;
    async fn latest_amazon_linux_ami(&self) -> Result<String>;
}

/// IpPermissions payload opening each port for TCP from anywhere.
pub fn tcp_permissions(ports: &[u16]) -> serde_json::Value {
    let permissions: Vec<serde_json::Value> = ports
        .iter()
        .map(|port| {
            serde_json::json!({
                "IpProtocol": "tcp",
                "FromPort": port,
                "ToPort": port,
                "IpRanges": [{"CidrIp": "0.0.0.0/0"}],
            })
        })
        .collect();
    serde_json::Value::Array(permissions)
}
