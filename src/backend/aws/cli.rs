//! `Ec2Api` implementation backed by the aws command line tool.
//!
//! Every call shells out to `aws ec2 ... --output json` and parses the
//! response. Non-zero exits surface stderr in the error; "not found" /
//! "already gone" style responses are normalized by the callers, not
//! here.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::process::Command;
use tracing::debug;

use super::api::{
    Ec2Api, Ec2Instance, Route, RouteTable, RunInstanceRequest, SecurityGroup, TUTORIAL_TAG,
};
use crate::tutorial::ResourceRange;

pub struct AwsCli {
    region: String,
}

impl AwsCli {
    pub fn new(region: String) -> Self {
        AwsCli { region }
    }

    /// Cheap authenticated call to find out whether credentials work.
    pub async fn probe_auth(&self) -> bool {
        self.ec2(&["describe-instances", "--max-items", "1"])
            .await
            .is_ok()
    }

    async fn ec2(&self, args: &[&str]) -> Result<Value> {
        debug!(args = ?args, "aws ec2");
        let output = Command::new("aws")
            .arg("ec2")
            .args(args)
            .args(["--region", &self.region, "--output", "json"])
            .output()
            .await
            .context("executing aws cli (is it installed?)")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("aws ec2 {} failed: {}", args.first().unwrap_or(&""), stderr.trim());
        }
        if output.stdout.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&output.stdout).context("parsing aws cli response")
    }

    fn tag_spec(resource: &str, uid: &str) -> String {
        serde_json::json!([{
            "ResourceType": resource,
            "Tags": [
                {"Key": TUTORIAL_TAG, "Value": uid},
                {"Key": "Name", "Value": uid},
            ],
        }])
        .to_string()
    }

    fn tag_filter(uid: &str) -> String {
        format!("Name=tag:{},Values={}", TUTORIAL_TAG, uid)
    }

    fn vpc_filter(vpc_id: &str) -> String {
        format!("Name=vpc-id,Values={}", vpc_id)
    }
}

/// Pull `{list_key: [{id_key: "..."}]}` out of a response.
fn ids(value: &Value, list_key: &str, id_key: &str) -> Vec<String> {
    value
        .get(list_key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(id_key).and_then(|v| v.as_str()))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_tags(value: &Value) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    if let Some(items) = value.get("Tags").and_then(|v| v.as_array()) {
        for tag in items {
            if let (Some(key), Some(val)) = (
                tag.get("Key").and_then(|v| v.as_str()),
                tag.get("Value").and_then(|v| v.as_str()),
            ) {
                tags.insert(key.to_string(), val.to_string());
            }
        }
    }
    tags
}

fn parse_instances(response: &Value) -> Vec<Ec2Instance> {
    let mut instances = Vec::new();
    let reservations = response
        .get("Reservations")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    for reservation in &reservations {
        let Some(items) = reservation.get("Instances").and_then(|v| v.as_array()) else {
            continue;
        };
        for item in items {
            let Some(instance_id) = item.get("InstanceId").and_then(|v| v.as_str()) else {
                continue;
            };
            let state = item
                .get("State")
                .and_then(|s| s.get("Name"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            let public_ip = item
                .get("PublicIpAddress")
                .and_then(|v| v.as_str())
                .map(String::from);
            let launch_time = item
                .get("LaunchTime")
                .and_then(|v| v.as_str())
                .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc));
            instances.push(Ec2Instance {
                instance_id: instance_id.to_string(),
                state,
                public_ip,
                tags: parse_tags(item),
                launch_time,
            });
        }
    }
    instances
}

fn parse_security_groups(response: &Value) -> Vec<SecurityGroup> {
    response
        .get("SecurityGroups")
        .and_then(|v| v.as_array())
        .map(|groups| {
            groups
                .iter()
                .filter_map(|group| {
                    let group_id = group.get("GroupId")?.as_str()?.to_string();
                    let group_name = group
                        .get("GroupName")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    Some(SecurityGroup {
                        group_id,
                        group_name,
                        ingress: group
                            .get("IpPermissions")
                            .cloned()
                            .unwrap_or(Value::Array(vec![])),
                        egress: group
                            .get("IpPermissionsEgress")
                            .cloned()
                            .unwrap_or(Value::Array(vec![])),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Ec2Api for AwsCli {
    async fn list_instances(&self) -> Result<Vec<Ec2Instance>> {
        let response = self.ec2(&["describe-instances"]).await?;
        Ok(parse_instances(&response))
    }

    async fn instances_by_tag(&self, uid: &str) -> Result<Vec<Ec2Instance>> {
        let filter = Self::tag_filter(uid);
        let response = self
            .ec2(&["describe-instances", "--filters", &filter])
            .await?;
        Ok(parse_instances(&response))
    }

    async fn instances_in_vpc(&self, vpc_id: &str) -> Result<Vec<Ec2Instance>> {
        let filter = Self::vpc_filter(vpc_id);
        let response = self
            .ec2(&["describe-instances", "--filters", &filter])
            .await?;
        Ok(parse_instances(&response))
    }

    async fn run_instance(&self, request: &RunInstanceRequest) -> Result<String> {
        let tag_spec = Self::tag_spec("instance", &request.uid);
        let network_interfaces = serde_json::json!([{
            "SubnetId": request.subnet_id,
            "DeviceIndex": 0,
            "AssociatePublicIpAddress": true,
            "Groups": [request.security_group_id],
        }])
        .to_string();
        let response = self
            .ec2(&[
                "run-instances",
                "--image-id",
                &request.image_id,
                "--instance-type",
                &request.instance_type,
                "--user-data",
                &request.user_data,
                "--key-name",
                &request.key_name,
                "--network-interfaces",
                &network_interfaces,
                "--tag-specifications",
                &tag_spec,
                "--instance-initiated-shutdown-behavior",
                "terminate",
                "--count",
                "1",
            ])
            .await?;
        response
            .get("Instances")
            .and_then(|v| v.as_array())
            .and_then(|items| items.first())
            .and_then(|item| item.get("InstanceId"))
            .and_then(|v| v.as_str())
            .map(String::from)
            .context("run-instances response missing InstanceId")
    }

    async fn wait_instance_running(&self, instance_id: &str) -> Result<Ec2Instance> {
        self.ec2(&["wait", "instance-running", "--instance-ids", instance_id])
            .await?;
        let response = self
            .ec2(&["describe-instances", "--instance-ids", instance_id])
            .await?;
        parse_instances(&response)
            .into_iter()
            .next()
            .with_context(|| format!("instance {} vanished after running wait", instance_id))
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<()> {
        let mut args = vec!["terminate-instances", "--instance-ids"];
        args.extend(instance_ids.iter().map(String::as_str));
        self.ec2(&args).await?;
        Ok(())
    }

    async fn wait_instances_terminated(&self, instance_ids: &[String]) -> Result<()> {
        let mut args = vec!["wait", "instance-terminated", "--instance-ids"];
        args.extend(instance_ids.iter().map(String::as_str));
        self.ec2(&args).await?;
        Ok(())
    }

    async fn vpc_by_tag(&self, uid: &str) -> Result<Option<String>> {
        let filter = Self::tag_filter(uid);
        let response = self.ec2(&["describe-vpcs", "--filters", &filter]).await?;
        Ok(ids(&response, "Vpcs", "VpcId").into_iter().next())
    }

    async fn create_vpc(&self, cidr_block: &str, uid: &str) -> Result<String> {
        let tag_spec = Self::tag_spec("vpc", uid);
        let response = self
            .ec2(&[
                "create-vpc",
                "--cidr-block",
                cidr_block,
                "--tag-specifications",
                &tag_spec,
            ])
            .await?;
        response
            .get("Vpc")
            .and_then(|v| v.get("VpcId"))
            .and_then(|v| v.as_str())
            .map(String::from)
            .context("create-vpc response missing VpcId")
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<()> {
        self.ec2(&["delete-vpc", "--vpc-id", vpc_id]).await?;
        Ok(())
    }

    async fn internet_gateways_by_tag(&self, uid: &str) -> Result<Vec<String>> {
        let filter = Self::tag_filter(uid);
        let response = self
            .ec2(&["describe-internet-gateways", "--filters", &filter])
            .await?;
        Ok(ids(&response, "InternetGateways", "InternetGatewayId"))
    }

    async fn internet_gateways_for_vpc(&self, vpc_id: &str) -> Result<Vec<String>> {
        let filter = format!("Name=attachment.vpc-id,Values={}", vpc_id);
        let response = self
            .ec2(&["describe-internet-gateways", "--filters", &filter])
            .await?;
        Ok(ids(&response, "InternetGateways", "InternetGatewayId"))
    }

    async fn create_internet_gateway(&self, uid: &str) -> Result<String> {
        let tag_spec = Self::tag_spec("internet-gateway", uid);
        let response = self
            .ec2(&["create-internet-gateway", "--tag-specifications", &tag_spec])
            .await?;
        response
            .get("InternetGateway")
            .and_then(|v| v.get("InternetGatewayId"))
            .and_then(|v| v.as_str())
            .map(String::from)
            .context("create-internet-gateway response missing id")
    }

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        self.ec2(&[
            "attach-internet-gateway",
            "--internet-gateway-id",
            gateway_id,
            "--vpc-id",
            vpc_id,
        ])
        .await?;
        Ok(())
    }

    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        self.ec2(&[
            "detach-internet-gateway",
            "--internet-gateway-id",
            gateway_id,
            "--vpc-id",
            vpc_id,
        ])
        .await?;
        Ok(())
    }

    async fn delete_internet_gateway(&self, gateway_id: &str) -> Result<()> {
        self.ec2(&[
            "delete-internet-gateway",
            "--internet-gateway-id",
            gateway_id,
        ])
        .await?;
        Ok(())
    }

    async fn create_route_table(&self, vpc_id: &str, uid: &str) -> Result<String> {
        let tag_spec = Self::tag_spec("route-table", uid);
        let response = self
            .ec2(&[
                "create-route-table",
                "--vpc-id",
                vpc_id,
                "--tag-specifications",
                &tag_spec,
            ])
            .await?;
        response
            .get("RouteTable")
            .and_then(|v| v.get("RouteTableId"))
            .and_then(|v| v.as_str())
            .map(String::from)
            .context("create-route-table response missing id")
    }

    async fn create_default_route(&self, route_table_id: &str, gateway_id: &str) -> Result<()> {
        self.ec2(&[
            "create-route",
            "--route-table-id",
            route_table_id,
            "--destination-cidr-block",
            "0.0.0.0/0",
            "--gateway-id",
            gateway_id,
        ])
        .await?;
        Ok(())
    }

    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str) -> Result<()> {
        self.ec2(&[
            "associate-route-table",
            "--route-table-id",
            route_table_id,
            "--subnet-id",
            subnet_id,
        ])
        .await?;
        Ok(())
    }

    async fn route_tables_in_vpc(&self, vpc_id: &str) -> Result<Vec<RouteTable>> {
        let filter = Self::vpc_filter(vpc_id);
        let response = self
            .ec2(&["describe-route-tables", "--filters", &filter])
            .await?;
        let tables = response
            .get("RouteTables")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(tables
            .iter()
            .filter_map(|table| {
                let route_table_id = table.get("RouteTableId")?.as_str()?.to_string();
                let is_main = table
                    .get("Associations")
                    .and_then(|v| v.as_array())
                    .is_some_and(|assocs| {
                        assocs
                            .iter()
                            .any(|a| a.get("Main").and_then(|v| v.as_bool()).unwrap_or(false))
                    });
                let routes = table
                    .get("Routes")
                    .and_then(|v| v.as_array())
                    .map(|routes| {
                        routes
                            .iter()
                            .filter_map(|route| {
                                Some(Route {
                                    destination: route
                                        .get("DestinationCidrBlock")?
                                        .as_str()?
                                        .to_string(),
                                    gateway_id: route
                                        .get("GatewayId")
                                        .and_then(|v| v.as_str())
                                        .map(String::from),
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Some(RouteTable {
                    route_table_id,
                    is_main,
                    routes,
                })
            })
            .collect())
    }

    async fn delete_route(&self, route_table_id: &str, destination: &str) -> Result<()> {
        self.ec2(&[
            "delete-route",
            "--route-table-id",
            route_table_id,
            "--destination-cidr-block",
            destination,
        ])
        .await?;
        Ok(())
    }

    async fn delete_route_table(&self, route_table_id: &str) -> Result<()> {
        self.ec2(&["delete-route-table", "--route-table-id", route_table_id])
            .await?;
        Ok(())
    }

    async fn subnets_in_vpc(&self, vpc_id: &str) -> Result<Vec<String>> {
        let filter = Self::vpc_filter(vpc_id);
        let response = self.ec2(&["describe-subnets", "--filters", &filter]).await?;
        Ok(ids(&response, "Subnets", "SubnetId"))
    }

    async fn create_subnet(
        &self,
        vpc_id: &str,
        cidr_block: &str,
        availability_zone: &str,
        uid: &str,
    ) -> Result<String> {
        let tag_spec = Self::tag_spec("subnet", uid);
        let response = self
            .ec2(&[
                "create-subnet",
                "--vpc-id",
                vpc_id,
                "--cidr-block",
                cidr_block,
                "--availability-zone",
                availability_zone,
                "--tag-specifications",
                &tag_spec,
            ])
            .await?;
        response
            .get("Subnet")
            .and_then(|v| v.get("SubnetId"))
            .and_then(|v| v.as_str())
            .map(String::from)
            .context("create-subnet response missing SubnetId")
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        self.ec2(&["delete-subnet", "--subnet-id", subnet_id]).await?;
        Ok(())
    }

    async fn security_groups_in_vpc(&self, vpc_id: &str) -> Result<Vec<SecurityGroup>> {
        let filter = Self::vpc_filter(vpc_id);
        let response = self
            .ec2(&["describe-security-groups", "--filters", &filter])
            .await?;
        Ok(parse_security_groups(&response))
    }

    async fn security_group_by_name(&self, name: &str) -> Result<Option<SecurityGroup>> {
        let filter = format!("Name=group-name,Values={}", name);
        let response = self
            .ec2(&["describe-security-groups", "--filters", &filter])
            .await?;
        Ok(parse_security_groups(&response).into_iter().next())
    }

    async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        vpc_id: &str,
        uid: &str,
    ) -> Result<String> {
        let tag_spec = Self::tag_spec("security-group", uid);
        let response = self
            .ec2(&[
                "create-security-group",
                "--group-name",
                name,
                "--description",
                description,
                "--vpc-id",
                vpc_id,
                "--tag-specifications",
                &tag_spec,
            ])
            .await?;
        response
            .get("GroupId")
            .and_then(|v| v.as_str())
            .map(String::from)
            .context("create-security-group response missing GroupId")
    }

    async fn authorize_ingress(
        &self,
        group_id: &str,
        permissions: &serde_json::Value,
    ) -> Result<()> {
        let payload = permissions.to_string();
        self.ec2(&[
            "authorize-security-group-ingress",
            "--group-id",
            group_id,
            "--ip-permissions",
            &payload,
        ])
        .await?;
        Ok(())
    }

    async fn authorize_egress(
        &self,
        group_id: &str,
        permissions: &serde_json::Value,
    ) -> Result<()> {
        let payload = permissions.to_string();
        self.ec2(&[
            "authorize-security-group-egress",
            "--group-id",
            group_id,
            "--ip-permissions",
            &payload,
        ])
        .await?;
        Ok(())
    }

    async fn revoke_ingress(&self, group_id: &str, permissions: &serde_json::Value) -> Result<()> {
        let payload = permissions.to_string();
        self.ec2(&[
            "revoke-security-group-ingress",
            "--group-id",
            group_id,
            "--ip-permissions",
            &payload,
        ])
        .await?;
        Ok(())
    }

    async fn revoke_egress(&self, group_id: &str, permissions: &serde_json::Value) -> Result<()> {
        let payload = permissions.to_string();
        self.ec2(&[
            "revoke-security-group-egress",
            "--group-id",
            group_id,
            "--ip-permissions",
            &payload,
        ])
        .await?;
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        self.ec2(&["delete-security-group", "--group-id", group_id])
            .await?;
        Ok(())
    }

    async fn key_pair_exists(&self, name: &str) -> Result<bool> {
        // Missing key pairs are an error response, not an empty list
        let filter = format!("Name=key-name,Values={}", name);
        let response = self
            .ec2(&["describe-key-pairs", "--filters", &filter])
            .await?;
        Ok(!ids(&response, "KeyPairs", "KeyName").is_empty())
    }

    async fn create_key_pair(&self, name: &str) -> Result<String> {
        let response = self.ec2(&["create-key-pair", "--key-name", name]).await?;
        response
            .get("KeyMaterial")
            .and_then(|v| v.as_str())
            .map(String::from)
            .context("create-key-pair response missing KeyMaterial")
    }

    async fn delete_key_pair(&self, name: &str) -> Result<()> {
        self.ec2(&["delete-key-pair", "--key-name", name]).await?;
        Ok(())
    }

    async fn addresses_in_vpc(&self, vpc_id: &str) -> Result<Vec<String>> {
        // Elastic IPs are found through the interfaces they are bound to
        let filter = Self::vpc_filter(vpc_id);
        let response = self
            .ec2(&["describe-network-interfaces", "--filters", &filter])
            .await?;
        let interfaces = response
            .get("NetworkInterfaces")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(interfaces
            .iter()
            .filter_map(|eni| {
                eni.get("Association")
                    .and_then(|a| a.get("AllocationId"))
                    .and_then(|v| v.as_str())
                    .map(String::from)
            })
            .collect())
    }

    async fn release_address(&self, allocation_id: &str) -> Result<()> {
        self.ec2(&["release-address", "--allocation-id", allocation_id])
            .await?;
        Ok(())
    }

    async fn nat_gateways_in_vpc(&self, vpc_id: &str) -> Result<Vec<String>> {
        let filter = Self::vpc_filter(vpc_id);
        let response = self
            .ec2(&["describe-nat-gateways", "--filter", &filter])
            .await?;
        let gateways = response
            .get("NatGateways")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(gateways
            .iter()
            .filter(|nat| {
                let state = nat.get("State").and_then(|v| v.as_str()).unwrap_or("");
                state != "deleted" && state != "deleting"
            })
            .filter_map(|nat| {
                nat.get("NatGatewayId")
                    .and_then(|v| v.as_str())
                    .map(String::from)
            })
            .collect())
    }

    async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> Result<()> {
        self.ec2(&["delete-nat-gateway", "--nat-gateway-id", nat_gateway_id])
            .await?;
        Ok(())
    }

    async fn transit_gateway_attachments_for_vpc(&self, vpc_id: &str) -> Result<Vec<String>> {
        let filter = format!("Name=resource-id,Values={}", vpc_id);
        let response = self
            .ec2(&["describe-transit-gateway-attachments", "--filters", &filter])
            .await?;
        Ok(ids(
            &response,
            "TransitGatewayAttachments",
            "TransitGatewayAttachmentId",
        ))
    }

    async fn delete_transit_gateway_attachment(&self, attachment_id: &str) -> Result<()> {
        self.ec2(&[
            "delete-transit-gateway-vpc-attachment",
            "--transit-gateway-attachment-id",
            attachment_id,
        ])
        .await?;
        Ok(())
    }

    async fn peering_connections_for_vpc(&self, vpc_id: &str) -> Result<Vec<String>> {
        // Both sides: connections we requested and connections we accepted
        let mut peering_ids = Vec::new();
        for side in [
            "Name=requester-vpc-info.vpc-id,Values=",
            "Name=accepter-vpc-info.vpc-id,Values=",
        ] {
            let filter = format!("{}{}", side, vpc_id);
            let response = self
                .ec2(&["describe-vpc-peering-connections", "--filters", &filter])
                .await?;
            for id in ids(&response, "VpcPeeringConnections", "VpcPeeringConnectionId") {
                if !peering_ids.contains(&id) {
                    peering_ids.push(id);
                }
            }
        }
        Ok(peering_ids)
    }

    async fn delete_peering_connection(&self, peering_id: &str) -> Result<()> {
        self.ec2(&[
            "delete-vpc-peering-connection",
            "--vpc-peering-connection-id",
            peering_id,
        ])
        .await?;
        Ok(())
    }

    async fn vpc_endpoints_in_vpc(&self, vpc_id: &str) -> Result<Vec<String>> {
        let filter = Self::vpc_filter(vpc_id);
        let response = self
            .ec2(&["describe-vpc-endpoints", "--filters", &filter])
            .await?;
        Ok(ids(&response, "VpcEndpoints", "VpcEndpointId"))
    }

    async fn delete_vpc_endpoints(&self, endpoint_ids: &[String]) -> Result<()> {
        let mut args = vec!["delete-vpc-endpoints", "--vpc-endpoint-ids"];
        args.extend(endpoint_ids.iter().map(String::as_str));
        self.ec2(&args).await?;
        Ok(())
    }

    async fn network_interfaces_in_vpc(&self, vpc_id: &str) -> Result<Vec<String>> {
        let filter = Self::vpc_filter(vpc_id);
        let response = self
            .ec2(&["describe-network-interfaces", "--filters", &filter])
            .await?;
        Ok(ids(&response, "NetworkInterfaces", "NetworkInterfaceId"))
    }

    async fn network_interfaces_in_subnet(&self, subnet_id: &str) -> Result<Vec<String>> {
        let filter = format!("Name=subnet-id,Values={}", subnet_id);
        let response = self
            .ec2(&["describe-network-interfaces", "--filters", &filter])
            .await?;
        Ok(ids(&response, "NetworkInterfaces", "NetworkInterfaceId"))
    }

    async fn delete_network_interface(&self, interface_id: &str) -> Result<()> {
        self.ec2(&[
            "delete-network-interface",
            "--network-interface-id",
            interface_id,
        ])
        .await?;
        Ok(())
    }

    async fn select_instance_types(&self, range: &ResourceRange) -> Result<Vec<String>> {
        let vcpus: Vec<String> = (range.cpu_min..=range.cpu_max)
            .map(|n| n.to_string())
            .collect();
        let filter = format!("Name=vcpu-info.default-vcpus,Values={}", vcpus.join(","));
        let response = self
            .ec2(&[
                "describe-instance-types",
                "--filters",
                &filter,
                "Name=current-generation,Values=true",
            ])
            .await?;
        let types = response
            .get("InstanceTypes")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let mut fits: Vec<(u64, String)> = types
            .iter()
            .filter_map(|item| {
                let name = item.get("InstanceType")?.as_str()?.to_string();
                let memory = item
                    .get("MemoryInfo")
                    .and_then(|m| m.get("SizeInMiB"))
                    .and_then(|v| v.as_u64())?;
                if memory >= range.memory_min_mib as u64 && memory <= range.memory_max_mib as u64 {
                    Some((memory, name))
                } else {
                    None
                }
            })
            .collect();
        // Smallest fit first stands in for a price sort
        fits.sort();
        Ok(fits.into_iter().map(|(_, name)| name).collect())
    }

    async fn latest_amazon_linux_ami(&self) -> Result<String> {
        let response = self
            .ec2(&[
                "describe-images",
                "--owners",
                "amazon",
                "--filters",
                "Name=description,Values=Amazon Linux AMI*",
            ])
            .await?;
        let mut images: Vec<(String, String)> = response
            .get("Images")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|image| {
                        let created = image.get("CreationDate")?.as_str()?.to_string();
                        let image_id = image.get("ImageId")?.as_str()?.to_string();
                        Some((created, image_id))
                    })
                    .collect()
            })
            .unwrap_or_default();
        images.sort();
        images
            .pop()
            .map(|(_, image_id)| image_id)
            .context("no Amazon Linux image found")
    }
}
