//! AWS orchestration: ordered idempotent ensure steps on deploy and a
//! mirrored reverse-order teardown on stop.
//!
//! Every "ensure" first looks the resource up by the tutorial tag and
//! reuses it if present, so a retry of the whole sequence after a
//! partial failure converges to the same end state. Teardown deletes
//! run under an unbounded retry because cloud deletion ordering is
//! eventually consistent; the only signal available is "try again".

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::api::{tcp_permissions, Ec2Api, RunInstanceRequest};
use super::cli::AwsCli;
use crate::backend::{Backend, DeployOptions, Deployment, InstanceInfo};
use crate::errors::TutorboxError;
use crate::readiness::{HttpProber, Prober};
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::settings::Settings;
use crate::startup::{masked, startup_script};
use crate::tutorial::Tutorial;

/// Fixed private address block for the tutorial's network.
pub const CIDR_BLOCK: &str = "192.168.1.0/24";

pub struct AwsBackend {
    api: Arc<dyn Ec2Api>,
    sleeper: Arc<dyn Sleeper>,
    prober: Arc<dyn Prober>,
    region: String,
    zone: String,
    default_instance: String,
    user: String,
    key_dir: PathBuf,
    has_auth: bool,
}

impl AwsBackend {
    /// Connect to EC2 via the aws cli. Authentication failure is not
    /// fatal here; it is recorded and surfaced on the first operation
    /// that needs the API.
    pub async fn connect(settings: &Settings, user: &str) -> Result<Self> {
        let cli = AwsCli::new(settings.aws_region());
        let has_auth = cli.probe_auth().await;
        if !has_auth {
            debug!("unable to authenticate to EC2, operations will fail until credentials work");
        }
        let mut backend = AwsBackend::with_api(
            Arc::new(cli),
            Arc::new(TokioSleeper),
            Arc::new(HttpProber::new(settings.probe_config())),
            settings,
            user,
        );
        backend.has_auth = has_auth;
        Ok(backend)
    }

    /// Build against an explicit API implementation (scripted clouds in
    /// tests, alternative transports).
    pub fn with_api(
        api: Arc<dyn Ec2Api>,
        sleeper: Arc<dyn Sleeper>,
        prober: Arc<dyn Prober>,
        settings: &Settings,
        user: &str,
    ) -> Self {
        AwsBackend {
            api,
            sleeper,
            prober,
            region: settings.aws_region(),
            zone: settings.aws_zone(),
            default_instance: settings.aws_instance(),
            user: user.to_string(),
            key_dir: PathBuf::from("."),
            has_auth: true,
        }
    }

    pub fn with_key_dir(mut self, key_dir: impl Into<PathBuf>) -> Self {
        self.key_dir = key_dir.into();
        self
    }

    fn require_auth(&self) -> Result<()> {
        if !self.has_auth {
            return Err(TutorboxError::Authentication { backend: "aws" }.into());
        }
        Ok(())
    }

    pub fn key_file(&self, uid: &str) -> PathBuf {
        self.key_dir.join(format!("{}.pem", uid))
    }

    /// Delete with unbounded backoff: cloud deletes race with
    /// still-attached dependents and only converge eventually. A
    /// "no such resource" answer is the target state, not an error,
    /// so it never spins the retry loop.
    async fn delete_with_backoff<F, Fut>(&self, what: &str, mut op: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        RetryPolicy::unbounded()
            .run(self.sleeper.as_ref(), what, || {
                let fut = op();
                async move {
                    match fut.await {
                        Err(e) if crate::backend::is_already_gone(&e) => {
                            debug!(error = %e, "resource is already gone");
                            Ok(())
                        }
                        other => other,
                    }
                }
            })
            .await
    }

    /// Ensure the tutorial's VPC exists, returning its id. Tag lookup is
    /// the de-duplication key: repeated calls reuse the same network.
    pub async fn ensure_vpc(&self, uid: &str) -> Result<String> {
        if let Some(vpc_id) = self.api.vpc_by_tag(uid).await? {
            debug!(vpc = %vpc_id, "reusing existing vpc");
            return Ok(vpc_id);
        }
        let vpc_id = self.api.create_vpc(CIDR_BLOCK, uid).await?;
        info!(vpc = %vpc_id, cidr = CIDR_BLOCK, "created vpc");
        Ok(vpc_id)
    }

    /// Ensure an internet gateway, route table and public subnet,
    /// returning the subnet id for instance placement.
    pub async fn ensure_gateway(&self, uid: &str, vpc_id: &str) -> Result<String> {
        if !self.api.internet_gateways_by_tag(uid).await?.is_empty() {
            if let Some(subnet_id) = self.api.subnets_in_vpc(vpc_id).await?.into_iter().next() {
                debug!(subnet = %subnet_id, "reusing existing gateway and subnet");
                return Ok(subnet_id);
            }
        }

        let gateway_id = self.api.create_internet_gateway(uid).await?;
        self.api.attach_internet_gateway(&gateway_id, vpc_id).await?;

        let route_table_id = self.api.create_route_table(vpc_id, uid).await?;
        self.api
            .create_default_route(&route_table_id, &gateway_id)
            .await?;

        let availability_zone = format!("{}{}", self.region, self.zone);
        let subnet_id = self
            .api
            .create_subnet(vpc_id, CIDR_BLOCK, &availability_zone, uid)
            .await?;
        self.api
            .associate_route_table(&route_table_id, &subnet_id)
            .await?;
        info!(gateway = %gateway_id, subnet = %subnet_id, "created internet gateway and subnet");
        Ok(subnet_id)
    }

    /// Ensure a security group opening each exposed port, returning its id.
    pub async fn ensure_security_group(
        &self,
        tutorial: &Tutorial,
        uid: &str,
        vpc_id: &str,
    ) -> Result<String> {
        if let Some(group) = self.api.security_group_by_name(uid).await? {
            debug!(group = %group.group_id, "reusing existing security group");
            return Ok(group.group_id);
        }

        let group_id = self
            .api
            .create_security_group(uid, &format!("Security group for {}", uid), vpc_id, uid)
            .await?;
        let permissions = tcp_permissions(&tutorial.exposed_ports());
        self.api.authorize_ingress(&group_id, &permissions).await?;
        self.api.authorize_egress(&group_id, &permissions).await?;
        info!(group = %group_id, ports = ?tutorial.exposed_ports(), "created security group");
        Ok(group_id)
    }

    /// Ensure a usable key pair: a local pem file wins; a remote key
    /// pair without a local file is unusable (the private key is only
    /// returned at creation) and gets replaced.
    pub async fn ensure_key_pair(&self, uid: &str) -> Result<String> {
        let key_file = self.key_file(uid);
        if key_file.exists() {
            debug!(key_file = %key_file.display(), "reusing existing key file");
            return Ok(uid.to_string());
        }

        if self.api.key_pair_exists(uid).await? {
            warn!(key = uid, "remote key pair exists without a local key file, recreating");
            self.api.delete_key_pair(uid).await?;
        }

        let material = self.api.create_key_pair(uid).await?;
        write_private_key(&key_file, &material)
            .with_context(|| format!("writing private key {}", key_file.display()))?;
        info!(key_file = %key_file.display(), "created key pair");
        Ok(uid.to_string())
    }

    /// Pick a machine size: flexible fit across the region, falling
    /// back to the configured default.
    async fn select_instance_type(&self, tutorial: &Tutorial) -> Result<String> {
        if let Some(range) = tutorial.flexible_resources() {
            let matches = self.api.select_instance_types(&range).await?;
            if let Some(instance_type) = matches.into_iter().next() {
                return Ok(instance_type);
            }
            info!(
                instance = %self.default_instance,
                "no instance type fits the requested resources, using default"
            );
        }
        Ok(self.default_instance.clone())
    }

    async fn delete_key_artifacts(&self, uid: &str) -> Result<()> {
        let key_file = self.key_file(uid);
        if key_file.exists() {
            std::fs::remove_file(&key_file)
                .with_context(|| format!("deleting key file {}", key_file.display()))?;
            info!(key_file = %key_file.display(), "deleted private key file");
        }
        Ok(())
    }

    /// Reverse-order teardown of everything in the tutorial's VPC.
    async fn teardown_vpc(&self, vpc_id: &str) -> Result<()> {
        // Elastic addresses must be released before their interfaces go
        for allocation_id in self.api.addresses_in_vpc(vpc_id).await? {
            let api = self.api.clone();
            self.delete_with_backoff("release address", move || {
                let api = api.clone();
                let allocation_id = allocation_id.clone();
                async move { api.release_address(&allocation_id).await }
            })
            .await?;
        }

        let instance_ids: Vec<String> = self
            .api
            .instances_in_vpc(vpc_id)
            .await?
            .into_iter()
            .filter(|instance| instance.state != "terminated")
            .map(|instance| instance.instance_id)
            .collect();
        if !instance_ids.is_empty() {
            info!(count = instance_ids.len(), "terminating instances");
            self.api.terminate_instances(&instance_ids).await?;
            self.api.wait_instances_terminated(&instance_ids).await?;
        }

        for nat_gateway_id in self.api.nat_gateways_in_vpc(vpc_id).await? {
            let api = self.api.clone();
            self.delete_with_backoff("delete nat gateway", move || {
                let api = api.clone();
                let nat_gateway_id = nat_gateway_id.clone();
                async move { api.delete_nat_gateway(&nat_gateway_id).await }
            })
            .await?;
        }
        for attachment_id in self.api.transit_gateway_attachments_for_vpc(vpc_id).await? {
            let api = self.api.clone();
            self.delete_with_backoff("delete transit gateway attachment", move || {
                let api = api.clone();
                let attachment_id = attachment_id.clone();
                async move { api.delete_transit_gateway_attachment(&attachment_id).await }
            })
            .await?;
        }

        for peering_id in self.api.peering_connections_for_vpc(vpc_id).await? {
            let api = self.api.clone();
            self.delete_with_backoff("delete peering connection", move || {
                let api = api.clone();
                let peering_id = peering_id.clone();
                async move { api.delete_peering_connection(&peering_id).await }
            })
            .await?;
        }

        let endpoint_ids = self.api.vpc_endpoints_in_vpc(vpc_id).await?;
        if !endpoint_ids.is_empty() {
            let api = self.api.clone();
            self.delete_with_backoff("delete vpc endpoints", move || {
                let api = api.clone();
                let endpoint_ids = endpoint_ids.clone();
                async move { api.delete_vpc_endpoints(&endpoint_ids).await }
            })
            .await?;
        }

        // Rules must be revoked before groups can be deleted: groups
        // cross-referencing each other's rules reject a plain delete
        let groups = self.api.security_groups_in_vpc(vpc_id).await?;
        for group in &groups {
            if group.has_ingress() {
                self.api
                    .revoke_ingress(&group.group_id, &group.ingress)
                    .await?;
            }
            if group.has_egress() {
                self.api
                    .revoke_egress(&group.group_id, &group.egress)
                    .await?;
            }
        }
        for group in &groups {
            if group.group_name == "default" {
                continue;
            }
            let api = self.api.clone();
            let group_id = group.group_id.clone();
            self.delete_with_backoff("delete security group", move || {
                let api = api.clone();
                let group_id = group_id.clone();
                async move { api.delete_security_group(&group_id).await }
            })
            .await?;
        }

        // Subnets cannot go while interfaces remain attached
        {
            let api = self.api.clone();
            let vpc = vpc_id.to_string();
            self.delete_with_backoff("wait for network interfaces to detach", move || {
                let api = api.clone();
                let vpc = vpc.clone();
                async move {
                    let interfaces = api.network_interfaces_in_vpc(&vpc).await?;
                    anyhow::ensure!(
                        interfaces.is_empty(),
                        "{} network interfaces still attached",
                        interfaces.len()
                    );
                    Ok(())
                }
            })
            .await?;
        }

        for subnet_id in self.api.subnets_in_vpc(vpc_id).await? {
            for interface_id in self.api.network_interfaces_in_subnet(&subnet_id).await? {
                let api = self.api.clone();
                self.delete_with_backoff("delete network interface", move || {
                    let api = api.clone();
                    let interface_id = interface_id.clone();
                    async move { api.delete_network_interface(&interface_id).await }
                })
                .await?;
            }
            let api = self.api.clone();
            self.delete_with_backoff("delete subnet", move || {
                let api = api.clone();
                let subnet_id = subnet_id.clone();
                async move { api.delete_subnet(&subnet_id).await }
            })
            .await?;
        }

        for table in self.api.route_tables_in_vpc(vpc_id).await? {
            for route in &table.routes {
                if route.is_local() {
                    continue;
                }
                let api = self.api.clone();
                let route_table_id = table.route_table_id.clone();
                let destination = route.destination.clone();
                self.delete_with_backoff("delete route", move || {
                    let api = api.clone();
                    let route_table_id = route_table_id.clone();
                    let destination = destination.clone();
                    async move { api.delete_route(&route_table_id, &destination).await }
                })
                .await?;
            }
            if !table.is_main {
                let api = self.api.clone();
                let route_table_id = table.route_table_id.clone();
                self.delete_with_backoff("delete route table", move || {
                    let api = api.clone();
                    let route_table_id = route_table_id.clone();
                    async move { api.delete_route_table(&route_table_id).await }
                })
                .await?;
            }
        }

        for gateway_id in self.api.internet_gateways_for_vpc(vpc_id).await? {
            self.api.detach_internet_gateway(&gateway_id, vpc_id).await?;
            let api = self.api.clone();
            self.delete_with_backoff("delete internet gateway", move || {
                let api = api.clone();
                let gateway_id = gateway_id.clone();
                async move { api.delete_internet_gateway(&gateway_id).await }
            })
            .await?;
        }

        {
            let api = self.api.clone();
            let vpc = vpc_id.to_string();
            self.delete_with_backoff("delete vpc", move || {
                let api = api.clone();
                let vpc = vpc.clone();
                async move { api.delete_vpc(&vpc).await }
            })
            .await?;
        }
        info!(vpc = %vpc_id, "deleted vpc");
        Ok(())
    }
}

#[async_trait]
impl Backend for AwsBackend {
    fn name(&self) -> &'static str {
        "aws"
    }

    async fn deploy(
        &self,
        tutorial: &Tutorial,
        envars: &BTreeMap<String, String>,
        _options: &DeployOptions,
    ) -> Result<Deployment> {
        self.require_auth()?;
        let uid = tutorial.uid(&self.user);

        // Short-circuit if the instance already exists: re-deploying a
        // running tutorial must not create (or bill) anything new
        let existing = self.api.instances_by_tag(&uid).await?;
        if let Some(instance) = existing.iter().find(|i| !i.is_terminated()) {
            info!(instance = %instance.instance_id, uid = %uid, "instance is already running");
            return Ok(Deployment {
                endpoint: instance
                    .public_ip
                    .as_deref()
                    .map(|ip| tutorial.endpoint_url(ip)),
            });
        }

        let vpc_id = self.ensure_vpc(&uid).await?;
        let subnet_id = self.ensure_gateway(&uid, &vpc_id).await?;
        let security_group_id = self.ensure_security_group(tutorial, &uid, &vpc_id).await?;
        let key_name = self.ensure_key_pair(&uid).await?;

        let instance_type = self.select_instance_type(tutorial).await?;
        info!(instance_type = %instance_type, "selected instance type");
        let image_id = self.api.latest_amazon_linux_ami().await?;

        let user_data = startup_script(tutorial, envars);
        debug!(script = %masked(&user_data, envars), "prepared startup script");

        let request = RunInstanceRequest {
            image_id,
            instance_type,
            user_data,
            key_name,
            subnet_id,
            security_group_id,
            uid: uid.clone(),
        };
        // Bounded: a create that keeps failing should surface quickly
        let api = self.api.clone();
        let instance_id = RetryPolicy::bounded(3)
            .run(self.sleeper.as_ref(), "run instance", move || {
                let api = api.clone();
                let request = request.clone();
                async move { api.run_instance(&request).await }
            })
            .await?;

        info!(instance = %instance_id, "waiting for instance to run");
        let instance = self.api.wait_instance_running(&instance_id).await?;
        let public_ip = instance
            .public_ip
            .context("running instance has no public address")?;

        let url = tutorial.endpoint_url(&public_ip);
        info!(url = %url, "instance is up, the tutorial may take a few minutes to come online");
        self.prober.wait_ready(&url).await?;
        Ok(Deployment {
            endpoint: Some(url),
        })
    }

    async fn stop(&self, tutorial: &Tutorial) -> Result<()> {
        self.require_auth()?;
        let uid = tutorial.uid(&self.user);

        match self.api.vpc_by_tag(&uid).await? {
            Some(vpc_id) => {
                self.teardown_vpc(&vpc_id).await?;
            }
            None => {
                // Firewalls and key material can outlive the network
                info!(uid = %uid, "there is no vpc to delete");
                if let Some(group) = self.api.security_group_by_name(&uid).await? {
                    let api = self.api.clone();
                    let group_id = group.group_id.clone();
                    self.delete_with_backoff("delete security group", move || {
                        let api = api.clone();
                        let group_id = group_id.clone();
                        async move { api.delete_security_group(&group_id).await }
                    })
                    .await?;
                }
            }
        }
        self.delete_key_artifacts(&uid).await?;
        Ok(())
    }

    async fn instances(&self) -> Result<Vec<InstanceInfo>> {
        self.require_auth()?;
        let instances = self.api.list_instances().await?;
        Ok(instances
            .into_iter()
            .map(|instance| InstanceInfo {
                name: instance.tags.get("Name").cloned(),
                id: instance.instance_id,
                status: instance.state,
                created_at: instance.launch_time,
            })
            .collect())
    }
}

/// Write key material with owner-only permissions; the content is
/// secret and ssh refuses group/world readable keys anyway.
fn write_private_key(path: &Path, material: &str) -> Result<()> {
    use std::io::Write;
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(material.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_file_naming() {
        let settings = Settings::default();
        let sleeper = Arc::new(TokioSleeper);
        let prober = Arc::new(HttpProber::new(settings.probe_config()));
        let api: Arc<dyn Ec2Api> = Arc::new(AwsCli::new("us-east-1".to_string()));
        let backend = AwsBackend::with_api(api, sleeper, prober, &settings, "dinosaur")
            .with_key_dir("/tmp/keys");
        assert_eq!(
            backend.key_file("dinosaurflux"),
            PathBuf::from("/tmp/keys/dinosaurflux.pem")
        );
    }

    #[test]
    fn test_write_private_key_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pem");
        write_private_key(&path, "KEY MATERIAL").unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "KEY MATERIAL");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        // A second write must not clobber existing key material
        assert!(write_private_key(&path, "OTHER").is_err());
    }
}
