//! Compute Engine orchestration.
//!
//! Same shape as the EC2 side: idempotent ensure steps keyed on
//! deterministic names, a bounded retry around the create call, and a
//! reverse-order teardown where every delete runs under an unbounded
//! backoff and absence counts as success.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use super::api::{GceApi, InsertInstanceRequest};
use super::cli::GcloudCli;
use crate::backend::{Backend, DeployOptions, Deployment, InstanceInfo};
use crate::errors::TutorboxError;
use crate::readiness::{HttpProber, Prober};
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::settings::Settings;
use crate::startup::{masked, startup_script};
use crate::tutorial::Tutorial;

/// Fixed address range for the tutorial's subnet.
const CIDR_BLOCK: &str = "192.168.1.0/24";

pub struct GoogleBackend {
    api: Arc<dyn GceApi>,
    sleeper: Arc<dyn Sleeper>,
    prober: Arc<dyn Prober>,
    machine_type: String,
    user: String,
    has_auth: bool,
}

impl GoogleBackend {
    /// Connect to Compute Engine via the gcloud cli. Authentication
    /// failure is recorded and surfaced on the first real operation.
    pub async fn connect(settings: &Settings, user: &str) -> Result<Self> {
        let cli = GcloudCli::new(settings.google_zone(), settings.google_project());
        let has_auth = cli.probe_auth().await;
        if !has_auth {
            debug!("unable to authenticate to Compute Engine, operations will fail until credentials work");
        }
        let mut backend = GoogleBackend::with_api(
            Arc::new(cli),
            Arc::new(TokioSleeper),
            Arc::new(HttpProber::new(settings.probe_config())),
            settings,
            user,
        );
        backend.has_auth = has_auth;
        Ok(backend)
    }

    pub fn with_api(
        api: Arc<dyn GceApi>,
        sleeper: Arc<dyn Sleeper>,
        prober: Arc<dyn Prober>,
        settings: &Settings,
        user: &str,
    ) -> Self {
        GoogleBackend {
            api,
            sleeper,
            prober,
            machine_type: settings.google_instance(),
            user: user.to_string(),
            has_auth: true,
        }
    }

    fn require_auth(&self) -> Result<()> {
        if !self.has_auth {
            return Err(TutorboxError::Authentication { backend: "google" }.into());
        }
        Ok(())
    }

    async fn ensure_network(&self, uid: &str) -> Result<()> {
        if self.api.network_exists(uid).await? {
            debug!(network = uid, "reusing existing network");
            return Ok(());
        }
        self.api.create_network(uid).await?;
        info!(network = uid, "created network");
        Ok(())
    }

    async fn ensure_subnet(&self, uid: &str) -> Result<()> {
        if self.api.subnet_exists(uid).await? {
            debug!(subnet = uid, "reusing existing subnet");
            return Ok(());
        }
        self.api.create_subnet(uid, uid, CIDR_BLOCK).await?;
        info!(subnet = uid, cidr = CIDR_BLOCK, "created subnet");
        Ok(())
    }

    /// Firewall rule names encode the port list, so a tutorial whose
    /// ports changed gets fresh rules instead of silently reusing stale
    /// ones.
    async fn ensure_firewalls(&self, tutorial: &Tutorial, uid: &str) -> Result<()> {
        let ports = tutorial.exposed_ports();
        let ingress = tutorial.firewall_ingress_name();
        if !self.api.firewall_exists(&ingress).await? {
            self.api.create_ingress_firewall(&ingress, uid, &ports).await?;
            info!(firewall = %ingress, "created ingress firewall");
        }
        let egress = tutorial.firewall_egress_name();
        if !self.api.firewall_exists(&egress).await? {
            self.api.create_egress_firewall(&egress, uid, &ports).await?;
            info!(firewall = %egress, "created egress firewall");
        }
        Ok(())
    }

    /// Unbounded retry for teardown; "no such resource" answers count
    /// as success instead of spinning the loop.
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
}

#[async_trait]
impl Backend for GoogleBackend {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn deploy(
        &self,
        tutorial: &Tutorial,
        envars: &BTreeMap<String, String>,
        _options: &DeployOptions,
    ) -> Result<Deployment> {
        self.require_auth()?;
        let uid = tutorial.uid(&self.user);

        // Re-deploying a running tutorial must not create anything new
        if let Some(instance) = self.api.get_instance(&uid).await? {
            if !instance.is_terminated() {
                info!(instance = %instance.name, "instance is already running");
                return Ok(Deployment {
                    endpoint: instance
                        .nat_ip
                        .as_deref()
                        .map(|ip| tutorial.endpoint_url(ip)),
                });
            }
        }

        self.ensure_network(&uid).await?;
        self.ensure_subnet(&uid).await?;
        self.ensure_firewalls(tutorial, &uid).await?;

        let user_data = startup_script(tutorial, envars);
        debug!(script = %masked(&user_data, envars), "prepared startup script");

        let request = InsertInstanceRequest {
            name: uid.clone(),
            machine_type: self.machine_type.clone(),
            network: uid.clone(),
            subnet: uid.clone(),
            startup_script: user_data,
        };
        let api = self.api.clone();
        RetryPolicy::bounded(3)
            .run(self.sleeper.as_ref(), "create instance", move || {
                let api = api.clone();
                let request = request.clone();
                async move { api.insert_instance(&request).await }
            })
            .await?;

        info!(instance = %uid, "waiting for instance to run");
        let instance = self.api.wait_instance_running(&uid).await?;
        let nat_ip = instance
            .nat_ip
            .context("running instance has no external address")?;

        let url = tutorial.endpoint_url(&nat_ip);
        info!(url = %url, "instance is up, the tutorial may take a few minutes to come online");
        self.prober.wait_ready(&url).await?;
        Ok(Deployment {
            endpoint: Some(url),
        })
    }

    async fn stop(&self, tutorial: &Tutorial) -> Result<()> {
        self.require_auth()?;
        let uid = tutorial.uid(&self.user);

        if self.api.get_instance(&uid).await?.is_some() {
            let api = self.api.clone();
            let name = uid.clone();
            self.delete_with_backoff("delete instance", move || {
                let api = api.clone();
                let name = name.clone();
                async move { api.delete_instance(&name).await }
            })
            .await?;
            info!(instance = %uid, "deleted instance");
        } else {
            info!(instance = %uid, "there is no instance to delete");
        }

        for firewall in [
            tutorial.firewall_ingress_name(),
            tutorial.firewall_egress_name(),
        ] {
            let api = self.api.clone();
            self.delete_with_backoff("delete firewall", move || {
                let api = api.clone();
                let firewall = firewall.clone();
                async move { api.delete_firewall(&firewall).await }
            })
            .await?;
        }

        // Subnet before network; the network delete fails while the
        // subnet is still attached
        {
            let api = self.api.clone();
            let name = uid.clone();
            self.delete_with_backoff("delete subnet", move || {
                let api = api.clone();
                let name = name.clone();
                async move { api.delete_subnet(&name).await }
            })
            .await?;
        }
        {
            let api = self.api.clone();
            let name = uid.clone();
            self.delete_with_backoff("delete network", move || {
                let api = api.clone();
                let name = name.clone();
                async move { api.delete_network(&name).await }
            })
            .await?;
        }
        Ok(())
    }

    async fn instances(&self) -> Result<Vec<InstanceInfo>> {
        self.require_auth()?;
        let instances = self.api.list_instances().await?;
        Ok(instances
            .into_iter()
            .map(|instance| InstanceInfo {
                id: instance.name.clone(),
                name: Some(instance.name),
                status: instance.status,
                created_at: instance.created_at,
            })
            .collect())
    }
}
