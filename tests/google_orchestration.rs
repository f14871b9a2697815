//! Deploy/stop sequences for the Compute Engine orchestrator against a
//! scripted in-memory cloud.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;

use tutorbox::backend::google::{GceApi, GceInstance, GoogleBackend, InsertInstanceRequest};
use tutorbox::backend::{Backend, DeployOptions};
use tutorbox::readiness::{ProbeReport, Prober};
use tutorbox::retry::Sleeper;
use tutorbox::settings::Settings;
use tutorbox::tutorial::Tutorial;

struct NoopSleeper;

#[async_trait]
impl Sleeper for NoopSleeper {
    async fn sleep(&self, _duration: Duration) {}
}

/// Panics once a retry loop sleeps more often than any healthy
/// teardown should, turning an endless loop into a test failure.
struct TrippingSleeper {
    remaining: std::sync::atomic::AtomicU32,
}

impl TrippingSleeper {
    fn new(limit: u32) -> Self {
        TrippingSleeper {
            remaining: std::sync::atomic::AtomicU32::new(limit),
        }
    }
}

#[async_trait]
impl Sleeper for TrippingSleeper {
    async fn sleep(&self, _duration: Duration) {
        let left = self
            .remaining
            .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        assert!(left > 0, "retry loop did not terminate");
    }
}

struct OkProber;

#[async_trait]
impl Prober for OkProber {
    async fn wait_ready(&self, url: &str) -> Result<ProbeReport> {
        Ok(ProbeReport {
            url: url.to_string(),
            attempts: 1,
            status: StatusCode::OK,
        })
    }
}

#[derive(Default)]
struct State {
    creates: u32,
    instance: Option<GceInstance>,
    networks: Vec<String>,
    subnets: Vec<String>,
    firewalls: Vec<String>,
    not_found_instance_delete: bool,
}

#[derive(Default)]
struct MockCompute {
    state: Mutex<State>,
}

impl MockCompute {
    fn creates(&self) -> u32 {
        self.state.lock().unwrap().creates
    }

    fn is_empty(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.instance.is_none()
            && state.networks.is_empty()
            && state.subnets.is_empty()
            && state.firewalls.is_empty()
    }
}

#[async_trait]
impl GceApi for MockCompute {
    async fn list_instances(&self) -> Result<Vec<GceInstance>> {
        Ok(self.state.lock().unwrap().instance.clone().into_iter().collect())
    }

    async fn get_instance(&self, name: &str) -> Result<Option<GceInstance>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .instance
            .as_ref()
            .filter(|i| i.name == name)
            .cloned())
    }

    async fn insert_instance(&self, request: &InsertInstanceRequest) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.creates += 1;
        state.instance = Some(GceInstance {
            name: request.name.clone(),
            status: "RUNNING".to_string(),
            nat_ip: Some("203.0.113.5".to_string()),
            created_at: None,
        });
        Ok(())
    }

    async fn wait_instance_running(&self, name: &str) -> Result<GceInstance> {
        self.get_instance(name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no such instance {}", name))
    }

    async fn delete_instance(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.instance = None;
        // A racing delete already removed the instance
        if state.not_found_instance_delete {
            anyhow::bail!("The resource '{}' was not found", name);
        }
        Ok(())
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .networks
            .iter()
            .any(|n| n == name))
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.creates += 1;
        state.networks.push(name.to_string());
        Ok(())
    }

    async fn delete_network(&self, name: &str) -> Result<()> {
        self.state.lock().unwrap().networks.retain(|n| n != name);
        Ok(())
    }

    async fn subnet_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().subnets.iter().any(|s| s == name))
    }

    async fn create_subnet(&self, name: &str, _network: &str, _range: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.creates += 1;
        state.subnets.push(name.to_string());
        Ok(())
    }

    async fn delete_subnet(&self, name: &str) -> Result<()> {
        self.state.lock().unwrap().subnets.retain(|s| s != name);
        Ok(())
    }

    async fn firewall_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .firewalls
            .iter()
            .any(|f| f == name))
    }

    async fn create_ingress_firewall(
        &self,
        name: &str,
        _network: &str,
        _ports: &[u16],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.creates += 1;
        state.firewalls.push(name.to_string());
        Ok(())
    }

    async fn create_egress_firewall(&self, name: &str, _network: &str, _ports: &[u16]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.creates += 1;
        state.firewalls.push(name.to_string());
        Ok(())
    }

    async fn delete_firewall(&self, name: &str) -> Result<()> {
        self.state.lock().unwrap().firewalls.retain(|f| f != name);
        Ok(())
    }
}

fn sample_tutorial() -> Tutorial {
    Tutorial::from_value(
        "flux-intro",
        serde_json::json!({
            "tutorial": {
                "title": "Flux Tutorial: Intro",
                "container": {
                    "name": "ghcr.io/rse-ops/flux-intro:latest",
                    "ports": ["8080:80"],
                },
                "project": {"github": "rse-ops/flux-tutorials"},
            }
        }),
    )
    .unwrap()
}

fn backend_with(cloud: Arc<MockCompute>) -> GoogleBackend {
    let settings = Settings::default();
    GoogleBackend::with_api(
        cloud,
        Arc::new(NoopSleeper),
        Arc::new(OkProber),
        &settings,
        "dinosaur",
    )
}

#[tokio::test]
async fn test_deploy_provisions_then_second_deploy_creates_nothing() {
    let cloud = Arc::new(MockCompute::default());
    let backend = backend_with(cloud.clone());
    let tutorial = sample_tutorial();

    let deployment = backend
        .deploy(&tutorial, &BTreeMap::new(), &DeployOptions::default())
        .await
        .unwrap();
    assert_eq!(deployment.endpoint.as_deref(), Some("http://203.0.113.5"));
    // network, subnet, two firewall rules, instance
    assert_eq!(cloud.creates(), 5);

    let deployment = backend
        .deploy(&tutorial, &BTreeMap::new(), &DeployOptions::default())
        .await
        .unwrap();
    assert_eq!(deployment.endpoint.as_deref(), Some("http://203.0.113.5"));
    assert_eq!(cloud.creates(), 5);
}

#[tokio::test]
async fn test_stop_removes_everything() {
    let cloud = Arc::new(MockCompute::default());
    let backend = backend_with(cloud.clone());
    let tutorial = sample_tutorial();

    backend
        .deploy(&tutorial, &BTreeMap::new(), &DeployOptions::default())
        .await
        .unwrap();
    assert!(!cloud.is_empty());

    backend.stop(&tutorial).await.unwrap();
    assert!(cloud.is_empty());
}

#[tokio::test]
async fn test_stop_treats_not_found_delete_as_success() {
    let cloud = Arc::new(MockCompute::default());
    let settings = Settings::default();
    let backend = GoogleBackend::with_api(
        cloud.clone(),
        Arc::new(TrippingSleeper::new(40)),
        Arc::new(OkProber),
        &settings,
        "dinosaur",
    );
    let tutorial = sample_tutorial();

    backend
        .deploy(&tutorial, &BTreeMap::new(), &DeployOptions::default())
        .await
        .unwrap();
    cloud.state.lock().unwrap().not_found_instance_delete = true;

    // Must terminate rather than retry the not-found answer forever
    backend.stop(&tutorial).await.unwrap();
    assert!(cloud.is_empty());
}

#[tokio::test]
async fn test_stop_without_resources_is_not_an_error() {
    let cloud = Arc::new(MockCompute::default());
    let backend = backend_with(cloud.clone());
    backend.stop(&sample_tutorial()).await.unwrap();
}
