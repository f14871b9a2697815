use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::TutorboxError;

/// Slugify a name: spaces, colons and slashes become `-`, runs of `-`
/// are collapsed, and the result is lowercased.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = false;
    for ch in name.chars() {
        let mapped = match ch {
            ' ' | ':' | '/' | '\\' => '-',
            other => other,
        };
        if mapped == '-' {
            if !last_dash {
                slug.push('-');
            }
            last_dash = true;
        } else {
            for lower in mapped.to_lowercase() {
                slug.push(lower);
            }
            last_dash = false;
        }
    }
    slug
}

/// Raw tutorial metadata as served by a repository's tutorials.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorialConfig {
    pub tutorial: TutorialData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorialData {
    pub title: String,
    pub container: ContainerSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    pub project: Project,
    #[serde(default)]
    pub notebooks: Vec<Notebook>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container image, e.g. ghcr.io/org/tutorial:latest
    pub name: String,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    /// Port mappings as "host:container" pairs
    #[serde(default)]
    pub ports: Vec<String>,
    /// Single port appended to the deployed endpoint URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expose: Option<u16>,
    #[serde(default)]
    pub https: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default = "default_optional")]
    pub optional: bool,
}

fn default_optional() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    /// Memory in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub github: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notebook {
    pub name: String,
    pub title: String,
}

/// Flexible cpu/memory range handed to the instance type selector.
///
/// The upper bound adds slack so a slightly larger machine still counts
/// as a fit when the exact size is not offered in the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRange {
    pub cpu_min: u32,
    pub cpu_max: u32,
    pub memory_min_mib: u32,
    pub memory_max_mib: u32,
}

/// A validated, immutable tutorial description.
///
/// Constructed once from repository metadata and never mutated. All
/// cloud resource names derive from it so that repeated deploys and
/// stops find the same resources.
#[derive(Debug, Clone, Serialize)]
pub struct Tutorial {
    pub name: String,
    #[serde(flatten)]
    config: TutorialConfig,
}

impl Tutorial {
    /// Build and validate a tutorial from raw repository metadata.
    pub fn new(name: &str, config: TutorialConfig) -> Result<Self, TutorboxError> {
        let tutorial = Tutorial {
            name: name.to_string(),
            config,
        };
        tutorial.validate()?;
        Ok(tutorial)
    }

    /// Parse a tutorial out of a JSON value (one entry of tutorials.json).
    pub fn from_value(name: &str, value: serde_json::Value) -> Result<Self, TutorboxError> {
        let config: TutorialConfig = serde_json::from_value(value)
            .map_err(|e| TutorboxError::validation(format!("tutorial {}: {}", name, e)))?;
        Tutorial::new(name, config)
    }

    fn validate(&self) -> Result<(), TutorboxError> {
        for portset in self.container_ports() {
            parse_port_pair(portset)?;
        }
        if let Some(expose) = self.expose_port() {
            let declared: Vec<u16> = self
                .container_ports()
                .iter()
                .filter_map(|p| parse_port_pair(p).ok())
                .map(|(_, container)| container)
                .collect();
            if !declared.contains(&expose) {
                return Err(TutorboxError::validation(format!(
                    "expose port {} is not among declared container ports",
                    expose
                )));
            }
        }
        Ok(())
    }

    /// Ensure every required environment variable was supplied.
    pub fn check_envars(&self, envars: &BTreeMap<String, String>) -> Result<(), TutorboxError> {
        for envar in &self.config.tutorial.container.env {
            if !envar.optional && !envars.contains_key(&envar.name) {
                return Err(TutorboxError::MissingEnv {
                    name: envar.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn title(&self) -> &str {
        &self.config.tutorial.title
    }

    pub fn container_image(&self) -> &str {
        &self.config.tutorial.container.name
    }

    pub fn container_ports(&self) -> &[String] {
        &self.config.tutorial.container.ports
    }

    pub fn container_env(&self) -> &[EnvVar] {
        &self.config.tutorial.container.env
    }

    pub fn expose_port(&self) -> Option<u16> {
        self.config.tutorial.container.expose
    }

    pub fn use_https(&self) -> bool {
        self.config.tutorial.container.https
    }

    pub fn resources(&self) -> Option<Resources> {
        self.config.tutorial.resources
    }

    pub fn project_github(&self) -> &str {
        &self.config.tutorial.project.github
    }

    pub fn notebooks(&self) -> &[Notebook] {
        &self.config.tutorial.notebooks
    }

    /// Lowercased, separator-normalized title.
    pub fn slug(&self) -> String {
        slugify(self.title())
    }

    /// Globally scoped resource name: cloud resources are namespaced per
    /// invoking user to avoid collisions between people deploying the
    /// same tutorial.
    pub fn uid(&self, user: &str) -> String {
        format!("{}{}", user, self.slug())
    }

    /// Container-side ports to open on the security boundary, always
    /// including 80 and 443.
    pub fn exposed_ports(&self) -> Vec<u16> {
        let mut ports = vec![80, 443];
        for portset in self.container_ports() {
            if let Ok((_, container)) = parse_port_pair(portset) {
                if !ports.contains(&container) {
                    ports.push(container);
                }
            }
        }
        ports.sort_unstable();
        ports
    }

    /// Deterministic firewall rule name, so repeated deploys and stops
    /// find the same rule.
    pub fn firewall_ingress_name(&self) -> String {
        format!("{}-ingress-{}", self.slug(), self.ports_suffix())
    }

    pub fn firewall_egress_name(&self) -> String {
        format!("{}-egress-{}", self.slug(), self.ports_suffix())
    }

    fn ports_suffix(&self) -> String {
        self.exposed_ports()
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join("-")
    }

    /// URL where the deployed tutorial is expected to answer.
    pub fn endpoint_url(&self, host: &str) -> String {
        let scheme = if self.use_https() { "https" } else { "http" };
        match self.expose_port() {
            Some(port) => format!("{}://{}:{}", scheme, host, port),
            None => format!("{}://{}", scheme, host),
        }
    }

    /// Resource range for the instance selector, or None when the
    /// tutorial declares no resource hints.
    pub fn flexible_resources(&self) -> Option<ResourceRange> {
        let resources = self.resources()?;
        let cpu = resources.cpu?;
        let memory = resources.memory?;
        Some(ResourceRange {
            cpu_min: cpu,
            cpu_max: cpu * 2,
            memory_min_mib: memory,
            memory_max_mib: memory * 2,
        })
    }

    pub fn config(&self) -> &TutorialConfig {
        &self.config
    }
}

/// Parse a "host:container" port pair into two integers.
pub fn parse_port_pair(portset: &str) -> Result<(u16, u16), TutorboxError> {
    let mut parts = portset.split(':');
    let (host, container) = match (parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(c), None) => (h, c),
        _ => {
            return Err(TutorboxError::validation(format!(
                "port set {} must contain exactly one ':' separator",
                portset
            )))
        }
    };
    let host: u16 = host.parse().map_err(|_| {
        TutorboxError::validation(format!("port {} does not convert to an integer", host))
    })?;
    let container: u16 = container.parse().map_err(|_| {
        TutorboxError::validation(format!("port {} does not convert to an integer", container))
    })?;
    Ok((host, container))
}

/// A named collection of validated tutorials.
#[derive(Debug, Default, Clone)]
pub struct Tutorials {
    tutorials: BTreeMap<String, Tutorial>,
}

impl Tutorials {
    pub fn new() -> Self {
        Tutorials::default()
    }

    /// Insert a tutorial, skipping (with a warning) any that fail validation.
    pub fn add(&mut self, name: &str, value: serde_json::Value) {
        match Tutorial::from_value(name, value) {
            Ok(tutorial) => {
                self.tutorials.insert(name.to_string(), tutorial);
            }
            Err(e) => {
                tracing::warn!(tutorial = name, error = %e, "tutorial is not valid, skipping");
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Tutorial> {
        self.tutorials.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tutorials.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tutorial> {
        self.tutorials.values()
    }

    pub fn len(&self) -> usize {
        self.tutorials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tutorials.is_empty()
    }

    /// JSON dump of the whole set, keyed by name.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, tutorial) in &self.tutorials {
            if let Ok(value) = serde_json::to_value(&tutorial.config) {
                map.insert(name.clone(), value);
            }
        }
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tutorial_json(ports: &[&str], expose: Option<u16>) -> serde_json::Value {
        serde_json::json!({
            "tutorial": {
                "title": "Flux Tutorial: Intro",
                "container": {
                    "name": "ghcr.io/rse-ops/flux-tutorial:latest",
                    "ports": ports,
                    "expose": expose,
                    "https": true,
                    "env": [
                        {"name": "GLOBAL_PASSWORD", "optional": false},
                        {"name": "EXTRA", "optional": true}
                    ]
                },
                "project": {"github": "rse-ops/flux-tutorials"},
                "notebooks": []
            }
        })
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Flux Tutorial: Intro"), "flux-tutorial-intro");
        assert_eq!(slugify("a/b\\c"), "a-b-c");
        assert_eq!(slugify("Plain"), "plain");
    }

    #[test]
    fn test_valid_ports() {
        let t = Tutorial::from_value("flux", tutorial_json(&["8080:80", "8443:443"], Some(80)));
        assert!(t.is_ok());
    }

    #[test]
    fn test_port_missing_separator() {
        let t = Tutorial::from_value("flux", tutorial_json(&["8080"], None));
        assert!(matches!(t, Err(TutorboxError::Validation(_))));
    }

    #[test]
    fn test_port_non_integer() {
        let t = Tutorial::from_value("flux", tutorial_json(&["web:80"], None));
        assert!(matches!(t, Err(TutorboxError::Validation(_))));
        let t = Tutorial::from_value("flux", tutorial_json(&["80:web"], None));
        assert!(matches!(t, Err(TutorboxError::Validation(_))));
    }

    #[test]
    fn test_port_too_many_separators() {
        let t = Tutorial::from_value("flux", tutorial_json(&["1:2:3"], None));
        assert!(matches!(t, Err(TutorboxError::Validation(_))));
    }

    #[test]
    fn test_expose_must_be_declared() {
        let t = Tutorial::from_value("flux", tutorial_json(&["8080:80", "8443:443"], Some(22)));
        assert!(matches!(t, Err(TutorboxError::Validation(_))));
    }

    #[test]
    fn test_derived_names() {
        let t =
            Tutorial::from_value("flux", tutorial_json(&["8080:80", "8888:8888"], Some(8888)))
                .unwrap();
        assert_eq!(t.slug(), "flux-tutorial-intro");
        assert_eq!(t.uid("dinosaur"), "dinosaurflux-tutorial-intro");
        assert_eq!(t.exposed_ports(), vec![80, 443, 8888]);
        assert_eq!(
            t.firewall_ingress_name(),
            "flux-tutorial-intro-ingress-80-443-8888"
        );
        assert_eq!(
            t.firewall_egress_name(),
            "flux-tutorial-intro-egress-80-443-8888"
        );
    }

    #[test]
    fn test_endpoint_url() {
        let t = Tutorial::from_value("flux", tutorial_json(&["8080:80"], Some(80))).unwrap();
        assert_eq!(t.endpoint_url("1.2.3.4"), "https://1.2.3.4:80");
        let t = Tutorial::from_value("flux", tutorial_json(&["8080:80"], None)).unwrap();
        assert_eq!(t.endpoint_url("1.2.3.4"), "https://1.2.3.4");
    }

    #[test]
    fn test_check_envars() {
        let t = Tutorial::from_value("flux", tutorial_json(&["8080:80"], None)).unwrap();
        let mut envars = BTreeMap::new();
        assert!(matches!(
            t.check_envars(&envars),
            Err(TutorboxError::MissingEnv { .. })
        ));
        envars.insert("GLOBAL_PASSWORD".to_string(), "squidward".to_string());
        assert!(t.check_envars(&envars).is_ok());
    }

    #[test]
    fn test_invalid_tutorial_skipped() {
        let mut set = Tutorials::new();
        set.add("good", tutorial_json(&["8080:80"], None));
        set.add("bad", tutorial_json(&["nope"], None));
        assert_eq!(set.len(), 1);
        assert!(set.get("good").is_some());
        assert!(set.get("bad").is_none());
    }
}
