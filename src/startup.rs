//! Startup script generation for cloud instances.
//!
//! The script installs a container runtime on first boot, then pulls
//! and runs the tutorial container. Environment variable values are
//! embedded literally in the submitted script; anything logged goes
//! through [`masked`] first.

use std::collections::BTreeMap;

use crate::tutorial::Tutorial;

const INSTALL_DOCKER: &str = "#!/bin/bash
sudo apt-get update && \\
sudo apt-get install -y docker.io && \\
sudo addgroup --system docker && \\
sudo adduser $USER docker && \\
sudo newgrp docker
";

/// Build the instance user-data / startup script for a tutorial.
pub fn startup_script(tutorial: &Tutorial, envars: &BTreeMap<String, String>) -> String {
    let mut script = String::from(INSTALL_DOCKER);
    script.push_str("sudo docker pull ");
    script.push_str(tutorial.container_image());
    script.push('\n');

    script.push_str("sudo docker run -d --restart always");
    for portset in tutorial.container_ports() {
        script.push_str(" -p ");
        script.push_str(portset);
    }
    for (key, value) in envars {
        script.push_str(&format!(" --env {}={}", key, shell_words::quote(value)));
    }
    script.push(' ');
    script.push_str(tutorial.container_image());
    script.push('\n');
    script
}

/// Copy of a script or command line with environment variable values
/// replaced, safe to log.
pub fn masked(text: &str, envars: &BTreeMap<String, String>) -> String {
    let mut masked = text.to_string();
    for value in envars.values() {
        if !value.is_empty() {
            masked = masked.replace(value.as_str(), "****");
        }
    }
    masked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tutorial::Tutorial;

    fn tutorial() -> Tutorial {
        Tutorial::from_value(
            "flux",
            serde_json::json!({
                "tutorial": {
                    "title": "Flux Tutorial",
                    "container": {
                        "name": "ghcr.io/rse-ops/flux-tutorial:latest",
                        "ports": ["8080:80"],
                        "https": false
                    },
                    "project": {"github": "rse-ops/flux-tutorials"},
                    "notebooks": []
                }
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_startup_script_contents() {
        let mut envars = BTreeMap::new();
        envars.insert("GLOBAL_PASSWORD".to_string(), "squidward".to_string());
        let script = startup_script(&tutorial(), &envars);
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("docker pull ghcr.io/rse-ops/flux-tutorial:latest"));
        assert!(script.contains("-p 8080:80"));
        assert!(script.contains("--env GLOBAL_PASSWORD=squidward"));
    }

    #[test]
    fn test_masking_hides_values() {
        let mut envars = BTreeMap::new();
        envars.insert("GLOBAL_PASSWORD".to_string(), "squidward".to_string());
        let script = startup_script(&tutorial(), &envars);
        let safe = masked(&script, &envars);
        assert!(!safe.contains("squidward"));
        assert!(safe.contains("--env GLOBAL_PASSWORD=****"));
    }
}
