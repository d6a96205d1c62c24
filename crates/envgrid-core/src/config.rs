//! envgrid.toml configuration parser.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::RuntimeKind;

/// Variable names a per-request override may never replace.
pub const PROTECTED_KEYS: &[&str] = &[
    "TEMPLATES_DIR",
    "VARS_DIR",
    "TEMPLATE",
    "VARIABLES",
    "PATH",
    "DEPLOYMENTS_DIR",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvgridConfig {
    /// Root under which one directory per deployment is created.
    pub deployments_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub vars_dir: PathBuf,
    /// Default template file name inside `templates_dir`.
    pub template: String,
    /// Default YAML variables file name inside `vars_dir`.
    pub variables: String,
    pub runtime: RuntimeKind,
    pub max_deployments: usize,
    /// Aggregate memory ceiling in percent. `None` disables the check.
    pub max_memory_percent: Option<f64>,
    pub metadata_capacity: usize,
    pub expire_after_minutes: u64,
    pub expiry_interval_secs: u64,
    pub delete_period_minutes: u64,
    pub reclaim_interval_secs: u64,
    /// Fragment used to find the control plane's own network.
    pub network_fragment: String,
    /// Discovery endpoint injected into self-registering manifests.
    pub discovery_server: Option<String>,
    pub forward_timeout_secs: u64,
    pub forward_default_port: u16,
    /// Background command runs kept for polling, finished or not.
    pub command_runs_capacity: usize,
    /// Extra process-wide template variables.
    pub variables_table: HashMap<String, String>,
}

impl Default for EnvgridConfig {
    fn default() -> Self {
        Self {
            deployments_dir: PathBuf::from("/var/lib/envgrid/deployments"),
            templates_dir: PathBuf::from("/etc/envgrid/templates"),
            vars_dir: PathBuf::from("/etc/envgrid/variables"),
            template: "docker-compose.yml".to_string(),
            variables: "variables.yml".to_string(),
            runtime: RuntimeKind::Docker,
            max_deployments: 10,
            max_memory_percent: None,
            metadata_capacity: 100,
            expire_after_minutes: 1440,
            expiry_interval_secs: 1200,
            delete_period_minutes: 60,
            reclaim_interval_secs: 120,
            network_fragment: "envgrid".to_string(),
            discovery_server: None,
            forward_timeout_secs: 5,
            forward_default_port: 8080,
            command_runs_capacity: 64,
            variables_table: HashMap::new(),
        }
    }
}

impl EnvgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EnvgridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn expire_after(&self) -> Duration {
        Duration::from_secs(self.expire_after_minutes.saturating_mul(60))
    }

    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs)
    }

    pub fn delete_period(&self) -> Duration {
        Duration::from_secs(self.delete_period_minutes.saturating_mul(60))
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }

    /// The process-wide variable layer: the given environment, then the
    /// `variables_table` from the config file, then the directory settings.
    ///
    /// Later layers win, so directory settings always reflect this config.
    pub fn process_variables<I>(&self, env: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut vars: HashMap<String, String> = env.into_iter().collect();
        vars.extend(self.variables_table.clone());
        vars.insert(
            "TEMPLATES_DIR".to_string(),
            self.templates_dir.display().to_string(),
        );
        vars.insert("VARS_DIR".to_string(), self.vars_dir.display().to_string());
        vars.insert("TEMPLATE".to_string(), self.template.clone());
        vars.insert("VARIABLES".to_string(), self.variables.clone());
        vars.insert(
            "DEPLOYMENTS_DIR".to_string(),
            self.deployments_dir.display().to_string(),
        );
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal() {
        let config: EnvgridConfig = toml::from_str("max_deployments = 3\n").unwrap();
        assert_eq!(config.max_deployments, 3);
        assert_eq!(config.metadata_capacity, 100);
        assert_eq!(config.reclaim_interval_secs, 120);
        assert_eq!(config.runtime, RuntimeKind::Docker);
    }

    #[test]
    fn parse_full() {
        let toml_str = r#"
deployments_dir = "/tmp/deployments"
runtime = "kubectl"
max_memory_percent = 80.0
expire_after_minutes = 1
discovery_server = "http://eureka:8080/eureka/v2"

[variables_table]
REGISTRY = "registry.local"
"#;
        let config: EnvgridConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.runtime, RuntimeKind::Kubectl);
        assert_eq!(config.max_memory_percent, Some(80.0));
        assert_eq!(config.expire_after(), Duration::from_secs(60));
        assert_eq!(config.variables_table["REGISTRY"], "registry.local");
    }

    #[test]
    fn roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envgrid.toml");
        let mut config = EnvgridConfig::default();
        config.max_deployments = 7;
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = EnvgridConfig::from_file(&path).unwrap();
        assert_eq!(loaded.max_deployments, 7);
    }

    #[test]
    fn process_variables_pin_directory_settings() {
        let config = EnvgridConfig::default();
        let env = vec![
            ("HOME".to_string(), "/root".to_string()),
            ("TEMPLATES_DIR".to_string(), "/elsewhere".to_string()),
        ];
        let vars = config.process_variables(env);
        assert_eq!(vars["HOME"], "/root");
        assert_eq!(vars["TEMPLATES_DIR"], "/etc/envgrid/templates");
    }

    #[test]
    fn huge_minute_values_saturate() {
        let config = EnvgridConfig {
            expire_after_minutes: u64::MAX,
            delete_period_minutes: u64::MAX / 2,
            ..EnvgridConfig::default()
        };
        assert_eq!(config.expire_after(), Duration::from_secs(u64::MAX));
        assert_eq!(config.delete_period(), Duration::from_secs(u64::MAX));
    }
}
