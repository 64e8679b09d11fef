//! Daemon configuration.
//!
//! Loaded from a TOML file; every section has defaults so a bare
//! `sandgridd serve` works against the stub runtime.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use sandgrid_core::{EngineKind, ResourceLimit};

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub lifecycle: LifecycleSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub warm_pool: WarmPoolSection,
    #[serde(default)]
    pub reaper: ReaperSection,
    /// Statically configured runtime nodes, registered at startup.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Base URL agents use for result callbacks.
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,
    #[serde(default = "default_callback_secret")]
    pub callback_secret: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_dir: default_data_dir(),
            callback_base_url: default_callback_base_url(),
            callback_secret: default_callback_secret(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Which container backend to use: currently `stub`; `docker` and
    /// `kubernetes` backends plug in through the same capability trait.
    #[serde(default = "default_engine")]
    pub engine: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LifecycleSection {
    /// Allowed templates; empty admits any.
    #[serde(default)]
    pub templates: BTreeSet<String>,
    #[serde(default = "default_session_timeout")]
    pub default_session_timeout_secs: u64,
    #[serde(default = "default_execution_timeout")]
    pub default_execution_timeout_secs: u64,
    #[serde(default = "default_max_execution_timeout")]
    pub max_execution_timeout_secs: u64,
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            templates: BTreeSet::new(),
            default_session_timeout_secs: default_session_timeout(),
            default_execution_timeout_secs: default_execution_timeout(),
            max_execution_timeout_secs: default_max_execution_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorSection {
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_failure_threshold")]
    pub node_failure_threshold: u32,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            agent_port: default_agent_port(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            node_failure_threshold: default_failure_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarmPoolSection {
    #[serde(default = "default_max_idle")]
    pub max_idle_secs: u64,
    #[serde(default = "default_replenish_interval")]
    pub replenish_interval_secs: u64,
    #[serde(default)]
    pub targets: Vec<WarmTargetConfig>,
}

impl Default for WarmPoolSection {
    fn default() -> Self {
        Self {
            max_idle_secs: default_max_idle(),
            replenish_interval_secs: default_replenish_interval(),
            targets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarmTargetConfig {
    pub template_id: String,
    #[serde(default = "default_per_node")]
    pub per_node: u32,
    #[serde(default = "default_cpu")]
    pub cpu_cores: f64,
    #[serde(default = "default_memory")]
    pub memory_mb: u64,
    #[serde(default = "default_disk")]
    pub disk_mb: u64,
}

impl WarmTargetConfig {
    pub fn resources(&self) -> Result<ResourceLimit, sandgrid_core::DomainError> {
        ResourceLimit::new(self.cpu_cores, self.memory_mb, self.disk_mb)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaperSection {
    #[serde(default = "default_reaper_interval")]
    pub interval_secs: u64,
}

impl Default for ReaperSection {
    fn default() -> Self {
        Self {
            interval_secs: default_reaper_interval(),
        }
    }
}

/// A statically configured runtime node.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub id: String,
    #[serde(default = "default_node_engine")]
    pub engine: EngineKind,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    pub total_cpu: f64,
    pub total_memory_mb: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,
}

impl DaemonConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.executor.request_timeout_secs)
    }
}

fn default_port() -> u16 {
    8443
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/sandgrid")
}
fn default_callback_base_url() -> String {
    "http://127.0.0.1:8443".to_string()
}
fn default_callback_secret() -> String {
    "dev-secret".to_string()
}
fn default_engine() -> String {
    "stub".to_string()
}
fn default_session_timeout() -> u64 {
    300
}
fn default_execution_timeout() -> u64 {
    30
}
fn default_max_execution_timeout() -> u64 {
    900
}
fn default_agent_port() -> u16 {
    8194
}
fn default_request_timeout() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_max_idle() -> u64 {
    600
}
fn default_replenish_interval() -> u64 {
    10
}
fn default_per_node() -> u32 {
    1
}
fn default_cpu() -> f64 {
    1.0
}
fn default_memory() -> u64 {
    512
}
fn default_disk() -> u64 {
    1024
}
fn default_reaper_interval() -> u64 {
    15
}
fn default_node_engine() -> EngineKind {
    EngineKind::Stub
}
fn default_endpoint() -> String {
    "127.0.0.1:0".to_string()
}
fn default_max_sessions() -> u32 {
    20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_an_empty_config() {
        let config: DaemonConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8443);
        assert_eq!(config.runtime.engine, "stub");
        assert_eq!(config.executor.max_retries, 3);
        assert!(config.nodes.is_empty());
        assert!(config.warm_pool.targets.is_empty());
    }

    #[test]
    fn full_config_parses() {
        let text = r#"
            [server]
            port = 9000
            data_dir = "/tmp/sandgrid"
            callback_secret = "s3cret"

            [lifecycle]
            templates = ["python-3.12", "node-22"]
            default_session_timeout_secs = 120

            [executor]
            agent_port = 9194
            max_retries = 5

            [warm_pool]
            max_idle_secs = 300
            replenish_interval_secs = 5

            [[warm_pool.targets]]
            template_id = "python-3.12"
            per_node = 2
            memory_mb = 1024

            [reaper]
            interval_secs = 30

            [[nodes]]
            id = "node-a"
            engine = "stub"
            total_cpu = 8.0
            total_memory_mb = 16384
            max_sessions = 10
        "#;
        let config: DaemonConfig = toml::from_str(text).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.lifecycle.templates.len(), 2);
        assert_eq!(config.executor.max_retries, 5);
        assert_eq!(config.warm_pool.targets.len(), 1);
        assert_eq!(config.warm_pool.targets[0].per_node, 2);
        assert_eq!(config.warm_pool.targets[0].memory_mb, 1024);
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.nodes[0].max_sessions, 10);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<DaemonConfig, _> = toml::from_str("[server]\nprot = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn warm_target_resources_validate() {
        let target = WarmTargetConfig {
            template_id: "t".to_string(),
            per_node: 1,
            cpu_cores: 0.0,
            memory_mb: 512,
            disk_mb: 1024,
        };
        assert!(target.resources().is_err());
    }
}
