//! Configuration loading.
//!
//! Four YAML files live in the configuration directory: `app_config.yaml`
//! (service settings, env-overridable with the `SENTINEL` prefix),
//! `nodes.yaml` (inventory), `profiles.yaml` (profile → task class → probes)
//! and `thresholds.yaml` (flat threshold mapping consumed by probes). The
//! optional files fall back to defaults; an unparseable file is fatal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError as SourceError, Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{info, warn};

use crate::catalog::AlertGroup;
use crate::model::{NodeSpec, TaskClass};

const APP_CONFIG_FILE: &str = "app_config.yaml";
const NODES_FILE: &str = "nodes.yaml";
const PROFILES_FILE: &str = "profiles.yaml";
const THRESHOLDS_FILE: &str = "thresholds.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid app configuration: {0}")]
    App(#[from] SourceError),
}

/// Service settings. YAML keys are upper-case on disk (`SQLITE_DB_PATH`,
/// `FEISHU_WEBHOOKS`, ...); the loader is case-insensitive, so the fields
/// here use the lowered form. Environment overrides use the `SENTINEL`
/// prefix with `__` as the nesting separator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sqlite_db_path: String,
    pub mysql: Option<MysqlSettings>,
    pub feishu_webhooks: WebhookSettings,
    pub max_workers: usize,
    pub gpu_check_interval_seconds: u64,
    pub system_check_interval_minutes: u64,
    pub network_check_interval_minutes: u64,
    pub storage_check_interval_minutes: u64,
    pub daily_digest_time: String,
    pub timezone_offset_hours: i32,
    pub log_level: String,
    pub debounce_window_seconds: u64,
    pub shutdown_grace_seconds: u64,
    pub ssh_connect_timeout_seconds: u64,
    pub ssh_command_timeout_seconds: u64,
    pub ssh_retries: u32,
    pub ssh_retry_delay_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sqlite_db_path: "sentinel_state.db".to_string(),
            mysql: None,
            feishu_webhooks: WebhookSettings::default(),
            max_workers: 5,
            gpu_check_interval_seconds: 30,
            system_check_interval_minutes: 10,
            network_check_interval_minutes: 5,
            storage_check_interval_minutes: 10,
            daily_digest_time: "09:00".to_string(),
            timezone_offset_hours: 8,
            log_level: "info".to_string(),
            debounce_window_seconds: 60,
            shutdown_grace_seconds: 30,
            ssh_connect_timeout_seconds: 10,
            ssh_command_timeout_seconds: 15,
            ssh_retries: 3,
            ssh_retry_delay_seconds: 5,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(Environment::with_prefix("SENTINEL").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn interval_for(&self, class: TaskClass) -> Duration {
        match class {
            TaskClass::Gpu => Duration::from_secs(self.gpu_check_interval_seconds),
            TaskClass::System => Duration::from_secs(self.system_check_interval_minutes * 60),
            TaskClass::Network => Duration::from_secs(self.network_check_interval_minutes * 60),
            TaskClass::Storage => Duration::from_secs(self.storage_check_interval_minutes * 60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MysqlSettings {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db_name: String,
}

fn default_mysql_port() -> u16 {
    3306
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    pub hardware_group: Option<String>,
    pub software_group: Option<String>,
    pub analytics_group: Option<String>,
    pub table_sync_webhook: Option<String>,
}

impl WebhookSettings {
    pub fn url_for(&self, group: AlertGroup) -> Option<&str> {
        match group {
            AlertGroup::Hardware => self.hardware_group.as_deref(),
            AlertGroup::Software => self.software_group.as_deref(),
            AlertGroup::Analytics => self.analytics_group.as_deref(),
        }
    }
}

/// Flat threshold mapping handed to probe command producers and parsers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub gpu_count: i64,
    pub gpu_temp: i64,
    pub gpu_high_temp: i64,
    pub nvlink_bridge_count: i64,
    pub expected_ibdev_count: i64,
    pub expected_ip_rule_count: i64,
    pub gpfs_mount_path: String,
    pub disk_usage_percent: i64,
    pub memory_usage_percent: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            gpu_count: 8,
            gpu_temp: 80,
            gpu_high_temp: 85,
            nvlink_bridge_count: 4,
            expected_ibdev_count: 8,
            expected_ip_rule_count: 19,
            gpfs_mount_path: "/gpfs/pvc".to_string(),
            disk_usage_percent: 85,
            memory_usage_percent: 85,
        }
    }
}

/// Profile → task class → ordered probe names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProfileBook {
    profiles: HashMap<String, HashMap<String, Vec<String>>>,
}

impl ProfileBook {
    pub fn probes_for(&self, profile: &str, class: TaskClass) -> &[String] {
        self.profiles
            .get(profile)
            .and_then(|classes| classes.get(class.as_str()))
            .map(|names| names.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NodesFile {
    nodes: Vec<NodeSpec>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ThresholdsFile {
    thresholds: Thresholds,
}

/// Everything the runtime needs, loaded once at boot.
#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub app: AppConfig,
    pub nodes: Vec<NodeSpec>,
    pub profiles: ProfileBook,
    pub thresholds: Thresholds,
}

impl ConfigBundle {
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let app = AppConfig::load(&dir.join(APP_CONFIG_FILE))?;
        let nodes: NodesFile = load_yaml(&dir.join(NODES_FILE), "node inventory")?;
        let profiles: ProfileBook = load_yaml(&dir.join(PROFILES_FILE), "profiles")?;
        let thresholds: ThresholdsFile = load_yaml(&dir.join(THRESHOLDS_FILE), "thresholds")?;

        info!(
            nodes = nodes.nodes.len(),
            profiles = profiles.len(),
            "configuration loaded"
        );

        Ok(Self {
            app,
            nodes: nodes.nodes,
            profiles,
            thresholds: thresholds.thresholds,
        })
    }
}

fn load_yaml<T: DeserializeOwned + Default>(path: &Path, what: &str) -> Result<T, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "{what} configuration not found, using defaults");
            Ok(T::default())
        }
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_default_to_spec_values() {
        let thresholds = Thresholds::default();
        assert_eq!(thresholds.gpu_count, 8);
        assert_eq!(thresholds.gpu_temp, 80);
        assert_eq!(thresholds.gpu_high_temp, 85);
        assert_eq!(thresholds.expected_ip_rule_count, 19);
        assert_eq!(thresholds.gpfs_mount_path, "/gpfs/pvc");
    }

    #[test]
    fn partial_thresholds_file_keeps_defaults() {
        let yaml = "thresholds:\n  gpu_count: 4\n";
        let file: ThresholdsFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.thresholds.gpu_count, 4);
        assert_eq!(file.thresholds.gpu_high_temp, 85);
    }

    #[test]
    fn profile_book_lookup() {
        let yaml = r#"
profiles:
  nvidia_datacenter:
    gpu: [gpu.count, gpu.temperature]
    system: [system.disk_usage]
  unknown: {}
"#;
        let book: ProfileBook = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            book.probes_for("nvidia_datacenter", TaskClass::Gpu),
            ["gpu.count".to_string(), "gpu.temperature".to_string()]
        );
        assert!(book.probes_for("nvidia_datacenter", TaskClass::Network).is_empty());
        assert!(book.probes_for("unknown", TaskClass::Gpu).is_empty());
        assert!(book.probes_for("missing", TaskClass::Gpu).is_empty());
    }

    #[test]
    fn nodes_file_parses_inventory() {
        let yaml = r#"
nodes:
  - host: 10.0.0.1
    hostname: gpu-node-01
    username: ops
    password: secret
  - host: 10.0.0.2
    username: ops
    password: secret
    port: 2222
"#;
        let file: NodesFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.nodes.len(), 2);
        assert_eq!(file.nodes[0].display(), "gpu-node-01");
        assert_eq!(file.nodes[1].port, 2222);
    }

    #[test]
    fn app_config_defaults() {
        let app = AppConfig::default();
        assert_eq!(app.max_workers, 5);
        assert_eq!(app.gpu_check_interval_seconds, 30);
        assert_eq!(app.interval_for(TaskClass::System), Duration::from_secs(600));
        assert_eq!(app.interval_for(TaskClass::Network), Duration::from_secs(300));
        assert_eq!(app.daily_digest_time, "09:00");
        assert!(app.mysql.is_none());
    }
}
