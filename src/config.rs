use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub chaser: ChaserJobConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ack_link: AckLinkConfig,
    #[serde(default)]
    pub database_maintenance: DatabaseMaintenanceConfig,
    #[serde(default)]
    pub sharepoint_field_mappings: SharePointFieldMappingsConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    pub sor_client: SorClientConfig,
    pub notify_client: NotifyClientConfig,
}

#[derive(Debug, Deserialize)]
pub struct ChaserJobConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cadence_minutes")]
    pub cadence_minutes: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_send_hour_local")]
    pub send_hour_local: u32,
    #[serde(default)]
    pub business_window: BusinessWindowConfig,
    #[serde(default = "default_thread_fallback")]
    pub thread_fallback: bool,
    #[serde(default)]
    pub safety: SafetyConfig,
    pub workflow_template_path: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_enabled() -> bool {
    true
}
fn default_cadence_minutes() -> u32 {
    5
}
fn default_batch_size() -> u32 {
    50
}
fn default_send_hour_local() -> u32 {
    9
}
fn default_thread_fallback() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct BusinessWindowConfig {
    #[serde(default = "default_start_hour_local")]
    pub start_hour_local: u32,
    #[serde(default = "default_end_hour_local")]
    pub end_hour_local: u32,
    #[serde(default)]
    pub cushion_hours: u32,
}

impl Default for BusinessWindowConfig {
    fn default() -> Self {
        Self {
            start_hour_local: default_start_hour_local(),
            end_hour_local: default_end_hour_local(),
            cushion_hours: 0,
        }
    }
}

fn default_start_hour_local() -> u32 {
    8
}
fn default_end_hour_local() -> u32 {
    18
}

#[derive(Debug, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_cool_off_minutes")]
    pub cool_off_minutes: u32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_consecutive_failures(),
            cool_off_minutes: default_cool_off_minutes(),
        }
    }
}

fn default_max_consecutive_failures() -> u32 {
    5
}
fn default_cool_off_minutes() -> u32 {
    15
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "chaser.db".to_string()
}

#[derive(Debug, Deserialize, Default)]
pub struct AckLinkConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub policy: AckPolicyConfig,
}

#[derive(Debug, Deserialize)]
pub struct AckPolicyConfig {
    #[serde(default = "default_chaser_ttl_hours")]
    pub chaser_ttl_hours: u32,
}

impl Default for AckPolicyConfig {
    fn default() -> Self {
        Self {
            chaser_ttl_hours: default_chaser_ttl_hours(),
        }
    }
}

fn default_chaser_ttl_hours() -> u32 {
    24
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseMaintenanceConfig {
    #[serde(default = "default_true")]
    pub checkpoint_enabled: bool,
    #[serde(default = "default_checkpoint_interval_hours")]
    pub checkpoint_interval_hours: u32,
    #[serde(default = "default_checkpoint_mode")]
    pub checkpoint_mode: String,
}

impl Default for DatabaseMaintenanceConfig {
    fn default() -> Self {
        Self {
            checkpoint_enabled: true,
            checkpoint_interval_hours: default_checkpoint_interval_hours(),
            checkpoint_mode: default_checkpoint_mode(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_checkpoint_interval_hours() -> u32 {
    24
}
fn default_checkpoint_mode() -> String {
    "PASSIVE".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SharePointFieldMappingsConfig {
    #[serde(default)]
    pub map: HashMap<String, String>,
}

impl SharePointFieldMappingsConfig {
    /// Resolve a logical field name to its physical name. Missing entries
    /// mean "use the logical name verbatim" (spec.md §4.5).
    pub fn resolve<'a>(&'a self, logical: &'a str) -> &'a str {
        self.map.get(logical).map(String::as_str).unwrap_or(logical)
    }
}

#[derive(Debug, Deserialize)]
pub struct SigningConfig {
    #[serde(default = "default_signing_key_name")]
    pub key_name: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            key_name: default_signing_key_name(),
        }
    }
}

fn default_signing_key_name() -> String {
    "LinkSigningKey".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_header_email")]
    pub header_email: String,
    #[serde(default = "default_header_name")]
    pub header_name: String,
    #[serde(default = "default_header_upn")]
    pub header_upn: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            header_email: default_header_email(),
            header_name: default_header_name(),
            header_upn: default_header_upn(),
        }
    }
}

fn default_header_email() -> String {
    "X-User-Email".to_string()
}
fn default_header_name() -> String {
    "X-User-Name".to_string()
}
fn default_header_upn() -> String {
    "X-User-UPN".to_string()
}

/// Base URL and token scope for the system-of-record client (C5). Not named
/// by spec.md's configuration table — added because the client it backs is
/// in scope even though its OAuth bootstrap is not (spec.md §2).
#[derive(Debug, Deserialize)]
pub struct SorClientConfig {
    pub base_url: String,
    #[serde(default = "default_token_scope")]
    pub token_scope: String,
}

/// Base URL and token scope for the chat notification client (C6). Same
/// rationale as `SorClientConfig`.
#[derive(Debug, Deserialize)]
pub struct NotifyClientConfig {
    pub base_url: String,
    #[serde(default = "default_token_scope")]
    pub token_scope: String,
}

fn default_token_scope() -> String {
    "default".to_string()
}

impl Config {
    /// Resolve the database path (relative to data_dir if not absolute).
    pub fn db_path(&self) -> PathBuf {
        let db_path = Path::new(&self.database.path);
        if db_path.is_absolute() {
            db_path.to_path_buf()
        } else {
            self.chaser.data_dir.join(db_path)
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(ConfigError::ReadFile)
        .context("reading config file")?;
    let config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.chaser.cadence_minutes < 1 {
        return Err(ConfigError::Validation("chaser.cadence_minutes must be >= 1".to_string()).into());
    }
    if config.chaser.batch_size == 0 {
        return Err(ConfigError::Validation("chaser.batch_size must be >= 1".to_string()).into());
    }
    if config.chaser.business_window.start_hour_local >= config.chaser.business_window.end_hour_local {
        return Err(ConfigError::Validation(
            "chaser.business_window.start_hour_local must be before end_hour_local".to_string(),
        )
        .into());
    }
    if config.chaser.business_window.end_hour_local > 24 {
        return Err(ConfigError::Validation("chaser.business_window.end_hour_local must be <= 24".to_string()).into());
    }
    if config.chaser.safety.max_consecutive_failures == 0 {
        return Err(ConfigError::Validation("chaser.safety.max_consecutive_failures must be >= 1".to_string()).into());
    }

    url::Url::parse(&config.ack_link.base_url)
        .map_err(|e| ConfigError::Validation(format!("ack_link.base_url '{}' is invalid: {e}", config.ack_link.base_url)))?;

    if config.ack_link.policy.chaser_ttl_hours == 0 {
        return Err(ConfigError::Validation("ack_link.policy.chaser_ttl_hours must be >= 1".to_string()).into());
    }

    match config.database_maintenance.checkpoint_mode.as_str() {
        "TRUNCATE" | "FULL" | "RESTART" | "PASSIVE" => {}
        other => {
            return Err(ConfigError::Validation(format!(
                "database_maintenance.checkpoint_mode '{other}' must be one of TRUNCATE, FULL, RESTART, PASSIVE"
            ))
            .into());
        }
    }

    if !config.chaser.workflow_template_path.exists() {
        return Err(ConfigError::Validation(format!(
            "chaser.workflow_template_path '{}' does not exist",
            config.chaser.workflow_template_path.display()
        ))
        .into());
    }

    url::Url::parse(&config.sor_client.base_url)
        .map_err(|e| ConfigError::Validation(format!("sor_client.base_url '{}' is invalid: {e}", config.sor_client.base_url)))?;
    url::Url::parse(&config.notify_client.base_url).map_err(|e| {
        ConfigError::Validation(format!("notify_client.base_url '{}' is invalid: {e}", config.notify_client.base_url))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(workflow_path: &Path) -> Config {
        toml::from_str(&format!(
            "[chaser]\nworkflow_template_path = {:?}\n[ack_link]\nbase_url = \"https://example.test\"\n\
             [sor_client]\nbase_url = \"https://sor.example.test\"\n\
             [notify_client]\nbase_url = \"https://chat.example.test\"\n",
            workflow_path
        ))
        .unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let wf = dir.path().join("workflow.json");
        std::fs::write(&wf, "{}").unwrap();
        let config = base_config(&wf);
        assert_eq!(config.chaser.cadence_minutes, 5);
        assert_eq!(config.chaser.batch_size, 50);
        assert_eq!(config.chaser.send_hour_local, 9);
        assert_eq!(config.chaser.business_window.start_hour_local, 8);
        assert_eq!(config.chaser.business_window.end_hour_local, 18);
        assert_eq!(config.ack_link.policy.chaser_ttl_hours, 24);
        assert_eq!(config.database_maintenance.checkpoint_mode, "PASSIVE");
    }

    #[test]
    fn rejects_bad_business_window() {
        let dir = tempfile::tempdir().unwrap();
        let wf = dir.path().join("workflow.json");
        std::fs::write(&wf, "{}").unwrap();
        let mut config = base_config(&wf);
        config.chaser.business_window.start_hour_local = 20;
        config.chaser.business_window.end_hour_local = 8;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_unknown_checkpoint_mode() {
        let dir = tempfile::tempdir().unwrap();
        let wf = dir.path().join("workflow.json");
        std::fs::write(&wf, "{}").unwrap();
        let mut config = base_config(&wf);
        config.database_maintenance.checkpoint_mode = "WEIRD".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn field_mapping_falls_back_to_logical_name() {
        let mappings = SharePointFieldMappingsConfig {
            map: HashMap::from([("DueDateUtc".to_string(), "Due_x0020_Date_x0020_UTC".to_string())]),
        };
        assert_eq!(mappings.resolve("DueDateUtc"), "Due_x0020_Date_x0020_UTC");
        assert_eq!(mappings.resolve("Status"), "Status");
    }
}
