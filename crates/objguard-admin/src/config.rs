use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use objguard_core::{EngineConfig, GroupCreatePolicy};
use objguard_remote::RemoteOptions;
use objguard_storage::postgres::migrations::validate_namespace;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub engine: EngineSettings,
    pub remote: RemoteConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub auto_create_permissions: bool,
    pub group_create_policy: GroupPolicy,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupPolicy {
    #[default]
    GetOrCreate,
    Strict,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Empty disables `fetch-user`.
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost:5432/objguard".to_string(),
            max_connections: 5,
            namespace: "objguard".to_string(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: 30,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e.to_string()))?;
            toml::from_str::<AppConfig>(&contents)
                .map_err(|e| ConfigError::ParseToml(e.to_string()))?
        } else {
            AppConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("OBJGUARD_DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("OBJGUARD_DATABASE_MAX_CONNECTIONS")
            && let Ok(n) = v.parse()
        {
            self.database.max_connections = n;
        }
        if let Ok(v) = std::env::var("OBJGUARD_DATABASE_NAMESPACE") {
            self.database.namespace = v;
        }
        if let Ok(v) = std::env::var("OBJGUARD_ENGINE_AUTO_CREATE_PERMISSIONS")
            && let Ok(flag) = v.parse()
        {
            self.engine.auto_create_permissions = flag;
        }
        if let Ok(v) = std::env::var("OBJGUARD_ENGINE_GROUP_CREATE_POLICY") {
            match v.as_str() {
                "get_or_create" => self.engine.group_create_policy = GroupPolicy::GetOrCreate,
                "strict" => self.engine.group_create_policy = GroupPolicy::Strict,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("OBJGUARD_REMOTE_BASE_URL") {
            self.remote.base_url = v;
        }
        if let Ok(v) = std::env::var("OBJGUARD_REMOTE_TIMEOUT_SECS")
            && let Ok(n) = v.parse()
        {
            self.remote.timeout_secs = n;
        }
        if let Ok(v) = std::env::var("OBJGUARD_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Ok(v) = std::env::var("OBJGUARD_LOG_FORMAT") {
            match v.as_str() {
                "json" => self.log.format = LogFormat::Json,
                "pretty" => self.log.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be non-zero".to_string(),
            ));
        }
        if validate_namespace(&self.database.namespace).is_err() {
            return Err(ConfigError::Validation(format!(
                "database.namespace '{}' is not a valid schema name",
                self.database.namespace
            )));
        }
        if self.remote.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "remote.timeout_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            auto_create_permissions: self.engine.auto_create_permissions,
            group_create_policy: match self.engine.group_create_policy {
                GroupPolicy::GetOrCreate => GroupCreatePolicy::GetOrCreate,
                GroupPolicy::Strict => GroupCreatePolicy::Strict,
            },
        }
    }

    pub fn to_remote_options(&self) -> Result<RemoteOptions, ConfigError> {
        if self.remote.base_url.is_empty() {
            return Err(ConfigError::Validation(
                "remote.base_url must be set to fetch users".to_string(),
            ));
        }
        Ok(RemoteOptions {
            timeout: Duration::from_secs(self.remote.timeout_secs),
            ..RemoteOptions::new(self.remote.base_url.clone())
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    ReadFile(String, String),

    #[error("failed to parse TOML config: {0}")]
    ParseToml(String),

    #[error("config validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_has_sensible_values() {
        let config = AppConfig::default();

        assert_eq!(config.database.namespace, "objguard");
        assert_eq!(config.database.max_connections, 5);
        assert!(!config.engine.auto_create_permissions);
        assert_eq!(config.engine.group_create_policy, GroupPolicy::GetOrCreate);
        assert_eq!(config.remote.timeout_secs, 30);
        assert_eq!(config.log.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[database]
url = "postgresql://db:5432/perms"
namespace = "tenant_a"

[engine]
auto_create_permissions = true
group_create_policy = "strict"

[remote]
base_url = "http://users.internal/api/users"

[log]
format = "pretty"
level = "debug"
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();

        assert_eq!(config.database.url, "postgresql://db:5432/perms");
        assert_eq!(config.database.namespace, "tenant_a");
        assert!(config.engine.auto_create_permissions);
        assert_eq!(config.engine.group_create_policy, GroupPolicy::Strict);
        assert_eq!(config.remote.base_url, "http://users.internal/api/users");
        assert_eq!(config.log.format, LogFormat::Pretty);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn unreadable_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        let result = AppConfig::load(Some(&path));
        assert!(matches!(result, Err(ConfigError::ReadFile(..))));
    }

    #[test]
    fn unknown_policy_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\ngroup_create_policy = \"sometimes\"\n").unwrap();

        let result = AppConfig::load(Some(&path));
        assert!(matches!(result, Err(ConfigError::ParseToml(_))));
    }

    #[test]
    fn env_vars_override_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[remote]\ntimeout_secs = 10\n").unwrap();

        // SAFETY: test runs single-threaded for this env var
        unsafe { std::env::set_var("OBJGUARD_REMOTE_TIMEOUT_SECS", "3") };
        let config = AppConfig::load(Some(&path)).unwrap();
        unsafe { std::env::remove_var("OBJGUARD_REMOTE_TIMEOUT_SECS") };

        assert_eq!(config.remote.timeout_secs, 3);
    }

    #[test]
    fn validation_rejects_zero_max_connections() {
        let mut config = AppConfig::default();
        config.database.max_connections = 0;

        let result = config.validate();
        assert!(
            matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("max_connections"))
        );
    }

    #[test]
    fn validation_rejects_bad_namespace() {
        let mut config = AppConfig::default();
        config.database.namespace = "Robert'); DROP TABLE".to_string();

        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("namespace")));
    }

    #[test]
    fn validation_rejects_zero_remote_timeout() {
        let mut config = AppConfig::default();
        config.remote.timeout_secs = 0;

        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Validation(ref msg)) if msg.contains("timeout")));
    }

    #[test]
    fn engine_config_follows_settings() {
        let mut config = AppConfig::default();
        config.engine.auto_create_permissions = true;
        config.engine.group_create_policy = GroupPolicy::Strict;

        let engine = config.to_engine_config();
        assert!(engine.auto_create_permissions);
        assert_eq!(engine.group_create_policy, GroupCreatePolicy::Strict);
    }

    #[test]
    fn remote_options_need_base_url() {
        let mut config = AppConfig::default();
        assert!(config.to_remote_options().is_err());

        config.remote.base_url = "http://users.internal".to_string();
        config.remote.timeout_secs = 4;
        let opts = config.to_remote_options().unwrap();
        assert_eq!(opts.base_url, "http://users.internal");
        assert_eq!(opts.timeout, Duration::from_secs(4));
    }
}
