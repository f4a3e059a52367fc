use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::{AppOptions, AppOptionsBuilder, Signal};
use crate::services::transport::GrpcServerBuilder;
use crate::services::transport::server::{DEFAULT_ADDRESS, DEFAULT_NETWORK};

/// 环境变量前缀，例如 `STRATUS_APP_NAME`
pub const ENV_PREFIX: &str = "STRATUS_";

/// 默认配置文件
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read environment overrides: {0}")]
    Env(#[from] envy::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub server: ServerConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 未设置时启动时生成
    pub id: Option<String>,
    pub name: String,
    pub version: String,
    pub metadata: HashMap<String, String>,
    /// 显式公布的端点
    pub endpoints: Vec<String>,
    pub registry_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub signals: Vec<Signal>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            id: None,
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            metadata: HashMap::new(),
            endpoints: Vec::new(),
            registry_timeout_secs: 10,
            stop_timeout_secs: 10,
            signals: Signal::defaults(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: String,
    pub address: String,
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: DEFAULT_NETWORK.to_string(),
            address: DEFAULT_ADDRESS.to_string(),
            timeout_secs: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

// 环境变量覆盖项，字段名去掉前缀后与变量名对应
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    app_id: Option<String>,
    app_name: Option<String>,
    app_version: Option<String>,
    app_endpoints: Option<Vec<String>>,
    app_registry_timeout_secs: Option<u64>,
    app_stop_timeout_secs: Option<u64>,
    server_network: Option<String>,
    server_address: Option<String>,
    server_timeout_secs: Option<u64>,
    log_filter: Option<String>,
}

impl Config {
    /// 加载默认配置文件，文件不存在时使用默认值
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let mut config = if path.exists() {
            let config_str = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            Self::from_toml(&config_str)?
        } else {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };

        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(config_str: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(config_str)?;
        Ok(config)
    }

    /// 使用带 `STRATUS_` 前缀的变量覆盖配置
    pub fn apply_env(
        &mut self,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<(), ConfigError> {
        let overrides: EnvOverrides = envy::prefixed(ENV_PREFIX).from_iter(vars)?;

        if let Some(id) = overrides.app_id {
            self.app.id = Some(id);
        }
        if let Some(name) = overrides.app_name {
            self.app.name = name;
        }
        if let Some(version) = overrides.app_version {
            self.app.version = version;
        }
        if let Some(endpoints) = overrides.app_endpoints {
            self.app.endpoints = endpoints;
        }
        if let Some(secs) = overrides.app_registry_timeout_secs {
            self.app.registry_timeout_secs = secs;
        }
        if let Some(secs) = overrides.app_stop_timeout_secs {
            self.app.stop_timeout_secs = secs;
        }
        if let Some(network) = overrides.server_network {
            self.server.network = network;
        }
        if let Some(address) = overrides.server_address {
            self.server.address = address;
        }
        if let Some(secs) = overrides.server_timeout_secs {
            self.server.timeout_secs = secs;
        }
        if let Some(filter) = overrides.log_filter {
            self.log.filter = filter;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.name.is_empty() {
            return Err(ConfigError::Invalid("app.name must not be empty".to_string()));
        }
        if self.app.registry_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "app.registry_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.app.stop_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "app.stop_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.server.network != DEFAULT_NETWORK {
            return Err(ConfigError::Invalid(format!(
                "unsupported server.network: {}",
                self.server.network
            )));
        }
        Ok(())
    }

    /// 按配置初始化应用构建器，服务端与注册中心由调用方补充
    pub fn app_options_builder(&self) -> AppOptionsBuilder {
        let mut builder = AppOptions::builder()
            .name(self.app.name.clone())
            .version(self.app.version.clone())
            .metadata_map(self.app.metadata.clone())
            .endpoints(self.app.endpoints.clone())
            .signals(self.app.signals.clone())
            .registry_timeout(Duration::from_secs(self.app.registry_timeout_secs))
            .stop_timeout(Duration::from_secs(self.app.stop_timeout_secs));
        if let Some(id) = &self.app.id {
            builder = builder.id(id.clone());
        }
        builder
    }

    pub fn grpc_server(&self) -> GrpcServerBuilder {
        crate::services::transport::GrpcServer::builder()
            .network(self.server.network.clone())
            .address(self.server.address.clone())
            .timeout(Duration::from_secs(self.server.timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml(
            r#"
            [app]
            id = "node-1"
            name = "helloworld"
            version = "v1.2.0"
            endpoints = ["grpc://10.0.0.1:9000?isSecure=false"]
            signals = ["SIGTERM", "SIGHUP"]

            [app.metadata]
            zone = "cn-east"

            [server]
            address = "127.0.0.1:9000"
            timeout_secs = 3

            [log]
            filter = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.app.id.as_deref(), Some("node-1"));
        assert_eq!(config.app.metadata.get("zone").map(String::as_str), Some("cn-east"));
        assert_eq!(config.app.signals, vec![Signal::Terminate, Signal::Hangup]);
        assert_eq!(config.app.stop_timeout_secs, 10);
        assert_eq!(config.server.network, "tcp");
        assert_eq!(config.server.timeout_secs, 3);
        assert_eq!(config.log.filter, "debug");
        config.validate().unwrap();
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.server.address, "0.0.0.0:0");
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(vec![
                ("STRATUS_APP_NAME".to_string(), "greeter".to_string()),
                ("STRATUS_SERVER_ADDRESS".to_string(), "127.0.0.1:7000".to_string()),
                ("STRATUS_APP_STOP_TIMEOUT_SECS".to_string(), "3".to_string()),
                ("OTHER_APP_NAME".to_string(), "ignored".to_string()),
            ])
            .unwrap();

        assert_eq!(config.app.name, "greeter");
        assert_eq!(config.server.address, "127.0.0.1:7000");
        assert_eq!(config.app.stop_timeout_secs, 3);

        let err = config
            .apply_env(vec![(
                "STRATUS_APP_STOP_TIMEOUT_SECS".to_string(),
                "soon".to_string(),
            )])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env(_)));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.app.stop_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.server.network = "unix".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        assert!(matches!(
            Config::from_toml("[app]\nsignals = [\"SIGKILL\"]"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[app]\nname = \"from-file\"\n[server]\naddress = \"127.0.0.1:0\"").unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.server.address, "127.0.0.1:0");
        assert!(!config.app.name.is_empty());
    }

    #[test]
    fn test_app_options_builder() {
        let mut config = Config::default();
        config.app.id = Some("node-1".to_string());
        config.app.name = "helloworld".to_string();

        let opts = config.app_options_builder().build().unwrap();
        let app = crate::app::App::new(opts);
        assert_eq!(app.id(), "node-1");
        assert_eq!(app.name(), "helloworld");
    }
}
