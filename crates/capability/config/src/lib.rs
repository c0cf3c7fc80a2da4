//! 应用运行配置加载。
//!
//! - [`TopicConfig`]：点位配置文件（JSON），启动时整体解析一次。
//! - [`AppConfig`] / [`SimulatorConfig`]：从环境变量读取的运行参数。

use domain::TagBinding;
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("cannot read {0}: {1}")]
    Io(String, String),
    #[error("malformed config: {0}")]
    Parse(String),
}

/// 点位配置文件。
///
/// 字段名兼容 camelCase 与 PascalCase。
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicConfig {
    #[serde(default, alias = "OpcServerUrl")]
    pub opc_server_url: String,
    #[serde(alias = "TopicItems")]
    pub topic_items: Vec<TopicItem>,
}

/// 单个点位配置项。
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicItem {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "DeviceConnectionString")]
    pub device_connection_string: String,
    #[serde(alias = "DeviceTelemetryFieldName")]
    pub device_telemetry_field_name: String,
    /// 静态点位服务器使用的初始值（任意 JSON 标量）。
    #[serde(default, alias = "Value")]
    pub value: Option<serde_json::Value>,
}

impl TopicConfig {
    /// 从 JSON 文本解析并校验。
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: TopicConfig =
            serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 每个配置项对应一条点位绑定，字段原样复制。
    pub fn bindings(&self) -> Vec<TagBinding> {
        self.topic_items
            .iter()
            .map(|item| {
                TagBinding::new(
                    item.name.clone(),
                    item.device_connection_string.clone(),
                    item.device_telemetry_field_name.clone(),
                )
            })
            .collect()
    }

    /// 需要注册订阅的点位名称（保持配置顺序）。
    pub fn tag_names(&self) -> Vec<String> {
        self.topic_items.iter().map(|item| item.name.clone()).collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (index, item) in self.topic_items.iter().enumerate() {
            let key = format!("topicItems[{}]", index);
            if item.name.trim().is_empty() {
                return Err(ConfigError::Invalid(key, "empty name".to_string()));
            }
            if item.device_connection_string.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    key,
                    format!("empty deviceConnectionString for {}", item.name),
                ));
            }
            if item.device_telemetry_field_name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    key,
                    format!("empty deviceTelemetryFieldName for {}", item.name),
                ));
            }
            // 一个点位只能有一条绑定
            if !seen.insert(item.name.as_str()) {
                return Err(ConfigError::Invalid(
                    key,
                    format!("duplicate tag name {}", item.name),
                ));
            }
        }
        Ok(())
    }
}

/// 读取并解析点位配置文件（无部分成功）。
pub fn load_topic_config(path: impl AsRef<Path>) -> Result<TopicConfig, ConfigError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .map_err(|err| ConfigError::Io(path.display().to_string(), err.to_string()))?;
    TopicConfig::from_json_str(&json)
}

/// 桥接进程运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub config_path: String,
    pub opc_server_url: Option<String>,
    pub poll_interval: Duration,
    pub send_timeout: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub cloud_scheme: String,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let config_path =
            env::var("BRIDGE_CONFIG_PATH").unwrap_or_else(|_| "config.json".to_string());
        let opc_server_url = read_optional("BRIDGE_OPC_SERVER_URL");
        let poll_interval = read_millis_with_default("BRIDGE_POLL_INTERVAL_MS", 10_000)?;
        let send_timeout = read_millis_with_default("BRIDGE_SEND_TIMEOUT_MS", 30_000)?;
        let connect_timeout = read_millis_with_default("BRIDGE_CONNECT_TIMEOUT_MS", 5_000)?;
        let request_timeout = read_millis_with_default("BRIDGE_REQUEST_TIMEOUT_MS", 5_000)?;
        let cloud_scheme = read_scheme("BRIDGE_CLOUD_SCHEME")?;

        Ok(Self {
            config_path,
            opc_server_url,
            poll_interval,
            send_timeout,
            connect_timeout,
            request_timeout,
            cloud_scheme,
        })
    }

    /// 实际使用的点位服务器地址：环境变量优先，其次配置文件。
    pub fn server_url<'a>(&'a self, topic_config: &'a TopicConfig) -> &'a str {
        self.opc_server_url
            .as_deref()
            .unwrap_or(topic_config.opc_server_url.as_str())
    }
}

/// 模拟设备运行配置。
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub device_connection_string: String,
    pub interval: Duration,
    pub volume_min: i64,
    pub volume_max: i64,
    pub field_name: String,
    pub send_timeout: Duration,
    pub cloud_scheme: String,
}

impl SimulatorConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let device_connection_string = env::var("SIM_DEVICE_CONNECTION_STRING")
            .map_err(|_| ConfigError::Missing("SIM_DEVICE_CONNECTION_STRING".to_string()))?;
        let interval = read_millis_with_default("SIM_INTERVAL_MS", 1_000)?;
        let volume_min = read_i64_with_default("SIM_VOLUME_MIN", 2_000)?;
        let volume_max = read_i64_with_default("SIM_VOLUME_MAX", 7_000)?;
        if volume_min > volume_max {
            return Err(ConfigError::Invalid(
                "SIM_VOLUME_MIN".to_string(),
                format!("{} > SIM_VOLUME_MAX {}", volume_min, volume_max),
            ));
        }
        let field_name = env::var("SIM_FIELD_NAME").unwrap_or_else(|_| "volume".to_string());
        let send_timeout = read_millis_with_default("SIM_SEND_TIMEOUT_MS", 30_000)?;
        let cloud_scheme = read_scheme("BRIDGE_CLOUD_SCHEME")?;

        Ok(Self {
            device_connection_string,
            interval,
            volume_min,
            volume_max,
            field_name,
            send_timeout,
            cloud_scheme,
        })
    }
}

/// 读取毫秒数环境变量，0 视为非法。
fn read_millis_with_default(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(Duration::from_millis(default)),
    };
    match value.parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ConfigError::Invalid(key.to_string(), value)),
    }
}

fn read_i64_with_default(key: &str, default: i64) -> Result<i64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<i64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_scheme(key: &str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(value.to_ascii_lowercase()),
            _ => Err(ConfigError::Invalid(key.to_string(), value)),
        },
        Err(_) => Ok("https".to_string()),
    }
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}
