//! # 点位采集能力模块
//!
//! 与数据访问服务器建立一次会话，注册固定的点位列表，并提供批量读取当前值的能力。
//!
//! ```text
//! TagServerUrl::parse(url)
//!       │
//!       ├── static:          → StaticTagServer（配置文件中的静态值）
//!       └── tcp://host:port  → TcpTagServer（JSON 行协议网关）
//!       │
//!       ▼
//! TagServer::connect() → Box<dyn TagSession>
//!       │
//!       ├── register_tags(names)   启动时调用一次
//!       └── read_all()             每个发布周期调用一次
//! ```
//!
//! 会话只建立一次，不做重连：底层连接断开后，后续读取全部失败，直到进程重启。

mod static_server;
mod tcp_gateway;

use async_trait::async_trait;
use domain::{TagReading, TagValue};
use serde::{Deserialize, Serialize};

pub use static_server::StaticTagServer;
pub use tcp_gateway::{DEFAULT_MAX_LINE_BYTES, TcpGatewayConfig, TcpTagServer};

/// 订阅名称。
pub const SUBSCRIPTION_NAME: &str = "opc-bridge";
/// 订阅刷新周期（毫秒）。
pub const DEFAULT_UPDATE_RATE_MS: u64 = 1000;

/// 采集错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("registration error: {0}")]
    Registration(String),
    #[error("read error: {0}")]
    Read(String),
}

/// 服务器诊断信息。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    #[serde(default)]
    pub vendor_info: String,
    #[serde(default)]
    pub product_version: String,
    #[serde(default)]
    pub status_info: String,
}

/// 订阅中的单个点位。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribedItem {
    pub item_name: String,
    pub client_handle: String,
}

/// 订阅状态（每个会话一份）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionState {
    pub name: String,
    pub client_handle: String,
    #[serde(rename = "updateRate")]
    pub update_rate_ms: u64,
    pub items: Vec<SubscribedItem>,
}

impl SubscriptionState {
    /// 为订阅及每个点位分配唯一客户端句柄。
    pub fn new(name: impl Into<String>, update_rate_ms: u64, tag_names: &[String]) -> Self {
        Self {
            name: name.into(),
            client_handle: uuid::Uuid::new_v4().to_string(),
            update_rate_ms,
            items: tag_names
                .iter()
                .map(|tag_name| SubscribedItem {
                    item_name: tag_name.clone(),
                    client_handle: uuid::Uuid::new_v4().to_string(),
                })
                .collect(),
        }
    }

    pub fn item_names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.item_name.as_str())
    }
}

/// 点位服务器抽象（建立会话）。
#[async_trait]
pub trait TagServer: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn TagSession>, IngestError>;
}

/// 已建立的服务器会话，由发布循环独占持有。
#[async_trait]
pub trait TagSession: Send + Sync {
    /// 连接时获取的诊断信息。
    fn status(&self) -> &ServerStatus;

    /// 注册需要采样的点位，连接后、首次读取前调用一次。
    async fn register_tags(&mut self, tag_names: &[String]) -> Result<(), IngestError>;

    /// 一次性读取全部已注册点位的当前值；任何异常都视为整批失败。
    async fn read_all(&mut self) -> Result<Vec<TagReading>, IngestError>;
}

/// 点位服务器地址。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagServerUrl {
    /// 空地址或 `static:`：使用配置文件中的静态值
    Static,
    /// `tcp://host:port`：JSON 行协议网关
    Tcp { host: String, port: u16 },
}

impl TagServerUrl {
    pub fn parse(url: &str) -> Result<Self, IngestError> {
        let url = url.trim();
        if url.is_empty() || url.eq_ignore_ascii_case("static:") || url.eq_ignore_ascii_case("static://")
        {
            return Ok(Self::Static);
        }
        let Some(rest) = url.strip_prefix("tcp://") else {
            return Err(IngestError::Connection(format!(
                "unsupported server url: {}",
                url
            )));
        };
        let rest = rest.trim_end_matches('/');
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| IngestError::Connection(format!("missing port in {}", url)))?;
        if host.is_empty() {
            return Err(IngestError::Connection(format!("missing host in {}", url)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| IngestError::Connection(format!("invalid port in {}", url)))?;
        Ok(Self::Tcp {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
        })
    }
}

/// 将网关返回的 JSON 标量转换为点位值；null/数组/对象无法转换。
pub fn tag_value_from_json(value: &serde_json::Value) -> Option<TagValue> {
    match value {
        serde_json::Value::Bool(v) => Some(TagValue::Bool(*v)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(TagValue::I64)
            .or_else(|| n.as_f64().map(TagValue::F64)),
        serde_json::Value::String(s) => Some(TagValue::String(s.clone())),
        _ => None,
    }
}
