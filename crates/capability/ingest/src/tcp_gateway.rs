//! TCP 点位网关会话
//!
//! 通过 JSON 行协议访问数据访问服务器网关，每个请求和响应各占一行：
//!
//! ```text
//! → {"op":"status"}
//! ← {"vendorInfo":"...","productVersion":"...","statusInfo":"..."}
//! → {"op":"subscribe","subscription":{"name":"opc-bridge","clientHandle":"...","updateRate":1000,"items":[...]}}
//! ← {"ok":true}
//! → {"op":"read"}
//! ← {"ok":true,"items":[{"itemName":"Tag1","value":42,"quality":"good"}]}
//! ```
//!
//! 一次交互（写请求 + 读响应）整体受 `request_timeout` 约束，响应行长度受 `max_line_bytes` 约束。
//! 任一次交互出现 IO 错误或超时后，会话即标记为失效，后续请求直接失败。

use crate::{
    DEFAULT_UPDATE_RATE_MS, IngestError, SUBSCRIPTION_NAME, ServerStatus, SubscriptionState,
    TagServer, TagSession, tag_value_from_json,
};
use async_trait::async_trait;
use domain::TagReading;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info, warn};

/// 单行响应默认上限（字节）。
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// TCP 网关配置
#[derive(Debug, Clone)]
pub struct TcpGatewayConfig {
    /// 网关主机地址
    pub host: String,
    /// 网关端口
    pub port: u16,
    /// 连接超时
    pub connect_timeout: Duration,
    /// 单次请求超时（含写请求与读响应）
    pub request_timeout: Duration,
    /// 单行响应上限（字节）
    pub max_line_bytes: usize,
    /// 订阅名称
    pub subscription_name: String,
    /// 订阅刷新周期（毫秒）
    pub update_rate_ms: u64,
}

impl TcpGatewayConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_millis(5000),
            request_timeout: Duration::from_millis(5000),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            subscription_name: SUBSCRIPTION_NAME.to_string(),
            update_rate_ms: DEFAULT_UPDATE_RATE_MS,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum GatewayRequest<'a> {
    Status,
    Subscribe { subscription: &'a SubscriptionState },
    Read,
}

#[derive(Debug, Deserialize)]
struct AckResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    items: Vec<ItemValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemValue {
    item_name: String,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    quality: Option<String>,
}

/// TCP 网关点位服务器
#[derive(Debug, Clone)]
pub struct TcpTagServer {
    config: TcpGatewayConfig,
}

impl TcpTagServer {
    pub fn new(config: TcpGatewayConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TagServer for TcpTagServer {
    async fn connect(&self) -> Result<Box<dyn TagSession>, IngestError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!(target: "bridge.ingest", addr = %addr, "gateway_connecting");

        let stream = match tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((self.config.host.as_str(), self.config.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                return Err(IngestError::Connection(format!("{}: {}", addr, err)));
            }
            Err(_) => {
                return Err(IngestError::Connection(format!("{}: connect timeout", addr)));
            }
        };

        let (reader, writer) = stream.into_split();
        let mut session = TcpTagSession {
            reader: BufReader::new(reader),
            writer,
            config: self.config.clone(),
            status: ServerStatus::default(),
            subscription: None,
            broken: false,
        };

        let line = session
            .exchange(&GatewayRequest::Status)
            .await
            .map_err(IngestError::Connection)?;
        session.status = serde_json::from_str(&line)
            .map_err(|err| IngestError::Connection(format!("invalid status response: {}", err)))?;
        info!(target: "bridge.ingest", addr = %addr, "gateway_connected");
        Ok(Box::new(session))
    }
}

struct TcpTagSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    config: TcpGatewayConfig,
    status: ServerStatus,
    subscription: Option<SubscriptionState>,
    broken: bool,
}

impl TcpTagSession {
    /// 发送一行请求并读取一行响应
    async fn exchange(&mut self, request: &GatewayRequest<'_>) -> Result<String, String> {
        if self.broken {
            return Err("connection lost".to_string());
        }
        let request_timeout = self.config.request_timeout;
        let result = match tokio::time::timeout(request_timeout, self.exchange_inner(request)).await
        {
            Ok(result) => result,
            Err(_) => Err("request timeout".to_string()),
        };
        if result.is_err() {
            // 响应可能已错位，不再复用该连接
            self.broken = true;
        }
        result
    }

    async fn exchange_inner(&mut self, request: &GatewayRequest<'_>) -> Result<String, String> {
        let mut line = serde_json::to_string(request).map_err(|err| err.to_string())?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|err| err.to_string())?;
        self.writer.flush().await.map_err(|err| err.to_string())?;
        debug!(target: "bridge.ingest", request = %line.trim_end(), "gateway_request_sent");

        let limit = self.config.max_line_bytes as u64;
        let mut response = String::new();
        let read = (&mut self.reader)
            .take(limit)
            .read_line(&mut response)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("connection closed".to_string());
        }
        if !response.ends_with('\n') && read as u64 >= limit {
            return Err(format!("response line exceeds {} bytes", limit));
        }
        Ok(response.trim().to_string())
    }
}

#[async_trait]
impl TagSession for TcpTagSession {
    fn status(&self) -> &ServerStatus {
        &self.status
    }

    async fn register_tags(&mut self, tag_names: &[String]) -> Result<(), IngestError> {
        let subscription = SubscriptionState::new(
            self.config.subscription_name.clone(),
            self.config.update_rate_ms,
            tag_names,
        );
        let line = self
            .exchange(&GatewayRequest::Subscribe {
                subscription: &subscription,
            })
            .await
            .map_err(IngestError::Registration)?;
        let ack: AckResponse = serde_json::from_str(&line)
            .map_err(|err| IngestError::Registration(format!("invalid response: {}", err)))?;
        if !ack.ok {
            return Err(IngestError::Registration(
                ack.error.unwrap_or_else(|| "subscription rejected".to_string()),
            ));
        }
        info!(
            target: "bridge.ingest",
            client_handle = %subscription.client_handle,
            items = subscription.items.len(),
            "gateway_subscription_created"
        );
        self.subscription = Some(subscription);
        Ok(())
    }

    async fn read_all(&mut self) -> Result<Vec<TagReading>, IngestError> {
        if self.subscription.is_none() {
            return Err(IngestError::Read("no subscription registered".to_string()));
        }
        let line = self
            .exchange(&GatewayRequest::Read)
            .await
            .map_err(IngestError::Read)?;
        let response: ReadResponse = serde_json::from_str(&line)
            .map_err(|err| IngestError::Read(format!("invalid response: {}", err)))?;
        if !response.ok {
            return Err(IngestError::Read(
                response.error.unwrap_or_else(|| "read rejected".to_string()),
            ));
        }

        let mut readings = Vec::with_capacity(response.items.len());
        for item in response.items {
            let Some(value) = tag_value_from_json(&item.value) else {
                warn!(
                    target: "bridge.ingest",
                    tag = %item.item_name,
                    value = %item.value,
                    "gateway_item_value_unusable"
                );
                continue;
            };
            let mut reading = TagReading::now(item.item_name, value);
            reading.quality = item.quality;
            readings.push(reading);
        }
        Ok(readings)
    }
}
