//! # 云端发送能力模块
//!
//! 通过 IoT Hub 设备 HTTP 接口发送遥测消息：
//!
//! ```text
//! POST {scheme}://{HostName}/devices/{DeviceId}/messages/events?api-version=2020-03-13
//! Authorization: SharedAccessSignature sr=...&sig=...&se=...
//! ```
//!
//! 每条消息都从连接串现场构造一个 [`DeviceClient`]，底层 HTTP 连接池共享。

mod connection_string;
mod http;
mod sas;

use async_trait::async_trait;

pub use connection_string::DeviceConnectionString;
pub use http::{DeviceClient, IotHubHttpConfig, IotHubHttpSender};
pub use sas::generate_sas_token;

/// 云端发送错误。
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("invalid connection string: {0}")]
    ConnectionString(String),
    #[error("token error: {0}")]
    Token(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rejected by hub: {status} {body}")]
    Rejected { status: u16, body: String },
}

/// 遥测发送器抽象。
#[async_trait]
pub trait TelemetrySender: Send + Sync {
    /// 将 JSON 消息体发送到连接串所指的设备。
    async fn send(&self, connection_string: &str, body: &str) -> Result<(), CloudError>;
}
