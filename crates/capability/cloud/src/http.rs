use crate::{CloudError, DeviceConnectionString, TelemetrySender, generate_sas_token};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// IoT Hub HTTP 发送配置。
#[derive(Debug, Clone)]
pub struct IotHubHttpConfig {
    /// `https`（生产）或 `http`（本地联调）
    pub scheme: String,
    pub api_version: String,
    /// SAS token 有效期
    pub token_ttl: Duration,
    /// 单次 HTTP 请求超时
    pub request_timeout: Duration,
}

impl Default for IotHubHttpConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            api_version: "2020-03-13".to_string(),
            token_ttl: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// 单条消息范围内的设备客户端。
pub struct DeviceClient<'a> {
    http: &'a reqwest::Client,
    config: &'a IotHubHttpConfig,
    connection: DeviceConnectionString,
}

impl<'a> DeviceClient<'a> {
    pub fn from_connection_string(
        http: &'a reqwest::Client,
        config: &'a IotHubHttpConfig,
        connection_string: &str,
    ) -> Result<Self, CloudError> {
        Ok(Self {
            http,
            config,
            connection: connection_string.parse()?,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.connection.device_id
    }

    /// 设备消息接口地址。
    pub fn events_url(&self) -> String {
        let device = urlencoding::encode(&self.connection.device_id);
        let path = match &self.connection.module_id {
            Some(module_id) => format!(
                "devices/{}/modules/{}/messages/events",
                device,
                urlencoding::encode(module_id)
            ),
            None => format!("devices/{}/messages/events", device),
        };
        format!(
            "{}://{}/{}?api-version={}",
            self.config.scheme,
            self.connection.endpoint_host(),
            path,
            self.config.api_version
        )
    }

    /// 发送一条设备到云消息。
    pub async fn send_event(&self, body: &str) -> Result<(), CloudError> {
        let expiry = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .saturating_add(self.config.token_ttl)
            .as_secs();
        let token = generate_sas_token(
            &self.connection.resource_uri(),
            &self.connection.shared_access_key,
            expiry,
        )?;
        let url = self.events_url();
        debug!(target: "bridge.cloud", url = %url, "device_event_post");

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, token)
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .header("iothub-contenttype", "application/json")
            .header("iothub-contentencoding", "utf-8")
            .body(body.to_string())
            .send()
            .await
            .map_err(|err| CloudError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(CloudError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// 基于 IoT Hub 设备 HTTP 接口的遥测发送器。
#[derive(Clone)]
pub struct IotHubHttpSender {
    http: reqwest::Client,
    config: IotHubHttpConfig,
}

impl IotHubHttpSender {
    pub fn new(config: IotHubHttpConfig) -> Result<Self, CloudError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| CloudError::Transport(err.to_string()))?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl TelemetrySender for IotHubHttpSender {
    async fn send(&self, connection_string: &str, body: &str) -> Result<(), CloudError> {
        let client = DeviceClient::from_connection_string(&self.http, &self.config, connection_string)?;
        client.send_event(body).await?;
        info!(
            target: "bridge.cloud",
            device_id = %client.device_id(),
            body = %body,
            "telemetry_sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_url_for_device_and_module() {
        let http = reqwest::Client::new();
        let config = IotHubHttpConfig::default();

        let client = DeviceClient::from_connection_string(
            &http,
            &config,
            "HostName=hub.azure-devices.net;DeviceId=line 1;SharedAccessKey=a2V5",
        )
        .unwrap();
        assert_eq!(
            client.events_url(),
            "https://hub.azure-devices.net/devices/line%201/messages/events?api-version=2020-03-13"
        );

        let client = DeviceClient::from_connection_string(
            &http,
            &config,
            "HostName=hub;DeviceId=d;ModuleId=m;SharedAccessKey=a2V5;GatewayHostName=edge",
        )
        .unwrap();
        assert_eq!(
            client.events_url(),
            "https://edge/devices/d/modules/m/messages/events?api-version=2020-03-13"
        );
    }
}
