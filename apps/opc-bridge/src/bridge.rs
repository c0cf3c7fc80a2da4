//! 桥接链路装配模块
//!
//! 负责把点位服务器、点位会话、绑定表和云端发送器组装成发布循环：
//! 先按地址选择点位服务器并建立会话，记录服务器状态，注册配置文件中的全部点位，
//! 再交给 `PublishLoop` 周期性读取与发送。

use bridge_cloud::{IotHubHttpConfig, IotHubHttpSender, TelemetrySender};
use bridge_config::{AppConfig, TopicConfig};
use bridge_ingest::{
    IngestError, StaticTagServer, TagServer, TagServerUrl, TagSession, TcpGatewayConfig,
    TcpTagServer,
};
use bridge_pipeline::{BindingTable, PublishConfig, PublishLoop};
use std::sync::Arc;
use tracing::{info, warn};

/// 根据服务器地址选择点位服务器实现。
pub fn select_tag_server(
    config: &AppConfig,
    topic_config: &TopicConfig,
) -> Result<Arc<dyn TagServer>, IngestError> {
    let url = config.server_url(topic_config);
    match TagServerUrl::parse(url)? {
        TagServerUrl::Static => {
            let server = StaticTagServer::from_json_values(
                topic_config
                    .topic_items
                    .iter()
                    .map(|item| (item.name.as_str(), item.value.as_ref())),
            );
            if server.is_empty() {
                warn!(target: "bridge.ingest", "static tag server has no values");
            }
            info!(target: "bridge.ingest", tags = server.len(), "tag server: static");
            Ok(Arc::new(server))
        }
        TagServerUrl::Tcp { host, port } => {
            let mut gateway = TcpGatewayConfig::new(host, port);
            gateway.connect_timeout = config.connect_timeout;
            gateway.request_timeout = config.request_timeout;
            info!(
                target: "bridge.ingest",
                "tag server: tcp gateway {}:{}", gateway.host, gateway.port
            );
            Ok(Arc::new(TcpTagServer::new(gateway)))
        }
    }
}

/// 建立会话、记录服务器状态并注册全部点位。
pub async fn open_session(
    server: &dyn TagServer,
    tag_names: &[String],
) -> Result<Box<dyn TagSession>, IngestError> {
    let mut session = server.connect().await?;
    let status = session.status();
    info!(
        target: "bridge.ingest",
        vendor_info = %status.vendor_info,
        product_version = %status.product_version,
        status_info = %status.status_info,
        "tag_server_connected"
    );
    session.register_tags(tag_names).await?;
    info!(target: "bridge.ingest", tags = tag_names.len(), "tags_registered");
    Ok(session)
}

/// 基于运行配置构造 IoT Hub 发送器。
pub fn build_sender(config: &AppConfig) -> Result<Arc<dyn TelemetrySender>, bridge_cloud::CloudError> {
    let sender = IotHubHttpSender::new(IotHubHttpConfig {
        scheme: config.cloud_scheme.clone(),
        request_timeout: config.send_timeout,
        ..IotHubHttpConfig::default()
    })?;
    Ok(Arc::new(sender))
}

/// 组装发布循环。
pub fn build_publish_loop(
    config: &AppConfig,
    topic_config: &TopicConfig,
    session: Box<dyn TagSession>,
    sender: Arc<dyn TelemetrySender>,
) -> PublishLoop {
    let bindings = BindingTable::new(topic_config.bindings());
    if bindings.is_empty() {
        warn!(target: "bridge.publish", "no tag bindings configured");
    }
    PublishLoop::new(
        session,
        bindings,
        sender,
        PublishConfig {
            poll_interval: config.poll_interval,
            send_timeout: config.send_timeout,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_cloud::CloudError;
    use std::time::Duration;

    struct NoopSender;

    #[async_trait]
    impl TelemetrySender for NoopSender {
        async fn send(&self, _connection_string: &str, _body: &str) -> Result<(), CloudError> {
            Ok(())
        }
    }

    fn app_config(server_url: Option<&str>) -> AppConfig {
        AppConfig {
            config_path: "config.json".to_string(),
            opc_server_url: server_url.map(str::to_string),
            poll_interval: Duration::from_millis(10),
            send_timeout: Duration::from_millis(100),
            connect_timeout: Duration::from_millis(100),
            request_timeout: Duration::from_millis(100),
            cloud_scheme: "http".to_string(),
        }
    }

    fn topic_config() -> TopicConfig {
        TopicConfig::from_json_str(
            &serde_json::json!({
                "opcServerUrl": "static:",
                "topicItems": [
                    {
                        "name": "Tag1",
                        "deviceConnectionString": "HostName=h;DeviceId=d1;SharedAccessKey=a2V5",
                        "deviceTelemetryFieldName": "temp",
                        "value": 42
                    },
                    {
                        "name": "Tag2",
                        "deviceConnectionString": "HostName=h;DeviceId=d2;SharedAccessKey=a2V5",
                        "deviceTelemetryFieldName": "pressure",
                        "value": 1.5
                    }
                ]
            })
            .to_string(),
        )
        .expect("topic config")
    }

    #[tokio::test]
    async fn static_server_runs_one_cycle() {
        let config = app_config(None);
        let topics = topic_config();
        let server = select_tag_server(&config, &topics).expect("server");
        let session = open_session(server.as_ref(), &topics.tag_names())
            .await
            .expect("session");

        let mut publish = build_publish_loop(&config, &topics, session, Arc::new(NoopSender));
        let report = publish.run_cycle().await;
        assert_eq!(report.readings, 2);
        assert_eq!(report.sent, 2);
        assert_eq!(report.unmapped, 0);
    }

    #[test]
    fn env_url_overrides_config_file() {
        let config = app_config(Some("opc.da://localhost/Matrikon"));
        let err = select_tag_server(&config, &topic_config())
            .err()
            .expect("unsupported url");
        assert!(matches!(err, IngestError::Connection(_)));
    }

    #[test]
    fn tcp_url_selects_gateway() {
        let config = app_config(Some("tcp://127.0.0.1:7800"));
        assert!(select_tag_server(&config, &topic_config()).is_ok());
    }

    #[test]
    fn sender_uses_configured_scheme() {
        assert!(build_sender(&app_config(None)).is_ok());
    }
}
