//! 模拟设备进程：每隔固定间隔向一个云端设备发送随机遥测 `{"volume": n}`。

use bridge_cloud::{DeviceConnectionString, IotHubHttpConfig, IotHubHttpSender};
use bridge_config::SimulatorConfig;
use bridge_simulator::DeviceSimulator;
use bridge_telemetry::{init_tracing, metrics};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = SimulatorConfig::from_env()?;
    init_tracing();

    // 启动前校验连接串，避免每次发送都失败
    let device: DeviceConnectionString = config.device_connection_string.parse()?;
    info!(
        target: "bridge.simulator",
        device_id = %device.device_id,
        host = %device.endpoint_host(),
        "device_simulator_configured"
    );

    let sender = IotHubHttpSender::new(IotHubHttpConfig {
        scheme: config.cloud_scheme.clone(),
        request_timeout: config.send_timeout,
        ..IotHubHttpConfig::default()
    })?;
    let simulator = DeviceSimulator::builder()
        .connection_string(config.device_connection_string.clone())
        .interval(config.interval)
        .volume_range(config.volume_min, config.volume_max)
        .field_name(config.field_name.clone())
        .send_timeout(config.send_timeout)
        .sender(Arc::new(sender))
        .build()?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target: "bridge.app", error = %err, "ctrl_c_listen_failed");
            return;
        }
        info!(target: "bridge.app", "shutdown_requested");
        shutdown.cancel();
    });

    simulator.run(cancel).await;

    let snapshot = metrics().snapshot();
    info!(
        target: "bridge.app",
        sent = snapshot.simulated_sent,
        failed = snapshot.simulated_failed,
        "device_simulator_exited"
    );
    Ok(())
}
