//! 采集桥接进程：轮询点位服务器，按配置把每个点位值作为 JSON 遥测发往对应的云端设备。

mod bridge;

use bridge_config::{AppConfig, load_topic_config};
use bridge_telemetry::{init_tracing, metrics};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    // 点位配置文件：解析失败直接退出
    let topic_config = load_topic_config(&config.config_path)?;
    info!(
        target: "bridge.config",
        path = %config.config_path,
        items = topic_config.topic_items.len(),
        "topic_config_loaded"
    );

    // 1. 连接点位服务器并注册全部点位
    let server = bridge::select_tag_server(&config, &topic_config)?;
    let session = bridge::open_session(server.as_ref(), &topic_config.tag_names()).await?;

    // 2. 云端发送器与发布循环
    let sender = bridge::build_sender(&config)?;
    let publish = bridge::build_publish_loop(&config, &topic_config, session, sender);

    // 3. Ctrl-C 触发退出
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

    publish.run(cancel).await;

    let snapshot = metrics().snapshot();
    info!(
        target: "bridge.app",
        cycles = snapshot.cycles,
        read_failures = snapshot.read_failures,
        readings = snapshot.readings,
        dropped_unmapped = snapshot.dropped_unmapped,
        send_success = snapshot.send_success,
        send_failure = snapshot.send_failure,
        "bridge_stopped"
    );
    Ok(())
}
