//! 发布循环：读取全部点位 → 按绑定映射 → 逐条发送 → 休眠，周而复始。
//!
//! 运行期错误（读取失败、未绑定点位、发送失败/超时）都在发生处记录日志并跳过，
//! 不会终止循环；只有取消信号能让循环退出。

use bridge_cloud::TelemetrySender;
use bridge_ingest::TagSession;
use bridge_telemetry::{
    record_cycle, record_dropped_unmapped, record_read_failure, record_readings,
    record_send_failure, record_send_latency_ms, record_send_success,
};
use domain::{TagBinding, TagReading, TagValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 发布错误（单条读数范围）。
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("no binding for tag {0}")]
    Lookup(String),
    #[error("payload error: {0}")]
    Payload(String),
    #[error("send error: {0}")]
    Send(String),
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

/// 发布循环参数。
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub poll_interval: Duration,
    pub send_timeout: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            send_timeout: Duration::from_secs(30),
        }
    }
}

/// 单个发布周期的结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub read_failed: bool,
    pub readings: usize,
    pub sent: usize,
    pub failed: usize,
    pub unmapped: usize,
}

/// 点位名称 → 绑定。
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    bindings: HashMap<String, TagBinding>,
}

impl BindingTable {
    /// 重复的点位名称只保留第一条。
    pub fn new(bindings: impl IntoIterator<Item = TagBinding>) -> Self {
        let mut map = HashMap::new();
        for binding in bindings {
            if map.contains_key(&binding.tag_name) {
                warn!(target: "bridge.publish", tag = %binding.tag_name, "duplicate_binding_ignored");
                continue;
            }
            map.insert(binding.tag_name.clone(), binding);
        }
        Self { bindings: map }
    }

    pub fn lookup(&self, tag_name: &str) -> Option<&TagBinding> {
        self.bindings.get(tag_name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// 构造单字段 JSON 消息体 `{field: value}`。
pub fn build_payload(field: &str, value: &TagValue) -> Result<String, PublishError> {
    let json_value = match value {
        TagValue::I64(v) => serde_json::Value::from(*v),
        TagValue::F64(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .ok_or_else(|| PublishError::Payload(format!("non-finite value {}", v)))?,
        TagValue::Bool(v) => serde_json::Value::Bool(*v),
        TagValue::String(v) => serde_json::Value::String(v.clone()),
    };
    let mut object = serde_json::Map::with_capacity(1);
    object.insert(field.to_string(), json_value);
    serde_json::to_string(&serde_json::Value::Object(object))
        .map_err(|err| PublishError::Payload(err.to_string()))
}

/// 发布循环，独占持有点位会话。
pub struct PublishLoop {
    session: Box<dyn TagSession>,
    bindings: BindingTable,
    sender: Arc<dyn TelemetrySender>,
    config: PublishConfig,
}

impl PublishLoop {
    pub fn new(
        session: Box<dyn TagSession>,
        bindings: BindingTable,
        sender: Arc<dyn TelemetrySender>,
        config: PublishConfig,
    ) -> Self {
        Self {
            session,
            bindings,
            sender,
            config,
        }
    }

    /// 运行直到取消；取消信号在每个周期开始前和休眠期间检查。
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            target: "bridge.publish",
            bindings = self.bindings.len(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "publish_loop_started"
        );
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let report = self.run_cycle().await;
            debug!(target: "bridge.publish", report = ?report, "publish_cycle_finished");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        info!(target: "bridge.publish", "publish_loop_stopped");
    }

    /// 执行一个发布周期（不含休眠）。
    pub async fn run_cycle(&mut self) -> CycleReport {
        record_cycle();
        let mut report = CycleReport::default();

        // 1. 整批读取；失败则本周期不发送
        let readings = match self.session.read_all().await {
            Ok(readings) => readings,
            Err(err) => {
                record_read_failure();
                warn!(target: "bridge.publish", error = %err, "read_all_failed");
                report.read_failed = true;
                return report;
            }
        };
        report.readings = readings.len();
        record_readings(readings.len() as u64);

        // 2/3. 逐条映射并按点位顺序串行发送
        for reading in &readings {
            match self.publish_reading(reading).await {
                Ok(()) => report.sent += 1,
                Err(PublishError::Lookup(tag)) => {
                    record_dropped_unmapped();
                    warn!(target: "bridge.publish", tag = %tag, "tag_binding_missing");
                    report.unmapped += 1;
                }
                Err(err) => {
                    record_send_failure();
                    warn!(
                        target: "bridge.publish",
                        tag = %reading.tag_name,
                        value = %reading.value,
                        error = %err,
                        "telemetry_send_failed"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn publish_reading(&self, reading: &TagReading) -> Result<(), PublishError> {
        let binding = self
            .bindings
            .lookup(&reading.tag_name)
            .ok_or_else(|| PublishError::Lookup(reading.tag_name.clone()))?;
        info!(target: "bridge.publish", tag = %reading.tag_name, "tag_binding_found");

        let body = build_payload(&binding.telemetry_field, &reading.value)?;
        let started_at = Instant::now();
        match tokio::time::timeout(
            self.config.send_timeout,
            self.sender.send(&binding.device_connection_string, &body),
        )
        .await
        {
            Ok(Ok(())) => {
                record_send_success();
                record_send_latency_ms(started_at.elapsed().as_millis() as u64);
                info!(
                    target: "bridge.publish",
                    tag = %reading.tag_name,
                    body = %body,
                    read_at_ms = reading.read_at_ms,
                    "telemetry_published"
                );
                Ok(())
            }
            Ok(Err(err)) => Err(PublishError::Send(err.to_string())),
            Err(_) => Err(PublishError::Timeout(self.config.send_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_has_single_key() {
        let body = build_payload("temp", &TagValue::I64(42)).unwrap();
        assert_eq!(body, r#"{"temp":42}"#);

        for value in [
            TagValue::F64(21.5),
            TagValue::Bool(true),
            TagValue::String("he said \"hi\"".to_string()),
        ] {
            let body = build_payload("field", &value).unwrap();
            let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
            let object = parsed.as_object().unwrap();
            assert_eq!(object.len(), 1);
            assert!(object.contains_key("field"));
        }
    }

    #[test]
    fn payload_rejects_non_finite() {
        let err = build_payload("temp", &TagValue::F64(f64::NAN)).unwrap_err();
        assert!(matches!(err, PublishError::Payload(_)));
    }

    #[test]
    fn binding_table_keeps_first_duplicate() {
        let table = BindingTable::new(vec![
            TagBinding::new("Tag1", "csA", "temp"),
            TagBinding::new("Tag1", "csB", "other"),
            TagBinding::new("Tag2", "csB", "pressure"),
        ]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup("Tag1").unwrap().device_connection_string, "csA");
        assert!(table.lookup("TagX").is_none());
    }
}
