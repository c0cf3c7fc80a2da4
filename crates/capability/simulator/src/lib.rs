//! 模拟设备：按固定间隔向单个设备发送随机遥测 `{field: value}`。
//!
//! 每次发送都等待完成后才进入下一次计时，错过的计时直接跳过，不会堆积并发请求。

use bridge_cloud::TelemetrySender;
use bridge_telemetry::record_simulated_send;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 默认遥测字段名。
pub const DEFAULT_FIELD_NAME: &str = "volume";
/// 默认取值下限（含）。
pub const DEFAULT_VOLUME_MIN: i64 = 2000;
/// 默认取值上限（含）。
pub const DEFAULT_VOLUME_MAX: i64 = 7000;

/// 模拟设备错误。
#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error("device connection string is required")]
    MissingConnectionString,
    #[error("telemetry sender is required")]
    MissingSender,
    #[error("invalid volume range: {0} > {1}")]
    InvalidRange(i64, i64),
    #[error("interval must be greater than zero")]
    ZeroInterval,
    #[error("send error: {0}")]
    Send(String),
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

/// 在闭区间 `[low, high]` 内取一个随机整数。
pub fn random_volume<R: Rng>(rng: &mut R, low: i64, high: i64) -> i64 {
    rng.gen_range(low..=high)
}

/// 模拟设备构造器。
pub struct DeviceSimulatorBuilder {
    connection_string: Option<String>,
    interval: Duration,
    volume_min: i64,
    volume_max: i64,
    field_name: String,
    send_timeout: Duration,
    sender: Option<Arc<dyn TelemetrySender>>,
    seed: Option<u64>,
}

impl Default for DeviceSimulatorBuilder {
    fn default() -> Self {
        Self {
            connection_string: None,
            interval: Duration::from_secs(1),
            volume_min: DEFAULT_VOLUME_MIN,
            volume_max: DEFAULT_VOLUME_MAX,
            field_name: DEFAULT_FIELD_NAME.to_string(),
            send_timeout: Duration::from_secs(30),
            sender: None,
            seed: None,
        }
    }
}

impl DeviceSimulatorBuilder {
    pub fn connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = Some(connection_string.into());
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn volume_range(mut self, low: i64, high: i64) -> Self {
        self.volume_min = low;
        self.volume_max = high;
        self
    }

    pub fn field_name(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = field_name.into();
        self
    }

    pub fn send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn sender(mut self, sender: Arc<dyn TelemetrySender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// 固定随机种子（测试用）。
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<DeviceSimulator, SimulatorError> {
        let connection_string = self
            .connection_string
            .filter(|value| !value.trim().is_empty())
            .ok_or(SimulatorError::MissingConnectionString)?;
        let sender = self.sender.ok_or(SimulatorError::MissingSender)?;
        if self.volume_min > self.volume_max {
            return Err(SimulatorError::InvalidRange(self.volume_min, self.volume_max));
        }
        if self.interval.is_zero() {
            return Err(SimulatorError::ZeroInterval);
        }
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(DeviceSimulator {
            connection_string,
            interval: self.interval,
            volume_min: self.volume_min,
            volume_max: self.volume_max,
            field_name: self.field_name,
            send_timeout: self.send_timeout,
            sender,
            rng,
        })
    }
}

/// 模拟设备。
pub struct DeviceSimulator {
    connection_string: String,
    interval: Duration,
    volume_min: i64,
    volume_max: i64,
    field_name: String,
    send_timeout: Duration,
    sender: Arc<dyn TelemetrySender>,
    rng: StdRng,
}

impl DeviceSimulator {
    pub fn builder() -> DeviceSimulatorBuilder {
        DeviceSimulatorBuilder::default()
    }

    /// 生成下一条消息体。
    pub fn next_payload(&mut self) -> (i64, String) {
        let volume = random_volume(&mut self.rng, self.volume_min, self.volume_max);
        let mut object = serde_json::Map::with_capacity(1);
        object.insert(self.field_name.clone(), serde_json::Value::from(volume));
        (volume, serde_json::Value::Object(object).to_string())
    }

    /// 生成并发送一条遥测，返回发送的值。
    pub async fn tick(&mut self) -> Result<i64, SimulatorError> {
        let (volume, body) = self.next_payload();
        let result = match tokio::time::timeout(
            self.send_timeout,
            self.sender.send(&self.connection_string, &body),
        )
        .await
        {
            Ok(Ok(())) => Ok(volume),
            Ok(Err(err)) => Err(SimulatorError::Send(err.to_string())),
            Err(_) => Err(SimulatorError::Timeout(self.send_timeout)),
        };
        record_simulated_send(result.is_ok());
        match &result {
            Ok(_) => info!(target: "bridge.simulator", body = %body, "simulated_telemetry_sent"),
            Err(err) => warn!(
                target: "bridge.simulator",
                body = %body,
                error = %err,
                "simulated_telemetry_failed"
            ),
        }
        result
    }

    /// 运行直到取消；单次发送失败只记录日志。
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            target: "bridge.simulator",
            interval_ms = self.interval.as_millis() as u64,
            field = %self.field_name,
            "device_simulator_started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if cancel.is_cancelled() {
                break;
            }
            // 失败已在 tick 中记录，继续下一次计时
            self.tick().await.ok();
        }
        info!(target: "bridge.simulator", "device_simulator_stopped");
    }
}
