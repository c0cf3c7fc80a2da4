//! 日志初始化与进程内计数指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 基础指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub read_failures: u64,
    pub readings: u64,
    pub dropped_unmapped: u64,
    pub send_success: u64,
    pub send_failure: u64,
    pub send_latency_ms_total: u64,
    pub send_latency_ms_count: u64,
    pub simulated_sent: u64,
    pub simulated_failed: u64,
}

/// 基础指标。
pub struct BridgeMetrics {
    cycles: AtomicU64,
    read_failures: AtomicU64,
    readings: AtomicU64,
    dropped_unmapped: AtomicU64,
    send_success: AtomicU64,
    send_failure: AtomicU64,
    send_latency_ms_total: AtomicU64,
    send_latency_ms_count: AtomicU64,
    simulated_sent: AtomicU64,
    simulated_failed: AtomicU64,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
            readings: AtomicU64::new(0),
            dropped_unmapped: AtomicU64::new(0),
            send_success: AtomicU64::new(0),
            send_failure: AtomicU64::new(0),
            send_latency_ms_total: AtomicU64::new(0),
            send_latency_ms_count: AtomicU64::new(0),
            simulated_sent: AtomicU64::new(0),
            simulated_failed: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            readings: self.readings.load(Ordering::Relaxed),
            dropped_unmapped: self.dropped_unmapped.load(Ordering::Relaxed),
            send_success: self.send_success.load(Ordering::Relaxed),
            send_failure: self.send_failure.load(Ordering::Relaxed),
            send_latency_ms_total: self.send_latency_ms_total.load(Ordering::Relaxed),
            send_latency_ms_count: self.send_latency_ms_count.load(Ordering::Relaxed),
            simulated_sent: self.simulated_sent.load(Ordering::Relaxed),
            simulated_failed: self.simulated_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<BridgeMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static BridgeMetrics {
    METRICS.get_or_init(BridgeMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录发布周期次数。
pub fn record_cycle() {
    metrics().cycles.fetch_add(1, Ordering::Relaxed);
}

/// 记录整批读取失败次数。
pub fn record_read_failure() {
    metrics().read_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录读到的点位数。
pub fn record_readings(count: u64) {
    metrics().readings.fetch_add(count, Ordering::Relaxed);
}

/// 记录未绑定点位丢弃次数。
pub fn record_dropped_unmapped() {
    metrics().dropped_unmapped.fetch_add(1, Ordering::Relaxed);
}

/// 记录发送成功次数。
pub fn record_send_success() {
    metrics().send_success.fetch_add(1, Ordering::Relaxed);
}

/// 记录发送失败次数（含超时、消息体错误）。
pub fn record_send_failure() {
    metrics().send_failure.fetch_add(1, Ordering::Relaxed);
}

/// 记录发送延迟（毫秒）。
pub fn record_send_latency_ms(latency_ms: u64) {
    let metrics = metrics();
    metrics
        .send_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .send_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录模拟设备发送结果。
pub fn record_simulated_send(ok: bool) {
    if ok {
        metrics().simulated_sent.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics().simulated_failed.fetch_add(1, Ordering::Relaxed);
    }
}
