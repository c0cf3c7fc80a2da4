/// 点位值的数据类型。
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    I64(i64),
    F64(f64),
    Bool(bool),
    String(String),
}

impl std::fmt::Display for TagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagValue::I64(v) => write!(f, "{}", v),
            TagValue::F64(v) => write!(f, "{}", v),
            TagValue::Bool(v) => write!(f, "{}", v),
            TagValue::String(v) => f.write_str(v),
        }
    }
}

/// 点位绑定：点位名称 → 云端设备连接串 + 遥测字段名。
///
/// 启动时加载一次，进程生命周期内只读。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagBinding {
    pub tag_name: String,
    pub device_connection_string: String,
    pub telemetry_field: String,
}

impl TagBinding {
    pub fn new(
        tag_name: impl Into<String>,
        device_connection_string: impl Into<String>,
        telemetry_field: impl Into<String>,
    ) -> Self {
        Self {
            tag_name: tag_name.into(),
            device_connection_string: device_connection_string.into(),
            telemetry_field: telemetry_field.into(),
        }
    }
}

/// 单次轮询得到的点位读数（不持久化，发送后丢弃）。
#[derive(Debug, Clone, PartialEq)]
pub struct TagReading {
    pub tag_name: String,
    pub value: TagValue,
    pub quality: Option<String>,
    pub read_at_ms: i64,
}

impl TagReading {
    /// 以当前时间构造读数。
    pub fn now(tag_name: impl Into<String>, value: TagValue) -> Self {
        Self {
            tag_name: tag_name.into(),
            value,
            quality: None,
            read_at_ms: now_epoch_ms(),
        }
    }
}

/// 获取当前 Unix 时间戳（毫秒）
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
