use crate::CloudError;
use std::fmt;
use std::str::FromStr;

/// 设备连接串：`HostName=...;DeviceId=...;SharedAccessKey=...`
///
/// 可选 `ModuleId`、`GatewayHostName`；存在 `GatewayHostName` 时请求发往网关。
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceConnectionString {
    pub host_name: String,
    pub device_id: String,
    pub shared_access_key: String,
    pub module_id: Option<String>,
    pub gateway_host_name: Option<String>,
}

impl DeviceConnectionString {
    /// 请求实际发往的主机。
    pub fn endpoint_host(&self) -> &str {
        self.gateway_host_name
            .as_deref()
            .unwrap_or(self.host_name.as_str())
    }

    /// SAS 签名资源：`{HostName}/devices/{DeviceId}[/modules/{ModuleId}]`
    pub fn resource_uri(&self) -> String {
        match &self.module_id {
            Some(module_id) => format!(
                "{}/devices/{}/modules/{}",
                self.host_name, self.device_id, module_id
            ),
            None => format!("{}/devices/{}", self.host_name, self.device_id),
        }
    }
}

impl FromStr for DeviceConnectionString {
    type Err = CloudError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut host_name = None;
        let mut device_id = None;
        let mut shared_access_key = None;
        let mut module_id = None;
        let mut gateway_host_name = None;

        for part in raw.split(';').map(str::trim).filter(|part| !part.is_empty()) {
            // 密钥是 base64，可能以 '=' 结尾，只按第一个 '=' 切分
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| CloudError::ConnectionString(format!("malformed segment {}", part)))?;
            let value = value.trim().to_string();
            match key.trim() {
                "HostName" => host_name = Some(value),
                "DeviceId" => device_id = Some(value),
                "SharedAccessKey" => shared_access_key = Some(value),
                "ModuleId" => module_id = Some(value),
                "GatewayHostName" => gateway_host_name = Some(value),
                _ => {}
            }
        }

        let require = |value: Option<String>, name: &str| {
            value
                .filter(|value| !value.is_empty())
                .ok_or_else(|| CloudError::ConnectionString(format!("missing {}", name)))
        };

        Ok(Self {
            host_name: require(host_name, "HostName")?,
            device_id: require(device_id, "DeviceId")?,
            shared_access_key: require(shared_access_key, "SharedAccessKey")?,
            module_id: module_id.filter(|value| !value.is_empty()),
            gateway_host_name: gateway_host_name.filter(|value| !value.is_empty()),
        })
    }
}

// 不输出密钥
impl fmt::Debug for DeviceConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConnectionString")
            .field("host_name", &self.host_name)
            .field("device_id", &self.device_id)
            .field("module_id", &self.module_id)
            .field("gateway_host_name", &self.gateway_host_name)
            .finish_non_exhaustive()
    }
}
