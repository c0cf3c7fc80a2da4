//! 静态点位服务器：值来自配置文件的 `value` 字段，用于接线与联调。

use crate::{
    DEFAULT_UPDATE_RATE_MS, IngestError, SUBSCRIPTION_NAME, ServerStatus, SubscriptionState,
    TagServer, TagSession, tag_value_from_json,
};
use async_trait::async_trait;
use domain::{TagReading, TagValue};
use std::collections::HashMap;
use tracing::debug;

/// 静态点位服务器。
#[derive(Debug, Clone, Default)]
pub struct StaticTagServer {
    values: HashMap<String, TagValue>,
}

impl StaticTagServer {
    /// 从配置项 (name, value) 构造；无值或无法转换的点位不会出现在服务器中。
    ///
    /// 字符串形式的数值（如 `"42"`）按数值处理。
    pub fn from_json_values<'a>(
        items: impl IntoIterator<Item = (&'a str, Option<&'a serde_json::Value>)>,
    ) -> Self {
        let values = items
            .into_iter()
            .filter_map(|(name, value)| {
                let value = coerce_config_value(value?)?;
                Some((name.to_string(), value))
            })
            .collect();
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl TagServer for StaticTagServer {
    async fn connect(&self) -> Result<Box<dyn TagSession>, IngestError> {
        Ok(Box::new(StaticTagSession {
            values: self.values.clone(),
            status: ServerStatus {
                vendor_info: "opc-bridge static tag server".to_string(),
                product_version: env!("CARGO_PKG_VERSION").to_string(),
                status_info: "running".to_string(),
            },
            subscription: None,
        }))
    }
}

struct StaticTagSession {
    values: HashMap<String, TagValue>,
    status: ServerStatus,
    subscription: Option<SubscriptionState>,
}

#[async_trait]
impl TagSession for StaticTagSession {
    fn status(&self) -> &ServerStatus {
        &self.status
    }

    async fn register_tags(&mut self, tag_names: &[String]) -> Result<(), IngestError> {
        if let Some(unknown) = tag_names.iter().find(|name| !self.values.contains_key(*name)) {
            return Err(IngestError::Registration(format!("unknown item {}", unknown)));
        }
        let subscription =
            SubscriptionState::new(SUBSCRIPTION_NAME, DEFAULT_UPDATE_RATE_MS, tag_names);
        debug!(
            target: "bridge.ingest",
            client_handle = %subscription.client_handle,
            items = subscription.items.len(),
            "static_subscription_created"
        );
        self.subscription = Some(subscription);
        Ok(())
    }

    async fn read_all(&mut self) -> Result<Vec<TagReading>, IngestError> {
        let subscription = self
            .subscription
            .as_ref()
            .ok_or_else(|| IngestError::Read("no subscription registered".to_string()))?;
        Ok(subscription
            .item_names()
            .filter_map(|name| {
                let value = self.values.get(name)?.clone();
                let mut reading = TagReading::now(name, value);
                reading.quality = Some("good".to_string());
                Some(reading)
            })
            .collect())
    }
}

fn coerce_config_value(value: &serde_json::Value) -> Option<TagValue> {
    if let serde_json::Value::String(raw) = value {
        let trimmed = raw.trim();
        if let Ok(v) = trimmed.parse::<i64>() {
            return Some(TagValue::I64(v));
        }
        if let Ok(v) = trimmed.parse::<f64>() {
            if v.is_finite() {
                return Some(TagValue::F64(v));
            }
        }
        if let Ok(v) = trimmed.parse::<bool>() {
            return Some(TagValue::Bool(v));
        }
    }
    tag_value_from_json(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> StaticTagServer {
        let tag1 = serde_json::json!("42");
        let tag2 = serde_json::json!(1.25);
        let tag3 = serde_json::json!("open");
        StaticTagServer::from_json_values(vec![
            ("Tag1", Some(&tag1)),
            ("Tag2", Some(&tag2)),
            ("Tag3", Some(&tag3)),
            ("Tag4", None),
        ])
    }

    #[test]
    fn config_values_are_coerced() {
        let server = server();
        assert_eq!(server.len(), 3);
        assert_eq!(server.values.get("Tag1"), Some(&TagValue::I64(42)));
        assert_eq!(server.values.get("Tag2"), Some(&TagValue::F64(1.25)));
        assert_eq!(
            server.values.get("Tag3"),
            Some(&TagValue::String("open".to_string()))
        );
        assert!(!server.values.contains_key("Tag4"));
    }

    #[tokio::test]
    async fn read_requires_registration() {
        let mut session = server().connect().await.expect("connect");
        let err = session.read_all().await.expect_err("not registered");
        assert!(matches!(err, IngestError::Read(_)));
    }

    #[tokio::test]
    async fn unknown_item_rejected() {
        let mut session = server().connect().await.expect("connect");
        let err = session
            .register_tags(&["Tag1".to_string(), "Tag4".to_string()])
            .await
            .expect_err("unknown");
        assert_eq!(err.to_string(), "registration error: unknown item Tag4");
    }

    #[tokio::test]
    async fn reads_registered_items_in_order() {
        let mut session = server().connect().await.expect("connect");
        assert_eq!(session.status().status_info, "running");
        session
            .register_tags(&["Tag2".to_string(), "Tag1".to_string()])
            .await
            .expect("register");

        let readings = session.read_all().await.expect("read");
        let names: Vec<_> = readings.iter().map(|r| r.tag_name.as_str()).collect();
        assert_eq!(names, vec!["Tag2", "Tag1"]);
        assert_eq!(readings[1].value, TagValue::I64(42));
        assert_eq!(readings[0].quality.as_deref(), Some("good"));
    }
}
