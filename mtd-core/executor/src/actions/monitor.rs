//! 监控记录动作

use async_trait::async_trait;
use std::sync::Arc;

use mtd_common::codes;
use mtd_monitor::{MonitorRecord, ObjectType};

use super::{lookup_connection, lookup_message, lookup_monitor};
use crate::{Action, ActionConfig, ActionContext, ActionError, ConfigError, Variable};

/// 把监控消息解码为记录并存入仓库
///
/// 指定 `connection_id` 时同时累加该连接的监控记录计数。
pub struct DecodeMonitorRecord {
    id: String,
    ctx: ActionContext,
    message_id: String,
    record_id: String,
    connection_id: Option<String>,
}

impl DecodeMonitorRecord {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            message_id: config.required_string("message_id")?,
            record_id: config.required_string("record_id")?,
            connection_id: config.optional_string("connection_id"),
        })
    }
}

#[async_trait]
impl Action for DecodeMonitorRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "DecodeMonitorRecord"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        let Some(message) = lookup_message(&self.ctx, &self.id, &self.message_id).await else {
            return Ok(false);
        };

        let record = match MonitorRecord::decode_bytes(message.payload.as_bytes()) {
            Ok(record) => record,
            Err(e) => {
                self.ctx.trace.error(
                    codes::MONITOR_DECODE_FAILED,
                    &self.id,
                    format!("消息 {} 无法解码为监控记录: {}", self.message_id, e),
                );
                return Err(ActionError::new(
                    codes::MONITOR_DECODE,
                    format!("解码监控记录 {} 失败", self.record_id),
                )
                .with_source(e));
            }
        };

        // 先解析连接，引用无效时不存储记录
        let conn = match &self.connection_id {
            Some(connection_id) => {
                match lookup_connection(&self.ctx, &self.id, connection_id).await {
                    Some(conn) => Some(conn),
                    None => return Ok(false),
                }
            }
            None => None,
        };

        let object_type = record.object_type();
        self.ctx
            .repository
            .store(&self.record_id, Variable::Monitor(Arc::new(record)))
            .await;
        self.ctx.trace.debug(
            codes::MONITOR_RECORD_STORED,
            &self.id,
            format!("{} 监控记录存入 {}", object_type, self.record_id),
        );

        if let Some(conn) = conn {
            conn.count_monitor_record(object_type);
        }
        Ok(true)
    }
}

/// 比较监控记录中的数值字段
///
/// `field` 使用负载中的字段名，例如 `ActiveConnections`。
pub struct CompareMonitorField {
    id: String,
    ctx: ActionContext,
    record_id: String,
    field: String,
    expected: f64,
}

impl CompareMonitorField {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            record_id: config.required_string("record_id")?,
            field: config.required_string("field")?,
            expected: config.required_parse("expected")?,
        })
    }
}

#[async_trait]
impl Action for CompareMonitorField {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "CompareMonitorField"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        let Some(record) = lookup_monitor(&self.ctx, &self.id, &self.record_id).await else {
            return Ok(false);
        };

        let Some(actual) = record.field(&self.field) else {
            return Err(ActionError::new(
                codes::MONITOR_UNKNOWN_FIELD,
                format!(
                    "{} 记录 {} 没有字段 {}",
                    record.object_type(),
                    self.record_id,
                    self.field
                ),
            ));
        };

        if actual != self.expected {
            self.ctx.trace.error(
                codes::MONITOR_FIELD_MISMATCH,
                &self.id,
                format!(
                    "记录 {} 的 {} 为 {}，期望 {}",
                    self.record_id, self.field, actual, self.expected
                ),
            );
            return Ok(false);
        }
        Ok(true)
    }
}

/// 检查连接的监控记录计数
///
/// 未指定 `object_type` 时比较所有类型的总数。
pub struct CheckMonitorCount {
    id: String,
    ctx: ActionContext,
    connection_id: String,
    expected: u64,
    object_type: Option<ObjectType>,
}

impl CheckMonitorCount {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        let object_type = match config.optional("object_type") {
            Some(name) => Some(
                ObjectType::from_name(name)
                    .ok_or_else(|| config.invalid("object_type", name, "期望 Server 或 Memory"))?,
            ),
            None => None,
        };

        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            connection_id: config.required_string("connection_id")?,
            expected: config.required_parse("expected")?,
            object_type,
        })
    }
}

#[async_trait]
impl Action for CheckMonitorCount {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "CheckMonitorCount"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        let Some(conn) = lookup_connection(&self.ctx, &self.id, &self.connection_id).await else {
            return Ok(false);
        };

        let actual = conn.monitor_record_count(self.object_type);
        if actual != self.expected {
            let scope = self
                .object_type
                .map(|t| t.name())
                .unwrap_or("全部");
            self.ctx.trace.error(
                codes::MONITOR_COUNT_MISMATCH,
                &self.id,
                format!(
                    "连接 {} 的 {} 监控记录数为 {}，期望 {}",
                    self.connection_id, scope, actual, self.expected
                ),
            );
            return Ok(false);
        }
        Ok(true)
    }
}
