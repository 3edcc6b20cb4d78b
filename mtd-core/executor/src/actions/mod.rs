//! 内置动作目录

pub mod connection;
pub mod control;
pub mod message;
pub mod monitor;
pub mod variables;

use std::sync::Arc;

use mtd_common::codes;
use mtd_monitor::MonitorRecord;
use mtd_transport::{MessagingConnection, TestMessage};

use crate::registry::boxed;
use crate::{ActionContext, ActionRegistry, Variable};

pub use connection::{
    CheckPendingDelivery, CloseConnection, CreateConnection, DeleteRetainedMessage, Subscribe,
    Unsubscribe, WaitForReconnection,
};
pub use control::Sleep;
pub use message::{CompareMessageData, CreateMessage, ReceiveMessage, SendMessage};
pub use monitor::{CheckMonitorCount, CompareMonitorField, DecodeMonitorRecord};
pub use variables::{CompareCounter, CompareString, CreateCounter, IncrementCounter, StoreString};

/// 注册全部内置动作
pub fn register_builtin(registry: &mut ActionRegistry) {
    // 变量
    registry.register("CreateCounter", |c, x| boxed(CreateCounter::from_config(c, x)));
    registry.register("IncrementCounter", |c, x| {
        boxed(IncrementCounter::from_config(c, x))
    });
    registry.register("CompareCounter", |c, x| boxed(CompareCounter::from_config(c, x)));
    registry.register("StoreString", |c, x| boxed(StoreString::from_config(c, x)));
    registry.register("CompareString", |c, x| boxed(CompareString::from_config(c, x)));

    // 连接
    registry.register("CreateConnection", |c, x| {
        boxed(CreateConnection::from_config(c, x))
    });
    registry.register("CloseConnection", |c, x| boxed(CloseConnection::from_config(c, x)));
    registry.register("WaitForReconnection", |c, x| {
        boxed(WaitForReconnection::from_config(c, x))
    });
    registry.register("Subscribe", |c, x| boxed(Subscribe::from_config(c, x)));
    registry.register("Unsubscribe", |c, x| boxed(Unsubscribe::from_config(c, x)));
    registry.register("DeleteRetainedMessage", |c, x| {
        boxed(DeleteRetainedMessage::from_config(c, x))
    });
    registry.register("CheckPendingDelivery", |c, x| {
        boxed(CheckPendingDelivery::from_config(c, x))
    });

    // 消息
    registry.register("CreateMessage", |c, x| boxed(CreateMessage::from_config(c, x)));
    registry.register("SendMessage", |c, x| boxed(SendMessage::from_config(c, x)));
    registry.register("ReceiveMessage", |c, x| boxed(ReceiveMessage::from_config(c, x)));
    registry.register("CompareMessageData", |c, x| {
        boxed(CompareMessageData::from_config(c, x))
    });

    // 监控
    registry.register("DecodeMonitorRecord", |c, x| {
        boxed(DecodeMonitorRecord::from_config(c, x))
    });
    registry.register("CompareMonitorField", |c, x| {
        boxed(CompareMonitorField::from_config(c, x))
    });
    registry.register("CheckMonitorCount", |c, x| {
        boxed(CheckMonitorCount::from_config(c, x))
    });

    // 控制
    registry.register("Sleep", |c, x| boxed(Sleep::from_config(c, x)));
}

// ============================================
// 查找辅助函数
// ============================================
//
// 查不到或类型不对时记录错误跟踪并返回 None，调用方返回 false。

async fn lookup(ctx: &ActionContext, action_id: &str, key: &str) -> Option<Variable> {
    let value = ctx.repository.get(key).await;
    if value.is_none() {
        ctx.trace.error(
            codes::ACTION_VARIABLE_NOT_FOUND,
            action_id,
            format!("变量 {} 不存在", key),
        );
    }
    value
}

fn wrong_type(ctx: &ActionContext, action_id: &str, key: &str, expected: &str, actual: &Variable) {
    ctx.trace.error(
        codes::ACTION_WRONG_VARIABLE_TYPE,
        action_id,
        format!(
            "变量 {} 的类型是 {}，期望 {}",
            key,
            actual.type_name(),
            expected
        ),
    );
}

pub(crate) async fn lookup_connection(
    ctx: &ActionContext,
    action_id: &str,
    key: &str,
) -> Option<Arc<MessagingConnection>> {
    let Some(value) = ctx.repository.get(key).await else {
        ctx.trace.error(
            codes::CONNECTION_NOT_FOUND,
            action_id,
            format!("连接 {} 不存在", key),
        );
        return None;
    };

    match value {
        Variable::Connection(conn) => Some(conn),
        other => {
            wrong_type(ctx, action_id, key, "connection", &other);
            None
        }
    }
}

pub(crate) async fn lookup_message(
    ctx: &ActionContext,
    action_id: &str,
    key: &str,
) -> Option<Arc<TestMessage>> {
    let Some(value) = ctx.repository.get(key).await else {
        ctx.trace.error(
            codes::MESSAGE_NOT_FOUND,
            action_id,
            format!("消息 {} 不存在", key),
        );
        return None;
    };

    match value {
        Variable::Message(message) => Some(message),
        other => {
            wrong_type(ctx, action_id, key, "message", &other);
            None
        }
    }
}

pub(crate) async fn lookup_monitor(
    ctx: &ActionContext,
    action_id: &str,
    key: &str,
) -> Option<Arc<MonitorRecord>> {
    match lookup(ctx, action_id, key).await? {
        Variable::Monitor(record) => Some(record),
        other => {
            wrong_type(ctx, action_id, key, "monitor", &other);
            None
        }
    }
}

pub(crate) async fn lookup_counter(ctx: &ActionContext, action_id: &str, key: &str) -> Option<i64> {
    match lookup(ctx, action_id, key).await? {
        Variable::Counter(value) => Some(value),
        other => {
            wrong_type(ctx, action_id, key, "counter", &other);
            None
        }
    }
}

pub(crate) async fn lookup_text(ctx: &ActionContext, action_id: &str, key: &str) -> Option<String> {
    match lookup(ctx, action_id, key).await? {
        Variable::Text(text) => Some(text),
        other => {
            wrong_type(ctx, action_id, key, "string", &other);
            None
        }
    }
}

/// 解析 QoS 参数 (0/1/2)
pub(crate) fn parse_qos(
    config: &crate::ActionConfig,
    name: &str,
) -> Result<Option<mtd_transport::QoS>, crate::ConfigError> {
    let Some(level) = config.optional_parse::<u8>(name)? else {
        return Ok(None);
    };
    mtd_transport::QoS::from_level(level)
        .map(Some)
        .ok_or_else(|| config.invalid(name, &level.to_string(), "QoS 只能是 0、1 或 2"))
}
