//! 消息动作：创建、发送、接收、比较负载

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use mtd_common::codes;
use mtd_transport::{Payload, QoS, TestMessage};

use super::{lookup_connection, lookup_message, parse_qos};
use crate::{Action, ActionConfig, ActionContext, ActionError, ConfigError, Variable};

fn decode_base64(config: &ActionConfig, name: &str, value: &str) -> Result<Vec<u8>, ConfigError> {
    BASE64
        .decode(value.trim())
        .map_err(|e| config.invalid(name, value, e.to_string()))
}

// ============================================
// CreateMessage
// ============================================

/// 创建消息并存入仓库
///
/// `msg_type` 为 `binary` 时 `payload` 是 base64 编码。
pub struct CreateMessage {
    id: String,
    ctx: ActionContext,
    message_id: String,
    message: Arc<TestMessage>,
}

impl CreateMessage {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        let raw = config.params.get("payload").ok_or_else(|| ConfigError::MissingParameter {
            action: config.id.clone(),
            param: "payload".to_string(),
        })?;

        let mut message = match config.optional("msg_type").unwrap_or("text") {
            "text" => TestMessage::text(raw.clone()),
            "binary" => TestMessage::binary(decode_base64(config, "payload", raw)?),
            other => return Err(config.invalid("msg_type", other, "期望 text 或 binary")),
        };

        if let Some(topic) = config.optional_string("topic") {
            message = message.with_topic(topic);
        }
        message = message
            .with_qos(parse_qos(config, "qos")?.unwrap_or_default())
            .with_retained(config.flag_or("retained", false)?);

        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            message_id: config.required_string("message_id")?,
            message: Arc::new(message),
        })
    }
}

#[async_trait]
impl Action for CreateMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "CreateMessage"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        self.ctx
            .repository
            .store(&self.message_id, Variable::Message(self.message.clone()))
            .await;
        self.ctx.trace.debug(
            codes::VARIABLE_STORED,
            &self.id,
            format!(
                "消息 {} ({}, {} 字节)",
                self.message_id,
                self.message.payload.type_name(),
                self.message.payload.len()
            ),
        );
        Ok(true)
    }
}

// ============================================
// SendMessage
// ============================================

/// 在连接上发布消息
///
/// `wait_for_ack` 为真时在 `wait_ms` 内等待 QoS 确认，超时是结构化失败。
pub struct SendMessage {
    id: String,
    ctx: ActionContext,
    connection_id: String,
    message_id: String,
    topic: Option<String>,
    qos: Option<QoS>,
    retained: Option<bool>,
    wait_for_ack: bool,
    ack_wait: Duration,
}

impl SendMessage {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            connection_id: config.required_string("connection_id")?,
            message_id: config.required_string("message_id")?,
            topic: config.optional_string("topic"),
            qos: parse_qos(config, "qos")?,
            retained: config.optional_flag("retained")?,
            wait_for_ack: config.flag_or("wait_for_ack", false)?,
            ack_wait: config.millis_or("wait_ms", ctx.waits.ack())?,
        })
    }
}

#[async_trait]
impl Action for SendMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "SendMessage"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        let Some(conn) = lookup_connection(&self.ctx, &self.id, &self.connection_id).await else {
            return Ok(false);
        };
        let Some(stored) = lookup_message(&self.ctx, &self.id, &self.message_id).await else {
            return Ok(false);
        };

        let message = if self.qos.is_some() || self.retained.is_some() {
            let mut message = (*stored).clone();
            if let Some(qos) = self.qos {
                message.qos = qos;
            }
            if let Some(retained) = self.retained {
                message.retained = retained;
            }
            Arc::new(message)
        } else {
            stored
        };

        match conn.publish(&message, self.topic.as_deref()).await {
            Ok(token) => {
                debug!(
                    "{}: 消息 {} 已发送 (令牌 {:?})",
                    self.id, self.message_id, token
                );
                match token {
                    Some(token) if self.wait_for_ack => {
                        if conn.wait_for_token(token, self.ack_wait).await {
                            Ok(true)
                        } else {
                            Err(ActionError::new(
                                codes::SEND_ACK_TIMEOUT,
                                format!(
                                    "连接 {} 上的消息 {} 在 {:?} 内未收到确认",
                                    self.connection_id, self.message_id, self.ack_wait
                                ),
                            ))
                        }
                    }
                    _ => Ok(true),
                }
            }
            Err(e) => {
                self.ctx.trace.error(
                    codes::SEND_FAILED,
                    &self.id,
                    format!(
                        "在连接 {} 上发送消息 {} 失败: {}",
                        self.connection_id, self.message_id, e
                    ),
                );
                Ok(false)
            }
        }
    }
}

// ============================================
// ReceiveMessage
// ============================================

/// 从连接接收一条消息并存入仓库
///
/// `expect_none` 为真时期望超时内没有消息。
pub struct ReceiveMessage {
    id: String,
    ctx: ActionContext,
    connection_id: String,
    message_id: String,
    wait: Duration,
    expect_none: bool,
}

impl ReceiveMessage {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            connection_id: config.required_string("connection_id")?,
            message_id: config.required_string("message_id")?,
            wait: config.millis_or("wait_ms", ctx.waits.receive())?,
            expect_none: config.flag_or("expect_none", false)?,
        })
    }
}

#[async_trait]
impl Action for ReceiveMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "ReceiveMessage"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        let Some(conn) = lookup_connection(&self.ctx, &self.id, &self.connection_id).await else {
            return Ok(false);
        };

        let received = conn.receive(self.wait).await.map_err(|e| {
            ActionError::new(
                codes::RECEIVE_FAILED,
                format!("无法在连接 {} 上接收消息", self.connection_id),
            )
            .with_source(e)
        })?;

        match (received, self.expect_none) {
            (Some(message), false) => {
                self.ctx
                    .repository
                    .store(&self.message_id, Variable::Message(Arc::new(message)))
                    .await;
                Ok(true)
            }
            (None, true) => Ok(true),
            (Some(message), true) => {
                self.ctx.trace.error(
                    codes::UNEXPECTED_MESSAGE,
                    &self.id,
                    format!(
                        "连接 {} 收到意外消息，主题 {}，负载 {}",
                        self.connection_id,
                        message.topic.as_deref().unwrap_or("-"),
                        message.payload.preview()
                    ),
                );
                Ok(false)
            }
            (None, false) => {
                self.ctx.trace.error(
                    codes::RECEIVE_TIMEOUT,
                    &self.id,
                    format!(
                        "连接 {} 在 {:?} 内没有收到消息",
                        self.connection_id, self.wait
                    ),
                );
                Ok(false)
            }
        }
    }
}

// ============================================
// CompareMessageData
// ============================================

/// 比较消息负载
///
/// `compare_to` 比较文本负载，`compare_to_base64` 比较二进制负载。
/// 负载类型不一致是结构化失败。
pub struct CompareMessageData {
    id: String,
    ctx: ActionContext,
    message_id: String,
    expected: Payload,
}

impl CompareMessageData {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        let text = config.params.get("compare_to");
        let binary = config.optional("compare_to_base64");

        let expected = match (text, binary) {
            (Some(text), None) => Payload::Text(text.clone()),
            (None, Some(encoded)) => {
                Payload::Binary(decode_base64(config, "compare_to_base64", encoded)?)
            }
            (Some(_), Some(_)) => {
                return Err(config.invalid(
                    "compare_to_base64",
                    binary.unwrap_or_default(),
                    "compare_to 和 compare_to_base64 只能提供一个",
                ))
            }
            (None, None) => {
                return Err(ConfigError::MissingParameter {
                    action: config.id.clone(),
                    param: "compare_to".to_string(),
                })
            }
        };

        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            message_id: config.required_string("message_id")?,
            expected,
        })
    }
}

#[async_trait]
impl Action for CompareMessageData {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "CompareMessageData"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        let Some(message) = lookup_message(&self.ctx, &self.id, &self.message_id).await else {
            return Ok(false);
        };

        if message.payload.is_text() != self.expected.is_text() {
            return Err(ActionError::new(
                codes::PAYLOAD_TYPE_MISMATCH,
                format!(
                    "消息 {} 的负载类型是 {}，期望 {}",
                    self.message_id,
                    message.payload.type_name(),
                    self.expected.type_name()
                ),
            ));
        }

        if message.payload != self.expected {
            self.ctx.trace.error(
                codes::PAYLOAD_MISMATCH,
                &self.id,
                format!(
                    "消息 {} 的负载 {:?} 与期望 {:?} 不一致",
                    self.message_id,
                    message.payload.preview(),
                    self.expected.preview()
                ),
            );
            return Ok(false);
        }
        Ok(true)
    }
}
