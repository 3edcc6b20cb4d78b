//! 连接生命周期动作

use async_trait::async_trait;
use std::time::Duration;

use mtd_common::codes;
use mtd_transport::{ConnectOptions, ConnectionKind, QoS, TransportError};

use super::{lookup_connection, parse_qos};
use crate::{Action, ActionConfig, ActionContext, ActionError, ConfigError, Variable};

// ============================================
// CreateConnection
// ============================================

/// 创建连接并存入仓库
pub struct CreateConnection {
    id: String,
    ctx: ActionContext,
    connection_id: String,
    kind: ConnectionKind,
    host: String,
    port: u16,
    client_id: Option<String>,
    failover_host: Option<String>,
    failover_port: Option<u16>,
    clean_session: bool,
    user: Option<String>,
    password: Option<String>,
    path: Option<String>,
    connect: bool,
}

impl CreateConnection {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        let kind_name = config.required("kind")?;
        let kind = ConnectionKind::from_name(kind_name)
            .ok_or_else(|| config.invalid("kind", kind_name, "未知连接类型"))?;

        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            connection_id: config.required_string("connection_id")?,
            kind,
            host: config.required_string("host")?,
            port: config.parse_or("port", kind.default_port())?,
            client_id: config.optional_string("client_id"),
            failover_host: config.optional_string("failover_host"),
            failover_port: config.optional_parse("failover_port")?,
            clean_session: config.flag_or("clean_session", true)?,
            user: config.optional_string("user"),
            password: config.optional_string("password"),
            path: config.optional_string("path"),
            connect: config.flag_or("connect", true)?,
        })
    }

    fn options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::new(self.host.clone(), self.port)
            .with_clean_session(self.clean_session);
        if let Some(client_id) = &self.client_id {
            options = options.with_client_id(client_id.clone());
        }
        if let Some(host) = &self.failover_host {
            options = options.with_failover(host.clone(), self.failover_port);
        }
        if let Some(user) = &self.user {
            options = options.with_credentials(user.clone(), self.password.clone());
        }
        options.path = self.path.clone();
        options
    }
}

#[async_trait]
impl Action for CreateConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "CreateConnection"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        let conn = self
            .ctx
            .transports
            .open(
                &self.connection_id,
                self.kind,
                self.options(),
                self.ctx.transport_config.clone(),
                self.ctx.trace.clone(),
            )
            .await
            .map_err(|e| {
                ActionError::new(
                    codes::KIND_NOT_REGISTERED,
                    format!("无法创建连接 {}", self.connection_id),
                )
                .with_source(e)
            })?;

        // 先存入仓库，连接失败时脚本仍可关闭或检查它
        self.ctx
            .repository
            .store(&self.connection_id, Variable::Connection(conn.clone()))
            .await;

        if !self.connect {
            return Ok(true);
        }

        if let Err(e) = conn.connect().await {
            self.ctx.trace.error(
                codes::CONNECTION_CREATE_FAILED,
                &self.id,
                format!("连接 {} 建立失败: {}", self.connection_id, e),
            );
            return Ok(false);
        }
        Ok(true)
    }
}

// ============================================
// CloseConnection
// ============================================

/// 关闭连接（幂等）
pub struct CloseConnection {
    id: String,
    ctx: ActionContext,
    connection_id: String,
    reason_code: u8,
    reason: Option<String>,
}

impl CloseConnection {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            connection_id: config.required_string("connection_id")?,
            reason_code: config.parse_or("reason_code", 0)?,
            reason: config.optional_string("reason"),
        })
    }
}

#[async_trait]
impl Action for CloseConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "CloseConnection"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        let Some(conn) = lookup_connection(&self.ctx, &self.id, &self.connection_id).await else {
            return Ok(false);
        };

        if let Err(e) = conn.close(self.reason_code, self.reason.as_deref()).await {
            self.ctx.trace.error(
                codes::CLOSE_FAILED,
                &self.id,
                format!("关闭连接 {} 失败: {}", self.connection_id, e),
            );
            return Ok(false);
        }
        Ok(true)
    }
}

// ============================================
// WaitForReconnection
// ============================================

/// 等待连接重连
pub struct WaitForReconnection {
    id: String,
    ctx: ActionContext,
    connection_id: String,
    wait: Duration,
}

impl WaitForReconnection {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            connection_id: config.required_string("connection_id")?,
            wait: config.millis_or("wait_ms", ctx.waits.reconnect())?,
        })
    }
}

#[async_trait]
impl Action for WaitForReconnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "WaitForReconnection"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        let Some(conn) = lookup_connection(&self.ctx, &self.id, &self.connection_id).await else {
            return Ok(false);
        };

        if !conn.wait_for_reconnection(self.wait).await {
            self.ctx.trace.error(
                codes::RECONNECT_TIMEOUT,
                &self.id,
                format!(
                    "连接 {} 在 {:?} 内未恢复，当前状态 {:?}",
                    self.connection_id,
                    self.wait,
                    conn.state()
                ),
            );
            return Ok(false);
        }
        Ok(true)
    }
}

// ============================================
// Subscribe / Unsubscribe
// ============================================

/// 订阅主题
pub struct Subscribe {
    id: String,
    ctx: ActionContext,
    connection_id: String,
    topic: String,
    qos: QoS,
}

impl Subscribe {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            connection_id: config.required_string("connection_id")?,
            topic: config.required_string("topic")?,
            qos: parse_qos(config, "qos")?.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl Action for Subscribe {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "Subscribe"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        let Some(conn) = lookup_connection(&self.ctx, &self.id, &self.connection_id).await else {
            return Ok(false);
        };

        if let Err(e) = conn.subscribe(&self.topic, self.qos).await {
            self.ctx.trace.error(
                codes::SUBSCRIBE_FAILED,
                &self.id,
                format!("连接 {} 订阅 {} 失败: {}", self.connection_id, self.topic, e),
            );
            return Ok(false);
        }
        Ok(true)
    }
}

/// 取消订阅
pub struct Unsubscribe {
    id: String,
    ctx: ActionContext,
    connection_id: String,
    topic: String,
}

impl Unsubscribe {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            connection_id: config.required_string("connection_id")?,
            topic: config.required_string("topic")?,
        })
    }
}

#[async_trait]
impl Action for Unsubscribe {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "Unsubscribe"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        let Some(conn) = lookup_connection(&self.ctx, &self.id, &self.connection_id).await else {
            return Ok(false);
        };

        if let Err(e) = conn.unsubscribe(&self.topic).await {
            self.ctx.trace.error(
                codes::SUBSCRIBE_FAILED,
                &self.id,
                format!(
                    "连接 {} 取消订阅 {} 失败: {}",
                    self.connection_id, self.topic, e
                ),
            );
            return Ok(false);
        }
        Ok(true)
    }
}

// ============================================
// DeleteRetainedMessage
// ============================================

/// 删除主题上的保留消息
pub struct DeleteRetainedMessage {
    id: String,
    ctx: ActionContext,
    connection_id: String,
    topic: String,
}

impl DeleteRetainedMessage {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            connection_id: config.required_string("connection_id")?,
            topic: config.required_string("topic")?,
        })
    }
}

#[async_trait]
impl Action for DeleteRetainedMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "DeleteRetainedMessage"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        let Some(conn) = lookup_connection(&self.ctx, &self.id, &self.connection_id).await else {
            return Ok(false);
        };

        if !conn.is_connected() {
            self.ctx.trace.warn(
                codes::CONNECTION_NOT_CONNECTED,
                &self.id,
                format!(
                    "连接 {} 当前状态 {:?}，仍尝试删除保留消息",
                    self.connection_id,
                    conn.state()
                ),
            );
        }

        match conn.delete_retained(&self.topic).await {
            Ok(()) => Ok(true),
            Err(e @ TransportError::Unsupported { .. }) => Err(ActionError::new(
                codes::DELETE_RETAINED_FAILED,
                format!("连接 {} 不支持删除保留消息", self.connection_id),
            )
            .with_source(e)),
            Err(e) => {
                self.ctx.trace.error(
                    codes::DELETE_RETAINED_FAILED,
                    &self.id,
                    format!(
                        "删除 {} 上的保留消息失败: {}",
                        self.topic, e
                    ),
                );
                Ok(false)
            }
        }
    }
}

// ============================================
// CheckPendingDelivery
// ============================================

/// 检查未完成的投递
///
/// 所有投递都已确认时返回 true；`wait_ms` 大于 0 时先等待确认。
pub struct CheckPendingDelivery {
    id: String,
    ctx: ActionContext,
    connection_id: String,
    wait: Duration,
}

impl CheckPendingDelivery {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            connection_id: config.required_string("connection_id")?,
            wait: config.millis_or("wait_ms", ctx.waits.pending_delivery())?,
        })
    }
}

#[async_trait]
impl Action for CheckPendingDelivery {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "CheckPendingDelivery"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        let Some(conn) = lookup_connection(&self.ctx, &self.id, &self.connection_id).await else {
            return Ok(false);
        };

        if !self.wait.is_zero() {
            conn.wait_for_delivery(self.wait).await;
        }

        let pending = conn.check_pending_delivery_tokens();
        if pending > 0 {
            self.ctx.trace.error(
                codes::PENDING_DELIVERY_REMAIN,
                &self.id,
                format!(
                    "连接 {} 仍有 {} 个未完成的投递",
                    self.connection_id, pending
                ),
            );
            return Ok(false);
        }
        Ok(true)
    }
}
