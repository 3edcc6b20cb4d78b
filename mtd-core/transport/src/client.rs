//! 传输客户端抽象接口

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Weak;

use crate::connection::MessagingConnection;
use crate::{ConnectionKind, DeliveryToken, QoS, Result, TestMessage, TransportError};

/// 服务端地址
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // IPv6 地址需要加方括号
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// 连接选项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub failover_host: Option<String>,
    pub failover_port: Option<u16>,
    pub clean_session: bool,
    pub user: Option<String>,
    pub password: Option<String>,
    /// WebSocket / HTTP 路径
    pub path: Option<String>,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: generate_client_id(),
            failover_host: None,
            failover_port: None,
            clean_session: true,
            user: None,
            password: None,
            path: None,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// 设置故障转移地址（端口缺省时沿用主端口）
    pub fn with_failover(mut self, host: impl Into<String>, port: Option<u16>) -> Self {
        self.failover_host = Some(host.into());
        self.failover_port = port;
        self
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.user = Some(user.into());
        self.password = password;
        self
    }

    pub fn primary(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn failover(&self) -> Option<Endpoint> {
        self.failover_host
            .as_ref()
            .map(|host| Endpoint::new(host.clone(), self.failover_port.unwrap_or(self.port)))
    }

    /// 尝试顺序：主地址，然后故障转移地址
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints = vec![self.primary()];
        endpoints.extend(self.failover());
        endpoints
    }
}

/// 生成客户端 ID（不超过 MQTT 3.1 的 23 字符限制）
pub fn generate_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("mtd-{}", &id[..19])
}

/// 传输事件接收器
///
/// 客户端实现用它把异步事件（投递完成、消息到达、链路丢失）
/// 回报给所属连接。连接释放后事件被静默丢弃。
#[derive(Clone, Default)]
pub struct EventSink {
    conn: Weak<MessagingConnection>,
}

impl EventSink {
    pub(crate) fn new(conn: Weak<MessagingConnection>) -> Self {
        Self { conn }
    }

    /// 不关联任何连接的接收器
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn delivery_complete(&self, token: DeliveryToken) {
        if let Some(conn) = self.conn.upgrade() {
            conn.on_delivery_complete(token);
        }
    }

    pub fn message_arrived(&self, message: TestMessage) {
        if let Some(conn) = self.conn.upgrade() {
            conn.on_message_arrived(message);
        }
    }

    pub fn connection_lost(&self, cause: &str) {
        if let Some(conn) = self.conn.upgrade() {
            conn.handle_connection_lost(cause);
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("attached", &(self.conn.strong_count() > 0))
            .finish()
    }
}

/// 传输客户端 trait
///
/// 每种连接类型的线协议实现必须实现此 trait。
/// 连接对象负责状态管理和跟踪，客户端只做协议操作。
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// 连接类型
    fn kind(&self) -> ConnectionKind;

    /// 绑定事件接收器（连接创建时调用一次）
    fn bind(&mut self, sink: EventSink);

    /// 连接到指定地址
    async fn connect(&mut self, endpoint: &Endpoint, options: &ConnectOptions) -> Result<()>;

    /// 断开连接
    async fn disconnect(&mut self, reason_code: u8, reason: Option<&str>) -> Result<()>;

    /// 发布消息；token 为 None 表示无需确认
    async fn publish(
        &mut self,
        token: Option<DeliveryToken>,
        message: &TestMessage,
        topic: &str,
    ) -> Result<()>;

    async fn subscribe(&mut self, _topic: &str, _qos: QoS) -> Result<()> {
        Err(TransportError::Unsupported {
            kind: self.kind(),
            operation: "subscribe",
        })
    }

    async fn unsubscribe(&mut self, _topic: &str) -> Result<()> {
        Err(TransportError::Unsupported {
            kind: self.kind(),
            operation: "unsubscribe",
        })
    }

    /// 删除主题上的保留消息
    async fn delete_retained(&mut self, _topic: &str) -> Result<()> {
        Err(TransportError::Unsupported {
            kind: self.kind(),
            operation: "delete_retained",
        })
    }

    /// 底层客户端的诊断描述
    fn debug_handle(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::new("broker", 1883).to_string(), "broker:1883");
        assert_eq!(Endpoint::new("::1", 1883).to_string(), "[::1]:1883");
    }

    #[test]
    fn test_endpoints_order() {
        let options = ConnectOptions::new("primary", 1883);
        assert_eq!(options.endpoints(), vec![Endpoint::new("primary", 1883)]);

        let options = options.with_failover("backup", None);
        assert_eq!(
            options.endpoints(),
            vec![Endpoint::new("primary", 1883), Endpoint::new("backup", 1883)]
        );
    }

    #[test]
    fn test_generated_client_ids() {
        let a = generate_client_id();
        let b = generate_client_id();
        assert_ne!(a, b);
        assert!(a.starts_with("mtd-"));
        assert_eq!(a.len(), 23);
    }
}
