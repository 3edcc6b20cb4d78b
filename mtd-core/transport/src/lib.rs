//! MTD 传输层
//!
//! 负责消息连接的生命周期管理：连接、发布、订阅、断开、自动重连，
//! 以及未完成投递和监控记录计数。具体的线协议客户端通过
//! [`TransportClient`] trait 接入。

pub mod client;
pub mod config;
pub mod connection;
pub mod loopback;
pub mod message;
pub mod registry;

pub use client::{ConnectOptions, Endpoint, EventSink, TransportClient};
pub use config::{ReconnectConfig, TransportConfig};
pub use connection::{ConnectionState, MessagingConnection};
pub use loopback::{LoopbackBroker, LoopbackBuilder, LoopbackTransport};
pub use message::{DeliveryToken, Payload, PendingDelivery, QoS, TestMessage};
pub use registry::{TransportBuilder, TransportRegistry};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 传输层错误
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("连接失败: {0}")]
    ConnectionFailed(String),

    #[error("连接 {0} 未建立")]
    NotConnected(String),

    #[error("连接 {0} 已断开")]
    Disconnected(String),

    #[error("连接 {0} 已关闭")]
    Closed(String),

    #[error("连接超时")]
    Timeout,

    #[error("{kind} 连接不支持操作 {operation}")]
    Unsupported {
        kind: ConnectionKind,
        operation: &'static str,
    },

    #[error("未注册 {0} 类型的传输")]
    NotRegistered(ConnectionKind),

    #[error("发布失败: {0}")]
    PublishFailed(String),

    #[error("订阅失败: {0}")]
    SubscribeFailed(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// 连接类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionKind {
    /// MQTT (TCP)
    Mqtt,
    /// MQTT over WebSocket
    MqttWs,
    /// Kafka
    Kafka,
    /// HTTP
    Http,
}

impl ConnectionKind {
    pub const ALL: [ConnectionKind; 4] = [
        ConnectionKind::Mqtt,
        ConnectionKind::MqttWs,
        ConnectionKind::Kafka,
        ConnectionKind::Http,
    ];

    /// 脚本中的名称
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mqtt => "mqtt",
            Self::MqttWs => "mqtt-ws",
            Self::Kafka => "kafka",
            Self::Http => "http",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name))
    }

    /// 是否属于 MQTT 家族 (支持保留消息)
    pub fn is_mqtt(&self) -> bool {
        matches!(self, Self::Mqtt | Self::MqttWs)
    }

    /// 默认端口
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Mqtt => 1883,
            Self::MqttWs => 80,
            Self::Kafka => 9092,
            Self::Http => 8080,
        }
    }
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ConnectionKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| TransportError::ConfigError(format!("未知连接类型: {}", s)))
    }
}
