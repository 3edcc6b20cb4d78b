//! 测试消息与投递令牌

use serde::{Deserialize, Serialize};

/// 服务质量等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }

    pub fn level(&self) -> u8 {
        *self as u8
    }

    /// 是否需要确认 (产生投递令牌)
    pub fn requires_ack(&self) -> bool {
        *self != Self::AtMostOnce
    }
}

/// 消息负载
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Binary(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }

    /// 用于跟踪输出的截断预览
    pub fn preview(&self) -> String {
        const MAX: usize = 64;
        let text = String::from_utf8_lossy(self.as_bytes());
        if text.chars().count() > MAX {
            let head: String = text.chars().take(MAX).collect();
            format!("{}...", head)
        } else {
            text.into_owned()
        }
    }
}

/// 测试消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMessage {
    /// 主题 (发送时可由动作参数覆盖)
    pub topic: Option<String>,
    pub payload: Payload,
    pub qos: QoS,
    pub retained: bool,
    /// 重复投递标记 (仅入站消息)
    pub duplicate: bool,
}

impl TestMessage {
    pub fn text(payload: impl Into<String>) -> Self {
        Self::new(Payload::Text(payload.into()))
    }

    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Payload::Binary(payload.into()))
    }

    fn new(payload: Payload) -> Self {
        Self {
            topic: None,
            payload,
            qos: QoS::AtMostOnce,
            retained: false,
            duplicate: false,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_retained(mut self, retained: bool) -> Self {
        self.retained = retained;
        self
    }
}

/// 投递令牌 (QoS > 0 的发布操作)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeliveryToken(pub u64);

impl std::fmt::Display for DeliveryToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 未完成的投递
#[derive(Debug, Clone)]
pub struct PendingDelivery {
    pub token: DeliveryToken,
    pub topic: String,
    pub duplicate: bool,
    pub preview: String,
}
