//! MTD 监控记录
//!
//! 从监控消息负载 (JSON 对象) 解码出不可变的统计快照。
//! 记录要么完整构造，要么整体失败，不存在部分填充的记录。

pub mod decode;
pub mod record;

pub use record::{MemoryRecord, MonitorRecord, ObjectType, RecordHeader, ServerRecord};

use thiserror::Error;

/// 监控记录错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    #[error("监控负载无效: {0}")]
    InvalidPayload(String),

    #[error("缺少字段: {0}")]
    MissingField(String),

    #[error("字段 {field} 的值无效: {value}")]
    InvalidField { field: String, value: String },

    #[error("不支持的对象类型: {0}")]
    UnsupportedObjectType(String),
}

impl MonitorError {
    /// 出错的字段名 (如果有)
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingField(field) => Some(field),
            Self::InvalidField { field, .. } => Some(field),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
