//! 动作错误类型
//!
//! 构造期错误 ([`ConfigError`]) 和运行期结构化失败 ([`ActionError`])
//! 是两个独立的类型：前者阻止脚本加载，后者终止本次运行。

use mtd_common::TraceCode;
use thiserror::Error;

/// 构造期配置错误（致命）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("动作 {action}: 缺少必需参数 {param}")]
    MissingParameter { action: String, param: String },

    #[error("动作 {action}: 参数 {param} 的值 {value:?} 无效: {reason}")]
    InvalidParameter {
        action: String,
        param: String,
        value: String,
        reason: String,
    },

    #[error("未知动作类型: {0}")]
    UnknownAction(String),

    #[error("脚本无效: {0}")]
    Script(String),
}

/// 运行期结构化失败
///
/// 表示检查本身无法进行，而不是检查结果为假。
#[derive(Error, Debug)]
#[error("{code} {message}")]
pub struct ActionError {
    pub code: TraceCode,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ActionError {
    pub fn new(code: TraceCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// 包含原因链的完整描述
    pub fn describe(&self) -> String {
        match &self.source {
            Some(source) => format!("{}: {}", self, source),
            None => self.to_string(),
        }
    }
}
