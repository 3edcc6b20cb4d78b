//! 跟踪/结果写入器
//!
//! 每条跟踪记录同时发送到 `tracing` 并追加到内存列表，
//! 运行结束后可以从列表中读取全部诊断信息。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info, trace, warn};

use crate::TraceCode;

/// 跟踪级别 (数值越大越详细)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    /// 阻止验证的故障
    Error = 1,
    /// 异常但不一定失败
    Warn = 2,
    /// 运行状态
    Status = 3,
    /// 诊断信息
    Info = 4,
    /// 调试信息
    Debug = 5,
    /// 最详细
    Trace = 6,
}

impl TraceLevel {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "status" => Some(Self::Status),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }
}

impl std::fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Status => "STATUS",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        };
        write!(f, "{}", name)
    }
}

/// 单条跟踪记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub timestamp: DateTime<Utc>,
    pub level: TraceLevel,
    pub code: TraceCode,
    /// 产生记录的动作或连接 ID
    pub source: String,
    pub message: String,
}

impl std::fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} [{}] {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.level,
            self.code,
            self.source,
            self.message
        )
    }
}

/// 测试结论
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub test: String,
    pub passed: bool,
    pub timestamp: DateTime<Utc>,
}

/// 跟踪/结果写入器
///
/// 只追加；不参与控制流。
pub struct TraceWriter {
    /// 记录的最详细级别
    verbosity: TraceLevel,

    records: Mutex<Vec<TraceRecord>>,

    results: Mutex<Vec<TestResult>>,
}

impl TraceWriter {
    pub fn new() -> Self {
        Self::with_verbosity(TraceLevel::Debug)
    }

    pub fn with_verbosity(verbosity: TraceLevel) -> Self {
        Self {
            verbosity,
            records: Mutex::new(Vec::new()),
            results: Mutex::new(Vec::new()),
        }
    }

    pub fn verbosity(&self) -> TraceLevel {
        self.verbosity
    }

    /// 写入一条跟踪记录
    pub fn write(&self, level: TraceLevel, code: TraceCode, source: &str, message: impl Into<String>) {
        let message = message.into();

        match level {
            TraceLevel::Error => error!(code = %code, source = source, "{}", message),
            TraceLevel::Warn => warn!(code = %code, source = source, "{}", message),
            TraceLevel::Status | TraceLevel::Info => {
                info!(code = %code, source = source, "{}", message)
            }
            TraceLevel::Debug => debug!(code = %code, source = source, "{}", message),
            TraceLevel::Trace => trace!(code = %code, source = source, "{}", message),
        }

        if level > self.verbosity {
            return;
        }

        let record = TraceRecord {
            timestamp: Utc::now(),
            level,
            code,
            source: source.to_string(),
            message,
        };
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    pub fn error(&self, code: TraceCode, source: &str, message: impl Into<String>) {
        self.write(TraceLevel::Error, code, source, message);
    }

    pub fn warn(&self, code: TraceCode, source: &str, message: impl Into<String>) {
        self.write(TraceLevel::Warn, code, source, message);
    }

    pub fn status(&self, code: TraceCode, source: &str, message: impl Into<String>) {
        self.write(TraceLevel::Status, code, source, message);
    }

    pub fn info(&self, code: TraceCode, source: &str, message: impl Into<String>) {
        self.write(TraceLevel::Info, code, source, message);
    }

    pub fn debug(&self, code: TraceCode, source: &str, message: impl Into<String>) {
        self.write(TraceLevel::Debug, code, source, message);
    }

    /// 记录测试结论
    pub fn record_result(&self, test: &str, passed: bool) {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TestResult {
                test: test.to_string(),
                passed,
                timestamp: Utc::now(),
            });
    }

    /// 获取所有跟踪记录的快照
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 获取指定跟踪码的记录
    pub fn records_with_code(&self, code: TraceCode) -> Vec<TraceRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.code == code)
            .cloned()
            .collect()
    }

    pub fn has_code(&self, code: TraceCode) -> bool {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|r| r.code == code)
    }

    /// 指定级别的记录数
    pub fn count(&self, level: TraceLevel) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.level == level)
            .count()
    }

    pub fn results(&self) -> Vec<TestResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for TraceWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TraceWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceWriter")
            .field("verbosity", &self.verbosity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes;

    #[test]
    fn test_write_appends_records() {
        let writer = TraceWriter::new();
        writer.error(codes::CONN_LOST, "conn-1", "连接断开");
        writer.info(codes::CONN_PENDING_TOKENS, "conn-1", "2 个未完成的投递");

        let records = writer.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, TraceLevel::Error);
        assert_eq!(records[0].source, "conn-1");
        assert!(writer.has_code(codes::CONN_PENDING_TOKENS));
        assert_eq!(writer.count(TraceLevel::Error), 1);
    }

    #[test]
    fn test_verbosity_filters_records() {
        let writer = TraceWriter::with_verbosity(TraceLevel::Warn);
        writer.debug(codes::CONN_CREATED, "conn-1", "创建连接");
        writer.warn(codes::CONNECTION_NOT_CONNECTED, "close", "连接未建立");

        assert_eq!(writer.records().len(), 1);
        assert!(!writer.has_code(codes::CONN_CREATED));
    }

    #[test]
    fn test_level_ordering_and_names() {
        assert!(TraceLevel::Error < TraceLevel::Debug);
        assert_eq!(TraceLevel::from_name("WARNING"), Some(TraceLevel::Warn));
        assert_eq!(TraceLevel::from_name("verbose"), None);
    }

    #[test]
    fn test_record_result() {
        let writer = TraceWriter::new();
        writer.record_result("pubsub", true);
        writer.record_result("failover", false);

        let results = writer.results();
        assert_eq!(results.len(), 2);
        assert!(results[0].passed);
        assert!(!results[1].passed);
    }

    #[test]
    fn test_record_serialization() {
        let writer = TraceWriter::new();
        writer.status(codes::SCRIPT_LOADED, "script", "脚本已加载");

        let json = serde_json::to_string(&writer.records()).unwrap();
        assert!(json.contains("\"status\""));
        assert!(json.contains("脚本已加载"));
    }
}
