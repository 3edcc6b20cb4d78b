//! 变量仓库
//!
//! 一次运行中所有动作共享的键值存储。后写覆盖先写；
//! 查不到键是正常情况，不是错误。

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use mtd_monitor::MonitorRecord;
use mtd_transport::{MessagingConnection, TestMessage};

/// 仓库中的值
#[derive(Clone)]
pub enum Variable {
    Connection(Arc<MessagingConnection>),
    Message(Arc<TestMessage>),
    Counter(i64),
    Text(String),
    Monitor(Arc<MonitorRecord>),
    /// 扩展动作使用的不透明句柄
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Variable {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Message(_) => "message",
            Self::Counter(_) => "counter",
            Self::Text(_) => "string",
            Self::Monitor(_) => "monitor",
            Self::Opaque(_) => "opaque",
        }
    }

    pub fn as_connection(&self) -> Option<&Arc<MessagingConnection>> {
        match self {
            Self::Connection(conn) => Some(conn),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&Arc<TestMessage>> {
        match self {
            Self::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_counter(&self) -> Option<i64> {
        match self {
            Self::Counter(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_monitor(&self) -> Option<&Arc<MonitorRecord>> {
        match self {
            Self::Monitor(record) => Some(record),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(conn) => f.debug_tuple("Connection").field(&conn.id()).finish(),
            Self::Message(message) => f.debug_tuple("Message").field(message).finish(),
            Self::Counter(value) => f.debug_tuple("Counter").field(value).finish(),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Monitor(record) => f.debug_tuple("Monitor").field(record).finish(),
            Self::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

/// 仓库错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("变量 {0} 不存在")]
    NotFound(String),

    #[error("变量 {key} 的类型是 {actual}，期望 {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// 变量仓库
///
/// 单次读写按键原子；锁只在同步的临界区内持有，从不跨越 await。
#[derive(Default)]
pub struct VariableRepository {
    entries: RwLock<HashMap<String, Variable>>,
}

impl VariableRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 存储变量，覆盖同名旧值
    pub async fn store(&self, key: impl Into<String>, value: Variable) {
        self.entries.write().await.insert(key.into(), value);
    }

    pub async fn get(&self, key: &str) -> Option<Variable> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// 原子地给计数器加上 `by`，返回新值
    pub async fn increment(&self, key: &str, by: i64) -> Result<i64, RepositoryError> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(Variable::Counter(value)) => {
                *value = value.wrapping_add(by);
                Ok(*value)
            }
            Some(other) => Err(RepositoryError::WrongType {
                key: key.to_string(),
                expected: "counter",
                actual: other.type_name(),
            }),
            None => Err(RepositoryError::NotFound(key.to_string())),
        }
    }

    /// 所有键（已排序）
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// 仓库中的全部连接
    pub async fn connections(&self) -> Vec<Arc<MessagingConnection>> {
        self.entries
            .read()
            .await
            .values()
            .filter_map(|v| v.as_connection().cloned())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_get() {
        let repo = VariableRepository::new();
        repo.store("greeting", Variable::Text("hello".to_string()))
            .await;

        let value = repo.get("greeting").await.unwrap();
        assert_eq!(value.as_text(), Some("hello"));
        assert!(repo.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_store_overwrites() {
        let repo = VariableRepository::new();
        repo.store("k", Variable::Counter(1)).await;
        repo.store("k", Variable::Text("x".to_string())).await;

        assert_eq!(repo.get("k").await.unwrap().type_name(), "string");
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_increment_errors() {
        let repo = VariableRepository::new();
        assert_eq!(
            repo.increment("nope", 1).await,
            Err(RepositoryError::NotFound("nope".to_string()))
        );

        repo.store("s", Variable::Text("x".to_string())).await;
        assert!(matches!(
            repo.increment("s", 1).await,
            Err(RepositoryError::WrongType { actual: "string", .. })
        ));
    }
}
