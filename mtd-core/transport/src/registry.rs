//! 传输注册表

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use mtd_common::TraceWriter;

use crate::{
    ConnectOptions, ConnectionKind, MessagingConnection, Result, TransportClient, TransportConfig,
    TransportError,
};

/// 传输构建器 trait
///
/// 用于为指定连接类型创建客户端实例
pub trait TransportBuilder: Send + Sync {
    fn build(&self, kind: ConnectionKind, options: &ConnectOptions) -> Box<dyn TransportClient>;
}

/// 传输注册表
///
/// 按连接类型管理客户端构建器
pub struct TransportRegistry {
    builders: RwLock<HashMap<ConnectionKind, Arc<dyn TransportBuilder>>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self {
            builders: RwLock::new(HashMap::new()),
        }
    }

    /// 构造期注册（无需异步上下文）
    pub fn with_builder(mut self, kind: ConnectionKind, builder: Arc<dyn TransportBuilder>) -> Self {
        self.builders.get_mut().insert(kind, builder);
        self
    }

    /// 为所有连接类型注册同一个构建器
    pub fn with_all(mut self, builder: Arc<dyn TransportBuilder>) -> Self {
        let builders = self.builders.get_mut();
        for kind in ConnectionKind::ALL {
            builders.insert(kind, Arc::clone(&builder));
        }
        self
    }

    /// 注册构建器，覆盖同类型的已有注册
    pub async fn register(&self, kind: ConnectionKind, builder: Arc<dyn TransportBuilder>) {
        info!("注册传输: {}", kind);
        self.builders.write().await.insert(kind, builder);
    }

    pub async fn unregister(&self, kind: ConnectionKind) -> Result<()> {
        info!("注销传输: {}", kind);
        self.builders
            .write()
            .await
            .remove(&kind)
            .map(|_| ())
            .ok_or(TransportError::NotRegistered(kind))
    }

    /// 创建客户端实例
    pub async fn build(
        &self,
        kind: ConnectionKind,
        options: &ConnectOptions,
    ) -> Result<Box<dyn TransportClient>> {
        debug!("创建传输客户端: {}", kind);

        let builders = self.builders.read().await;
        let builder = builders
            .get(&kind)
            .ok_or(TransportError::NotRegistered(kind))?;

        Ok(builder.build(kind, options))
    }

    /// 创建连接对象（不发起连接）
    pub async fn open(
        &self,
        id: &str,
        kind: ConnectionKind,
        options: ConnectOptions,
        config: Arc<TransportConfig>,
        trace: Arc<TraceWriter>,
    ) -> Result<Arc<MessagingConnection>> {
        let client = self.build(kind, &options).await?;
        Ok(MessagingConnection::new(id, client, options, config, trace))
    }

    pub async fn list(&self) -> Vec<ConnectionKind> {
        let builders = self.builders.read().await;
        let mut kinds: Vec<_> = builders.keys().copied().collect();
        kinds.sort_by_key(|k| k.name());
        kinds
    }

    pub async fn is_registered(&self, kind: ConnectionKind) -> bool {
        self.builders.read().await.contains_key(&kind)
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LoopbackBroker, LoopbackBuilder};

    #[tokio::test]
    async fn test_registry_creation() {
        let registry = TransportRegistry::new();
        assert!(registry.list().await.is_empty());
        assert!(!registry.is_registered(ConnectionKind::Mqtt).await);
    }

    #[tokio::test]
    async fn test_build_unregistered_kind_fails() {
        let broker = LoopbackBroker::new();
        let registry = TransportRegistry::new()
            .with_builder(ConnectionKind::Mqtt, Arc::new(LoopbackBuilder::new(broker)));

        let options = ConnectOptions::new("localhost", 1883);
        assert!(registry.build(ConnectionKind::Mqtt, &options).await.is_ok());

        let err = registry
            .build(ConnectionKind::Kafka, &options)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::NotRegistered(ConnectionKind::Kafka)));
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = TransportRegistry::new();
        registry
            .register(
                ConnectionKind::Http,
                Arc::new(LoopbackBuilder::new(LoopbackBroker::new())),
            )
            .await;
        assert_eq!(registry.list().await, vec![ConnectionKind::Http]);

        registry.unregister(ConnectionKind::Http).await.unwrap();
        assert!(registry.unregister(ConnectionKind::Http).await.is_err());
    }
}
