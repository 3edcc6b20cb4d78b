//! 进程内回环传输
//!
//! `LoopbackBroker` 在内存中模拟服务端：主题路由（支持 MQTT 通配符）、
//! 保留消息、QoS 确认和链路切断。用于演练脚本和测试，不需要真实服务端。

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::{
    ConnectOptions, ConnectionKind, DeliveryToken, Endpoint, EventSink, QoS, Result, TestMessage,
    TransportBuilder, TransportClient, TransportError,
};

/// MQTT 主题过滤器匹配（`+` 单层，`#` 多层）
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

struct ClientEntry {
    sink: EventSink,
}

#[derive(Default)]
struct BrokerState {
    available: bool,
    hold_acks: bool,
    clients: HashMap<String, ClientEntry>,
    /// 客户端 ID -> 订阅（非清除会话在断开后保留）
    sessions: HashMap<String, Vec<(String, QoS)>>,
    retained: BTreeMap<String, TestMessage>,
    held_acks: Vec<(String, DeliveryToken)>,
}

/// 内存服务端
pub struct LoopbackBroker {
    state: Mutex<BrokerState>,
}

impl LoopbackBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BrokerState {
                available: true,
                ..Default::default()
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 设置是否接受新连接
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// 暂扣 QoS 确认，直到 `release_acks`
    pub fn hold_acks(&self) {
        self.lock().hold_acks = true;
    }

    /// 发出所有暂扣的确认并恢复即时确认，返回发出的数量
    pub fn release_acks(&self) -> usize {
        let acks: Vec<(EventSink, DeliveryToken)> = {
            let mut state = self.lock();
            state.hold_acks = false;
            let held = std::mem::take(&mut state.held_acks);
            held.into_iter()
                .filter_map(|(client_id, token)| {
                    state
                        .clients
                        .get(&client_id)
                        .map(|c| (c.sink.clone(), token))
                })
                .collect()
        };

        // 回调在释放锁之后进行
        for (sink, token) in &acks {
            sink.delivery_complete(*token);
        }
        acks.len()
    }

    /// 切断客户端链路，触发其链路丢失事件
    pub fn sever(&self, client_id: &str) -> bool {
        let entry = {
            let mut state = self.lock();
            state.clients.remove(client_id)
        };

        match entry {
            Some(entry) => {
                entry.sink.connection_lost("服务端切断链路");
                true
            }
            None => false,
        }
    }

    /// 主题上的保留消息
    pub fn retained(&self, topic: &str) -> Option<TestMessage> {
        self.lock().retained.get(topic).cloned()
    }

    pub fn connected_clients(&self) -> Vec<String> {
        let mut clients: Vec<_> = self.lock().clients.keys().cloned().collect();
        clients.sort();
        clients
    }

    fn attach(&self, client_id: &str, sink: EventSink, clean_session: bool) -> Result<()> {
        let replaced = {
            let mut state = self.lock();
            if !state.available {
                return Err(TransportError::ConnectionFailed("服务端不可用".to_string()));
            }
            if clean_session {
                state.sessions.remove(client_id);
            }
            state.sessions.entry(client_id.to_string()).or_default();
            state
                .clients
                .insert(client_id.to_string(), ClientEntry { sink })
        };

        // 同 ID 的旧客户端被接管
        if let Some(old) = replaced {
            old.sink.connection_lost("客户端 ID 被接管");
        }
        Ok(())
    }

    fn detach(&self, client_id: &str, clean_session: bool) {
        let mut state = self.lock();
        state.clients.remove(client_id);
        if clean_session {
            state.sessions.remove(client_id);
        }
    }

    fn ensure_attached(state: &BrokerState, client_id: &str) -> Result<()> {
        if state.clients.contains_key(client_id) {
            Ok(())
        } else {
            Err(TransportError::Disconnected(client_id.to_string()))
        }
    }

    fn publish(
        &self,
        client_id: &str,
        token: Option<DeliveryToken>,
        message: &TestMessage,
        topic: &str,
    ) -> Result<()> {
        let mut deliveries = Vec::new();
        let mut ack = None;

        {
            let mut state = self.lock();
            Self::ensure_attached(&state, client_id)?;

            if message.retained {
                if message.payload.is_empty() {
                    state.retained.remove(topic);
                } else {
                    let mut stored = message.clone();
                    stored.topic = Some(topic.to_string());
                    state.retained.insert(topic.to_string(), stored);
                }
            }

            for (subscriber, entry) in &state.clients {
                let granted = state
                    .sessions
                    .get(subscriber)
                    .into_iter()
                    .flatten()
                    .filter(|(filter, _)| topic_matches(filter, topic))
                    .map(|(_, qos)| *qos)
                    .max();

                if let Some(granted) = granted {
                    let mut delivered = message.clone();
                    delivered.topic = Some(topic.to_string());
                    delivered.qos = delivered.qos.min(granted);
                    delivered.retained = false;
                    deliveries.push((entry.sink.clone(), delivered));
                }
            }

            if let Some(token) = token {
                if state.hold_acks {
                    state.held_acks.push((client_id.to_string(), token));
                } else if let Some(entry) = state.clients.get(client_id) {
                    ack = Some((entry.sink.clone(), token));
                }
            }
        }

        debug!("回环发布 {} -> {} 个订阅者", topic, deliveries.len());
        for (sink, delivered) in deliveries {
            sink.message_arrived(delivered);
        }
        if let Some((sink, token)) = ack {
            sink.delivery_complete(token);
        }
        Ok(())
    }

    fn subscribe(&self, client_id: &str, filter: &str, qos: QoS) -> Result<()> {
        let (sink, retained) = {
            let mut state = self.lock();
            Self::ensure_attached(&state, client_id)?;

            let subscriptions = state.sessions.entry(client_id.to_string()).or_default();
            subscriptions.retain(|(f, _)| f != filter);
            subscriptions.push((filter.to_string(), qos));

            let retained: Vec<TestMessage> = state
                .retained
                .iter()
                .filter(|(topic, _)| topic_matches(filter, topic))
                .map(|(_, message)| {
                    let mut delivered = message.clone();
                    delivered.qos = delivered.qos.min(qos);
                    delivered
                })
                .collect();

            let sink = state.clients.get(client_id).map(|c| c.sink.clone());
            (sink, retained)
        };

        if let Some(sink) = sink {
            for message in retained {
                sink.message_arrived(message);
            }
        }
        Ok(())
    }

    fn unsubscribe(&self, client_id: &str, filter: &str) -> Result<()> {
        let mut state = self.lock();
        Self::ensure_attached(&state, client_id)?;
        if let Some(subscriptions) = state.sessions.get_mut(client_id) {
            subscriptions.retain(|(f, _)| f != filter);
        }
        Ok(())
    }

    fn clear_retained(&self, client_id: &str, topic: &str) -> Result<()> {
        let mut state = self.lock();
        Self::ensure_attached(&state, client_id)?;
        state.retained.remove(topic);
        Ok(())
    }
}

/// 回环客户端
pub struct LoopbackTransport {
    kind: ConnectionKind,
    broker: Arc<LoopbackBroker>,
    sink: EventSink,
    session: Option<(String, bool)>,
    /// 链路断开期间排队的保留消息删除请求，重连后发出
    queued_deletes: Vec<String>,
}

impl LoopbackTransport {
    pub fn new(kind: ConnectionKind, broker: Arc<LoopbackBroker>) -> Self {
        Self {
            kind,
            broker,
            sink: EventSink::detached(),
            session: None,
            queued_deletes: Vec::new(),
        }
    }

    fn client_id(&self) -> Result<&str> {
        self.session
            .as_ref()
            .map(|(id, _)| id.as_str())
            .ok_or_else(|| TransportError::NotConnected(self.kind.to_string()))
    }

    /// 排队中的保留消息删除请求
    pub fn queued_deletes(&self) -> &[String] {
        &self.queued_deletes
    }
}

#[async_trait]
impl TransportClient for LoopbackTransport {
    fn kind(&self) -> ConnectionKind {
        self.kind
    }

    fn bind(&mut self, sink: EventSink) {
        self.sink = sink;
    }

    async fn connect(&mut self, endpoint: &Endpoint, options: &ConnectOptions) -> Result<()> {
        debug!("回环连接 {} -> {}", options.client_id, endpoint);
        self.broker
            .attach(&options.client_id, self.sink.clone(), options.clean_session)?;
        self.session = Some((options.client_id.clone(), options.clean_session));

        for topic in std::mem::take(&mut self.queued_deletes) {
            debug!("回环重发排队的保留消息删除 {}", topic);
            self.broker.clear_retained(&options.client_id, &topic)?;
        }
        Ok(())
    }

    async fn disconnect(&mut self, _reason_code: u8, _reason: Option<&str>) -> Result<()> {
        if let Some((client_id, clean_session)) = self.session.take() {
            self.broker.detach(&client_id, clean_session);
        }
        Ok(())
    }

    async fn publish(
        &mut self,
        token: Option<DeliveryToken>,
        message: &TestMessage,
        topic: &str,
    ) -> Result<()> {
        let client_id = self.client_id()?;
        if self.kind.is_mqtt() || !message.retained {
            self.broker.publish(client_id, token, message, topic)
        } else {
            // 仅 MQTT 家族有保留消息语义
            let mut message = message.clone();
            message.retained = false;
            self.broker.publish(client_id, token, &message, topic)
        }
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<()> {
        if self.kind == ConnectionKind::Http {
            return Err(TransportError::Unsupported {
                kind: self.kind,
                operation: "subscribe",
            });
        }
        let client_id = self.client_id()?;
        self.broker.subscribe(client_id, topic, qos)
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<()> {
        if self.kind == ConnectionKind::Http {
            return Err(TransportError::Unsupported {
                kind: self.kind,
                operation: "unsubscribe",
            });
        }
        let client_id = self.client_id()?;
        self.broker.unsubscribe(client_id, topic)
    }

    async fn delete_retained(&mut self, topic: &str) -> Result<()> {
        if !self.kind.is_mqtt() {
            return Err(TransportError::Unsupported {
                kind: self.kind,
                operation: "delete_retained",
            });
        }
        let client_id = self.client_id()?;
        match self.broker.clear_retained(client_id, topic) {
            Err(TransportError::Disconnected(_)) => {
                debug!("回环链路断开，排队删除 {} 的保留消息", topic);
                self.queued_deletes.push(topic.to_string());
                Ok(())
            }
            result => result,
        }
    }

    fn debug_handle(&self) -> Option<String> {
        self.session
            .as_ref()
            .map(|(client_id, _)| format!("loopback:{}", client_id))
    }
}

/// 回环客户端构建器
pub struct LoopbackBuilder {
    broker: Arc<LoopbackBroker>,
}

impl LoopbackBuilder {
    pub fn new(broker: Arc<LoopbackBroker>) -> Self {
        Self { broker }
    }
}

impl TransportBuilder for LoopbackBuilder {
    fn build(&self, kind: ConnectionKind, _options: &ConnectOptions) -> Box<dyn TransportClient> {
        Box::new(LoopbackTransport::new(kind, Arc::clone(&self.broker)))
    }
}
