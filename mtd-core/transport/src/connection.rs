//! 消息连接管理

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use mtd_common::codes;
use mtd_common::TraceWriter;
use mtd_monitor::ObjectType;

use crate::client::EventSink;
use crate::{
    ConnectOptions, ConnectionKind, DeliveryToken, Endpoint, PendingDelivery, QoS, Result,
    TestMessage, TransportClient, TransportConfig, TransportError,
};

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// 已创建，尚未连接
    New,
    /// 连接中
    Connecting,
    /// 已连接
    Connected,
    /// 链路丢失，正在重连
    Reconnecting,
    /// 已断开（连接失败或重连耗尽）
    Disconnected,
    /// 已关闭（终态）
    Closed,
}

/// 消息连接
///
/// 由连接 ID 标识，在变量仓库中以 `Arc` 共享。状态迁移全部通过
/// `watch` 通道完成，订阅者可以等待状态变化（例如等待重连）。
pub struct MessagingConnection {
    id: String,

    kind: ConnectionKind,

    options: ConnectOptions,

    config: Arc<TransportConfig>,

    trace: Arc<TraceWriter>,

    /// 线协议客户端
    client: Mutex<Box<dyn TransportClient>>,

    /// 连接状态
    state: watch::Sender<ConnectionState>,

    next_token: AtomicU64,

    /// 未完成的投递
    pending: StdMutex<HashMap<DeliveryToken, PendingDelivery>>,

    /// 未完成投递数量变化通知
    deliveries: watch::Sender<usize>,

    inbox_tx: mpsc::UnboundedSender<TestMessage>,

    inbox_rx: Mutex<mpsc::UnboundedReceiver<TestMessage>>,

    received_total: AtomicU64,

    received_by_topic: StdMutex<HashMap<String, u64>>,

    monitor_counts: [AtomicU64; ObjectType::COUNT],

    monitor_total: AtomicU64,

    /// 当前重连轮次的尝试次数
    reconnect_attempts: AtomicU32,

    close_reason: StdMutex<Option<(u8, Option<String>)>>,
}

impl MessagingConnection {
    /// 创建连接并绑定客户端事件
    pub fn new(
        id: impl Into<String>,
        mut client: Box<dyn TransportClient>,
        options: ConnectOptions,
        config: Arc<TransportConfig>,
        trace: Arc<TraceWriter>,
    ) -> Arc<Self> {
        let id = id.into();
        let kind = client.kind();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        trace.info(
            codes::CONN_CREATED,
            &id,
            format!(
                "创建 {} 连接，客户端 ID {}，地址 {}",
                kind,
                options.client_id,
                options.primary()
            ),
        );

        Arc::new_cyclic(|weak| {
            client.bind(EventSink::new(weak.clone()));

            Self {
                id,
                kind,
                options,
                config,
                trace,
                client: Mutex::new(client),
                state: watch::channel(ConnectionState::New).0,
                next_token: AtomicU64::new(0),
                pending: StdMutex::new(HashMap::new()),
                deliveries: watch::channel(0).0,
                inbox_tx,
                inbox_rx: Mutex::new(inbox_rx),
                received_total: AtomicU64::new(0),
                received_by_topic: StdMutex::new(HashMap::new()),
                monitor_counts: std::array::from_fn(|_| AtomicU64::new(0)),
                monitor_total: AtomicU64::new(0),
                reconnect_attempts: AtomicU32::new(0),
                close_reason: StdMutex::new(None),
            }
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    pub fn client_id(&self) -> &str {
        &self.options.client_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// 关闭时给出的原因码和原因
    pub fn close_reason(&self) -> Option<(u8, Option<String>)> {
        self.close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 底层客户端的诊断描述
    pub async fn debug_handle(&self) -> Option<String> {
        self.client.lock().await.debug_handle()
    }

    // ============================================
    // 生命周期
    // ============================================

    /// 建立连接
    ///
    /// 只能从 New 或 Disconnected 状态发起；已连接时直接返回成功。
    pub async fn connect(&self) -> Result<()> {
        let mut current = ConnectionState::New;
        let started = self.state.send_if_modified(|state| {
            current = *state;
            if matches!(state, ConnectionState::New | ConnectionState::Disconnected) {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });

        if !started {
            return match current {
                ConnectionState::Connected => Ok(()),
                ConnectionState::Closed => Err(TransportError::Closed(self.id.clone())),
                _ => Err(TransportError::ConnectionFailed(format!(
                    "连接 {} 当前状态为 {:?}",
                    self.id, current
                ))),
            };
        }

        let mut last_error = TransportError::ConnectionFailed("没有可用地址".to_string());
        for endpoint in self.options.endpoints() {
            match self.try_endpoint(&endpoint).await {
                Ok(()) => {
                    if !self.transition(ConnectionState::Connecting, ConnectionState::Connected) {
                        // 连接过程中被关闭
                        let _ = self.client.lock().await.disconnect(0, None).await;
                        return Err(TransportError::Closed(self.id.clone()));
                    }
                    self.reconnect_attempts.store(0, Ordering::SeqCst);
                    self.trace.info(
                        codes::CONN_CONNECTED,
                        &self.id,
                        format!("已连接到 {}", endpoint),
                    );
                    return Ok(());
                }
                Err(e) => {
                    self.trace.warn(
                        codes::CONN_CONNECT_FAILED,
                        &self.id,
                        format!("连接 {} 失败: {}", endpoint, e),
                    );
                    last_error = e;
                }
            }
        }

        self.transition(ConnectionState::Connecting, ConnectionState::Disconnected);
        self.trace.error(
            codes::CONN_CONNECT_FAILED,
            &self.id,
            format!("无法建立连接: {}", last_error),
        );
        Err(last_error)
    }

    /// 按配置的超时连接单个地址
    async fn try_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        let timeout = self.config.connect_timeout();
        let mut client = self.client.lock().await;

        match tokio::time::timeout(timeout, client.connect(endpoint, &self.options)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// 比较并设置状态
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// 关闭连接
    ///
    /// 重复关闭是无操作；仍有未完成投递时记录诊断信息。
    pub async fn close(&self, reason_code: u8, reason: Option<&str>) -> Result<()> {
        let previous = self.state.send_replace(ConnectionState::Closed);
        if previous == ConnectionState::Closed {
            self.trace
                .debug(codes::CONN_ALREADY_CLOSED, &self.id, "连接已关闭，忽略");
            return Ok(());
        }

        *self
            .close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) =
            Some((reason_code, reason.map(str::to_string)));

        let pending = self.count_pending_delivery_tokens();
        if pending > 0 {
            self.trace.info(
                codes::CONN_CLOSE_WITH_PENDING,
                &self.id,
                format!("关闭时仍有 {} 个未完成的投递", pending),
            );
        }

        self.trace.info(
            codes::CONN_CLOSE_REASON,
            &self.id,
            format!(
                "关闭连接，原因码 {}，原因 {}",
                reason_code,
                reason.unwrap_or("-")
            ),
        );

        // 重连中的连接由重连任务在成功后自行断开
        if previous == ConnectionState::Connected {
            let result = self.client.lock().await.disconnect(reason_code, reason).await;
            if let Err(e) = result {
                self.trace.error(
                    codes::CONN_CLOSE_FAILED,
                    &self.id,
                    format!("断开连接失败: {}", e),
                );
                return Err(e);
            }
        }

        Ok(())
    }

    /// 以默认原因关闭
    pub async fn disconnect(&self) -> Result<()> {
        self.close(0, None).await
    }

    // ============================================
    // 链路丢失与重连
    // ============================================

    /// 处理链路丢失
    pub(crate) fn handle_connection_lost(self: &Arc<Self>, cause: &str) {
        let next = if self.config.auto_reconnect {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Disconnected
        };

        if !self.transition(ConnectionState::Connected, next) {
            debug!("连接 {} 不在已连接状态，忽略链路丢失", self.id);
            return;
        }

        self.trace
            .warn(codes::CONN_LOST, &self.id, format!("链路丢失: {}", cause));

        if !self.config.auto_reconnect {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let conn = Arc::clone(self);
                handle.spawn(async move {
                    conn.reconnect_with_backoff().await;
                });
            }
            Err(_) => {
                self.transition(ConnectionState::Reconnecting, ConnectionState::Disconnected);
                self.trace.error(
                    codes::CONN_RECONNECT_EXHAUSTED,
                    &self.id,
                    "没有可用的运行时，无法重连",
                );
            }
        }
    }

    /// 自动重连（带指数退避）
    ///
    /// 在 `max_wait_ms` 时间窗口内轮流尝试主地址和故障转移地址，
    /// 达到 `max_attempts`（0 表示不限）或超出窗口后进入 Disconnected。
    async fn reconnect_with_backoff(&self) {
        let reconnect = &self.config.reconnect;
        let endpoints = self.options.endpoints();

        self.trace.info(
            codes::CONN_RECONNECTING,
            &self.id,
            format!("{:?} 后开始重连", reconnect.wait_before_reconnect()),
        );
        sleep(reconnect.wait_before_reconnect()).await;

        let deadline = Instant::now() + reconnect.max_wait();
        let mut attempt: u32 = 0;

        loop {
            if self.state() != ConnectionState::Reconnecting {
                debug!("连接 {} 已不在重连状态，停止重连", self.id);
                return;
            }

            let endpoint = &endpoints[attempt as usize % endpoints.len()];
            match self.try_endpoint(endpoint).await {
                Ok(()) => {
                    if self.transition(ConnectionState::Reconnecting, ConnectionState::Connected) {
                        self.reconnect_attempts.store(0, Ordering::SeqCst);
                        self.trace.info(
                            codes::CONN_RECONNECTED,
                            &self.id,
                            format!("第 {} 次尝试重连到 {} 成功", attempt + 1, endpoint),
                        );
                    } else {
                        // 重连期间连接已被关闭
                        let _ = self.client.lock().await.disconnect(0, None).await;
                    }
                    return;
                }
                Err(e) => {
                    attempt += 1;
                    self.reconnect_attempts.store(attempt, Ordering::SeqCst);
                    self.trace.warn(
                        codes::CONN_RECONNECTING,
                        &self.id,
                        format!("第 {} 次重连 {} 失败: {}", attempt, endpoint, e),
                    );

                    let now = Instant::now();
                    if reconnect.attempts_exhausted(attempt) || now >= deadline {
                        break;
                    }

                    let delay = reconnect
                        .calculate_delay(attempt - 1)
                        .min(deadline.saturating_duration_since(now));
                    sleep(delay).await;
                }
            }
        }

        if self.transition(ConnectionState::Reconnecting, ConnectionState::Disconnected) {
            self.trace.error(
                codes::CONN_RECONNECT_EXHAUSTED,
                &self.id,
                format!("重连失败，已尝试 {} 次", attempt),
            );
        }
    }

    /// 等待重连完成
    ///
    /// 未启用自动重连时立即返回 false。否则在超时内等待离开
    /// Reconnecting 状态，只有恢复到 Connected 才返回 true。
    pub async fn wait_for_reconnection(&self, timeout: Duration) -> bool {
        if !self.config.auto_reconnect {
            self.trace.error(
                codes::CONN_NO_FAILOVER,
                &self.id,
                "未配置自动重连，无法等待重连",
            );
            return false;
        }

        let mut rx = self.state.subscribe();
        let outcome = tokio::time::timeout(
            timeout,
            rx.wait_for(|state| *state != ConnectionState::Reconnecting),
        )
        .await;

        match outcome {
            Ok(Ok(state)) => *state == ConnectionState::Connected,
            _ => false,
        }
    }

    // ============================================
    // 发布与投递跟踪
    // ============================================

    fn ensure_connected(&self, operation: &str) -> Result<()> {
        let error = match self.state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Closed => TransportError::Closed(self.id.clone()),
            ConnectionState::New | ConnectionState::Connecting => {
                TransportError::NotConnected(self.id.clone())
            }
            ConnectionState::Reconnecting | ConnectionState::Disconnected => {
                TransportError::Disconnected(self.id.clone())
            }
        };

        self.trace.warn(
            codes::CONN_NOT_CONNECTED,
            &self.id,
            format!("无法执行 {}: {}", operation, error),
        );
        Err(error)
    }

    /// 正在重连时先等待一次重连，再要求已连接
    async fn await_link(&self, operation: &str) -> Result<()> {
        if self.state() == ConnectionState::Reconnecting {
            let wait = self.config.reconnect.failover_wait();
            self.trace.info(
                codes::CONN_AWAIT_RECONNECT,
                &self.id,
                format!("{} 前等待重连，最长 {:?}", operation, wait),
            );
            self.wait_for_reconnection(wait).await;
        }
        self.ensure_connected(operation)
    }

    /// 发布消息
    ///
    /// topic 覆盖消息自带的主题。QoS > 0 时返回投递令牌，
    /// 令牌在服务端确认前一直处于未完成状态。正在重连时
    /// 先等待重连完成再发布。
    pub async fn publish(
        &self,
        message: &TestMessage,
        topic: Option<&str>,
    ) -> Result<Option<DeliveryToken>> {
        let topic = topic
            .or(message.topic.as_deref())
            .ok_or_else(|| TransportError::PublishFailed("消息未指定主题".to_string()))?;

        self.await_link("publish").await?;

        let token = if message.qos.requires_ack() {
            let token = DeliveryToken(self.next_token.fetch_add(1, Ordering::SeqCst) + 1);
            self.track_pending(PendingDelivery {
                token,
                topic: topic.to_string(),
                duplicate: message.duplicate,
                preview: message.payload.preview(),
            });
            Some(token)
        } else {
            None
        };

        let result = self.client.lock().await.publish(token, message, topic).await;
        if let Err(e) = result {
            if let Some(token) = token {
                self.untrack_pending(token);
            }
            self.trace.error(
                codes::CONN_PUBLISH_FAILED,
                &self.id,
                format!("发布到 {} 失败: {}", topic, e),
            );
            return Err(e);
        }

        debug!(
            "连接 {} 发布 {} 字节到 {} (QoS {})",
            self.id,
            message.payload.len(),
            topic,
            message.qos.level()
        );
        Ok(token)
    }

    fn track_pending(&self, delivery: PendingDelivery) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.insert(delivery.token, delivery);
        self.deliveries.send_replace(pending.len());
    }

    fn untrack_pending(&self, token: DeliveryToken) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = pending.remove(&token).is_some();
        self.deliveries.send_replace(pending.len());
        removed
    }

    pub(crate) fn on_delivery_complete(&self, token: DeliveryToken) {
        if !self.untrack_pending(token) {
            debug!("连接 {} 收到未知令牌 {} 的确认", self.id, token);
        }
    }

    /// 未完成的投递快照（按令牌排序）
    pub fn pending_deliveries(&self) -> Vec<PendingDelivery> {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let mut deliveries: Vec<_> = pending.values().cloned().collect();
        deliveries.sort_by_key(|d| d.token);
        deliveries
    }

    /// 未完成投递数量（不记录日志）
    pub fn count_pending_delivery_tokens(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 记录未完成投递的诊断信息并返回数量
    pub fn check_pending_delivery_tokens(&self) -> usize {
        let deliveries = self.pending_deliveries();

        self.trace.info(
            codes::CONN_PENDING_TOKENS,
            &self.id,
            format!("{} 个未完成的投递令牌", deliveries.len()),
        );
        for delivery in &deliveries {
            self.trace.info(
                codes::CONN_PENDING_TOKEN_DETAIL,
                &self.id,
                format!(
                    "令牌 {} 主题 {} 重复 {} 负载 {}",
                    delivery.token, delivery.topic, delivery.duplicate, delivery.preview
                ),
            );
        }

        deliveries.len()
    }

    /// 等待未完成投递清空，返回超时后剩余的数量
    pub async fn wait_for_delivery(&self, timeout: Duration) -> usize {
        let mut rx = self.deliveries.subscribe();
        let _ = tokio::time::timeout(timeout, rx.wait_for(|count| *count == 0)).await;
        self.count_pending_delivery_tokens()
    }

    pub fn is_pending(&self, token: DeliveryToken) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&token)
    }

    /// 等待单个令牌被确认，超时返回 false
    pub async fn wait_for_token(&self, token: DeliveryToken, timeout: Duration) -> bool {
        let mut rx = self.deliveries.subscribe();
        let acked = async {
            while self.is_pending(token) {
                if rx.changed().await.is_err() {
                    return false;
                }
            }
            true
        };

        tokio::time::timeout(timeout, acked).await.unwrap_or(false)
    }

    // ============================================
    // 订阅与接收
    // ============================================

    fn trace_client_error(&self, operation: &str, topic: &str, error: &TransportError) {
        let code = match error {
            TransportError::Unsupported { .. } => codes::CONN_UNSUPPORTED,
            _ => codes::CONN_SUBSCRIBE_FAILED,
        };
        self.trace.error(
            code,
            &self.id,
            format!("{} {} 失败: {}", operation, topic, error),
        );
    }

    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<()> {
        self.ensure_connected("subscribe")?;

        let result = self.client.lock().await.subscribe(topic, qos).await;
        if let Err(e) = &result {
            self.trace_client_error("订阅", topic, e);
        }
        result
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.ensure_connected("unsubscribe")?;

        let result = self.client.lock().await.unsubscribe(topic).await;
        if let Err(e) = &result {
            self.trace_client_error("取消订阅", topic, e);
        }
        result
    }

    /// 删除保留消息（仅 MQTT 家族支持）
    ///
    /// 链路断开时请求仍交给客户端，由客户端决定排队还是拒绝。
    pub async fn delete_retained(&self, topic: &str) -> Result<()> {
        match self.state() {
            state @ (ConnectionState::Reconnecting | ConnectionState::Disconnected) => {
                self.trace.warn(
                    codes::CONN_NOT_CONNECTED,
                    &self.id,
                    format!("连接状态 {:?}，删除 {} 的保留消息请求交由客户端处理", state, topic),
                );
            }
            _ => self.ensure_connected("delete_retained")?,
        }

        let result = self.client.lock().await.delete_retained(topic).await;
        if let Err(e) = &result {
            self.trace_client_error("删除保留消息", topic, e);
        }
        result
    }

    pub(crate) fn on_message_arrived(&self, message: TestMessage) {
        let topic = message.topic.clone().unwrap_or_default();

        self.received_total.fetch_add(1, Ordering::SeqCst);
        *self
            .received_by_topic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic)
            .or_insert(0) += 1;

        // 接收端与连接同生命周期，发送不会失败
        let _ = self.inbox_tx.send(message);
    }

    /// 接收一条消息
    ///
    /// 已到达的消息总是先返回。连接正在重连时先等待一次重连；
    /// 断开或关闭的连接上接收是错误。超时返回 `Ok(None)`。
    pub async fn receive(&self, wait: Duration) -> Result<Option<TestMessage>> {
        let deadline = Instant::now() + wait;
        let mut inbox = self.inbox_rx.lock().await;

        if let Ok(message) = inbox.try_recv() {
            return Ok(Some(message));
        }

        match self.state() {
            ConnectionState::Connected => {}
            ConnectionState::Reconnecting => {
                if !self.wait_for_reconnection(wait).await {
                    return Err(self.receive_disconnected());
                }
            }
            ConnectionState::Closed => return Err(TransportError::Closed(self.id.clone())),
            ConnectionState::New | ConnectionState::Connecting | ConnectionState::Disconnected => {
                return Err(self.receive_disconnected());
            }
        }

        match tokio::time::timeout_at(deadline, inbox.recv()).await {
            Ok(message) => Ok(message),
            Err(_) => Ok(None),
        }
    }

    fn receive_disconnected(&self) -> TransportError {
        self.trace.error(
            codes::CONN_RECEIVE_DISCONNECTED,
            &self.id,
            "无法在已断开的连接上接收消息",
        );
        TransportError::Disconnected(self.id.clone())
    }

    /// 累计接收的消息数
    pub fn messages_received(&self) -> u64 {
        self.received_total.load(Ordering::SeqCst)
    }

    /// 指定主题上接收的消息数
    pub fn messages_received_on(&self, topic: &str) -> u64 {
        self.received_by_topic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .copied()
            .unwrap_or(0)
    }

    // ============================================
    // 监控记录计数
    // ============================================

    pub fn count_monitor_record(&self, object_type: ObjectType) {
        self.monitor_counts[object_type.index()].fetch_add(1, Ordering::SeqCst);
        self.monitor_total.fetch_add(1, Ordering::SeqCst);
    }

    /// 监控记录数量；None 表示全部类型的总数
    pub fn monitor_record_count(&self, object_type: Option<ObjectType>) -> u64 {
        match object_type {
            Some(t) => self.monitor_counts[t.index()].load(Ordering::SeqCst),
            None => self.monitor_total.load(Ordering::SeqCst),
        }
    }
}

impl std::fmt::Debug for MessagingConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingConnection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("client_id", &self.options.client_id)
            .field("state", &self.state())
            .finish()
    }
}
