//! 内置动作测试（基于回环传输）

use std::sync::Arc;

use mtd_common::{codes, TraceWriter};
use mtd_executor::{
    ActionConfig, ActionContext, ActionError, ActionRegistry, ConfigError, VariableRepository,
};
use mtd_monitor::ObjectType;
use mtd_transport::{
    ConnectionState, LoopbackBroker, LoopbackBuilder, ReconnectConfig, TransportConfig,
    TransportRegistry,
};

fn fast_reconnect() -> TransportConfig {
    TransportConfig {
        connect_timeout_ms: 1_000,
        auto_reconnect: true,
        reconnect: ReconnectConfig {
            max_attempts: 3,
            initial_delay_ms: 10,
            max_delay_ms: 20,
            backoff_multiplier: 2.0,
            wait_before_reconnect_ms: 0,
            max_wait_ms: 2_000,
        },
    }
}

struct Harness {
    broker: Arc<LoopbackBroker>,
    registry: ActionRegistry,
    ctx: ActionContext,
}

impl Harness {
    fn new() -> Self {
        Self::with_transport(fast_reconnect())
    }

    fn with_transport(config: TransportConfig) -> Self {
        let broker = LoopbackBroker::new();
        let transports =
            TransportRegistry::new().with_all(Arc::new(LoopbackBuilder::new(broker.clone())));
        let ctx = ActionContext::new(
            Arc::new(VariableRepository::new()),
            Arc::new(TraceWriter::new()),
            Arc::new(transports),
        )
        .with_transport_config(config);

        Self {
            broker,
            registry: ActionRegistry::builtin(),
            ctx,
        }
    }

    fn trace(&self) -> &TraceWriter {
        &self.ctx.trace
    }

    async fn invoke(&self, config: ActionConfig) -> Result<bool, ActionError> {
        let action = self.registry.create(&config, &self.ctx).unwrap();
        action.invoke().await
    }

    async fn ok(&self, config: ActionConfig) -> bool {
        self.invoke(config).await.unwrap()
    }

    fn config_error(&self, config: ActionConfig) -> ConfigError {
        self.registry.create(&config, &self.ctx).err().unwrap()
    }

    async fn connect(&self, connection_id: &str) {
        let created = self
            .ok(ActionConfig::new(format!("create-{}", connection_id), "CreateConnection")
                .with_param("connection_id", connection_id)
                .with_param("kind", "mqtt")
                .with_param("host", "localhost")
                .with_param("client_id", format!("client-{}", connection_id))
                .with_param("clean_session", "false"))
            .await;
        assert!(created);
    }
}

fn slow_reconnect() -> TransportConfig {
    let mut config = fast_reconnect();
    config.reconnect.wait_before_reconnect_ms = 200;
    config
}

fn send(connection_id: &str, message_id: &str) -> ActionConfig {
    ActionConfig::new("send", "SendMessage")
        .with_param("connection_id", connection_id)
        .with_param("message_id", message_id)
}

fn message(message_id: &str, payload: &str) -> ActionConfig {
    ActionConfig::new(format!("create-{}", message_id), "CreateMessage")
        .with_param("message_id", message_id)
        .with_param("payload", payload)
}

fn compare_text(message_id: &str, expected: &str) -> ActionConfig {
    ActionConfig::new("compare", "CompareMessageData")
        .with_param("message_id", message_id)
        .with_param("compare_to", expected)
}

fn server_payload(active: u32) -> String {
    format!(
        r#"{{"ObjectType":"Server","NodeName":"node-a","TimeStamp":"2024-05-01T10:00:00Z",
            "ActiveConnections":{},"TotalConnections":10,"MsgRead":100,"MsgWrite":90,
            "BytesRead":4096,"BytesWrite":2048,"BadConnCount":0,"TotalEndpoints":2}}"#,
        active
    )
}

// ============================================
// 注册表与构造期校验
// ============================================

#[test]
fn test_builtin_catalog() {
    let registry = ActionRegistry::builtin();
    let names = registry.names();

    assert_eq!(names.len(), 19);
    for name in [
        "CreateConnection",
        "CheckPendingDelivery",
        "CompareMessageData",
        "DecodeMonitorRecord",
        "IncrementCounter",
        "Sleep",
    ] {
        assert!(registry.is_registered(name), "{} 未注册", name);
    }
}

#[test]
fn test_construction_errors() {
    let h = Harness::new();

    assert_eq!(
        h.config_error(ActionConfig::new("a1", "CloseConnection")),
        ConfigError::MissingParameter {
            action: "a1".to_string(),
            param: "connection_id".to_string(),
        }
    );

    assert_eq!(
        h.config_error(ActionConfig::new("a2", "Teleport")),
        ConfigError::UnknownAction("Teleport".to_string())
    );

    let bad_kind = ActionConfig::new("a3", "CreateConnection")
        .with_param("connection_id", "c1")
        .with_param("kind", "carrier-pigeon")
        .with_param("host", "localhost");
    assert!(matches!(
        h.config_error(bad_kind),
        ConfigError::InvalidParameter { ref param, .. } if param == "kind"
    ));

    let both = ActionConfig::new("a4", "CompareMessageData")
        .with_param("message_id", "m1")
        .with_param("compare_to", "x")
        .with_param("compare_to_base64", "eA==");
    assert!(matches!(h.config_error(both), ConfigError::InvalidParameter { .. }));

    let bad_type = ActionConfig::new("a5", "CheckMonitorCount")
        .with_param("connection_id", "c1")
        .with_param("expected", "1")
        .with_param("object_type", "Disk");
    assert!(matches!(
        h.config_error(bad_type),
        ConfigError::InvalidParameter { ref param, .. } if param == "object_type"
    ));

    let bad_qos = ActionConfig::new("a6", "Subscribe")
        .with_param("connection_id", "c1")
        .with_param("topic", "t")
        .with_param("qos", "3");
    assert!(matches!(h.config_error(bad_qos), ConfigError::InvalidParameter { .. }));
}

// ============================================
// 变量动作
// ============================================

#[tokio::test]
async fn test_counter_actions() {
    let h = Harness::new();

    assert!(
        h.ok(ActionConfig::new("create", "CreateCounter")
            .with_param("counter_id", "hits")
            .with_param("initial", "2"))
            .await
    );
    for _ in 0..3 {
        assert!(
            h.ok(ActionConfig::new("inc", "IncrementCounter").with_param("counter_id", "hits"))
                .await
        );
    }

    let compare = |expected: &str| {
        ActionConfig::new("cmp", "CompareCounter")
            .with_param("counter_id", "hits")
            .with_param("expected", expected)
    };
    assert!(h.ok(compare("5")).await);
    assert!(!h.ok(compare("6")).await);
    assert!(h.trace().has_code(codes::COUNTER_MISMATCH));
}

#[tokio::test]
async fn test_increment_missing_counter_is_structured_failure() {
    let h = Harness::new();

    let err = h
        .invoke(ActionConfig::new("inc", "IncrementCounter").with_param("counter_id", "ghost"))
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::COUNTER_MISSING);

    h.ok(ActionConfig::new("s", "StoreString")
        .with_param("variable", "text")
        .with_param("value", "abc"))
        .await;
    let err = h
        .invoke(ActionConfig::new("inc", "IncrementCounter").with_param("counter_id", "text"))
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::ACTION_WRONG_VARIABLE_TYPE);
}

#[tokio::test]
async fn test_string_actions() {
    let h = Harness::new();

    assert!(
        h.ok(ActionConfig::new("s", "StoreString")
            .with_param("variable", "empty")
            .with_param("value", ""))
            .await
    );

    let compare = |expected: &str| {
        ActionConfig::new("cmp", "CompareString")
            .with_param("variable", "empty")
            .with_param("expected", expected)
    };
    assert!(h.ok(compare("")).await);
    assert!(!h.ok(compare("x")).await);

    // 键不存在是引用错误：返回 false 并记录
    let missing = ActionConfig::new("cmp", "CompareString")
        .with_param("variable", "nope")
        .with_param("expected", "x");
    assert!(!h.ok(missing).await);
    assert!(h.trace().has_code(codes::ACTION_VARIABLE_NOT_FOUND));
}

// ============================================
// 消息动作
// ============================================

#[tokio::test]
async fn test_compare_message_data() {
    let h = Harness::new();

    assert!(h.ok(message("m1", "hello")).await);
    assert!(h.ok(compare_text("m1", "hello")).await);
    assert!(!h.ok(compare_text("m1", "world")).await);
    assert!(h.trace().has_code(codes::PAYLOAD_MISMATCH));

    // 二进制负载
    assert!(h.ok(message("m2", "AQID").with_param("msg_type", "binary")).await);
    let binary = ActionConfig::new("cmp", "CompareMessageData")
        .with_param("message_id", "m2")
        .with_param("compare_to_base64", "AQID");
    assert!(h.ok(binary).await);

    // 负载类型不一致
    let err = h.invoke(compare_text("m2", "AQID")).await.unwrap_err();
    assert_eq!(err.code, codes::PAYLOAD_TYPE_MISMATCH);
}

#[tokio::test]
async fn test_send_and_receive() {
    let h = Harness::new();
    h.connect("pub").await;
    h.connect("sub").await;

    assert!(
        h.ok(ActionConfig::new("subscribe", "Subscribe")
            .with_param("connection_id", "sub")
            .with_param("topic", "sensors/+"))
            .await
    );
    assert!(h.ok(message("m1", "21.5").with_param("topic", "sensors/t1")).await);
    assert!(
        h.ok(ActionConfig::new("send", "SendMessage")
            .with_param("connection_id", "pub")
            .with_param("message_id", "m1"))
            .await
    );

    let receive = |expect_none: bool| {
        ActionConfig::new("recv", "ReceiveMessage")
            .with_param("connection_id", "sub")
            .with_param("message_id", "got")
            .with_param("wait_ms", "200")
            .with_param("expect_none", expect_none.to_string())
    };
    assert!(h.ok(receive(false)).await);
    assert!(h.ok(compare_text("got", "21.5")).await);

    // 队列已空
    assert!(h.ok(receive(true)).await);
    assert!(!h.ok(receive(false)).await);
    assert!(h.trace().has_code(codes::RECEIVE_TIMEOUT));

    let conn = h.ctx.repository.get("sub").await.unwrap();
    let conn = conn.as_connection().unwrap();
    assert_eq!(conn.messages_received(), 1);
    assert_eq!(conn.messages_received_on("sensors/t1"), 1);
}

#[tokio::test]
async fn test_send_without_topic_fails() {
    let h = Harness::new();
    h.connect("c1").await;
    h.ok(message("m1", "x")).await;

    let send = ActionConfig::new("send", "SendMessage")
        .with_param("connection_id", "c1")
        .with_param("message_id", "m1");
    assert!(!h.ok(send).await);
    assert!(h.trace().has_code(codes::SEND_FAILED));
}

#[tokio::test]
async fn test_send_waits_for_reconnection() {
    let h = Harness::with_transport(slow_reconnect());
    h.connect("c1").await;
    h.ok(message("m1", "x").with_param("topic", "t")).await;

    assert!(h.broker.sever("client-c1"));
    assert!(h.ok(send("c1", "m1")).await);
    assert!(!h.trace().has_code(codes::SEND_FAILED));

    let conn = h.ctx.repository.get("c1").await.unwrap();
    assert!(conn.as_connection().unwrap().is_connected());
}

#[tokio::test]
async fn test_send_waits_for_ack() {
    let h = Harness::new();
    h.connect("c1").await;
    h.ok(message("m1", "x").with_param("topic", "q/1").with_param("qos", "1"))
        .await;
    h.broker.hold_acks();

    let timed_out = h
        .invoke(
            send("c1", "m1")
                .with_param("wait_for_ack", "true")
                .with_param("wait_ms", "50"),
        )
        .await
        .unwrap_err();
    assert_eq!(timed_out.code, codes::SEND_ACK_TIMEOUT);

    let broker = h.broker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        broker.release_acks();
    });
    assert!(
        h.ok(send("c1", "m1")
            .with_param("wait_for_ack", "true")
            .with_param("wait_ms", "2000"))
            .await
    );

    // 未要求等待确认时立即返回
    h.broker.hold_acks();
    assert!(h.ok(send("c1", "m1")).await);
}

#[tokio::test]
async fn test_unknown_connection_returns_false() {
    let h = Harness::new();

    let close = ActionConfig::new("close", "CloseConnection").with_param("connection_id", "ghost");
    assert!(!h.ok(close).await);
    assert!(h.trace().has_code(codes::CONNECTION_NOT_FOUND));
}

// ============================================
// 连接动作
// ============================================

#[tokio::test]
async fn test_close_connection_twice() {
    let h = Harness::new();
    h.connect("c1").await;

    let close = || {
        ActionConfig::new("close", "CloseConnection")
            .with_param("connection_id", "c1")
            .with_param("reason_code", "1")
            .with_param("reason", "test done")
    };
    assert!(h.ok(close()).await);
    assert!(h.ok(close()).await);
    assert!(h.trace().has_code(codes::CONN_ALREADY_CLOSED));
    assert!(h.broker.connected_clients().is_empty());
}

#[tokio::test]
async fn test_create_connection_failure_still_stores() {
    let h = Harness::new();
    h.broker.set_available(false);

    let create = ActionConfig::new("create", "CreateConnection")
        .with_param("connection_id", "c1")
        .with_param("kind", "mqtt")
        .with_param("host", "localhost");
    assert!(!h.ok(create).await);
    assert!(h.trace().has_code(codes::CONNECTION_CREATE_FAILED));

    let stored = h.ctx.repository.get("c1").await.unwrap();
    assert_eq!(
        stored.as_connection().unwrap().state(),
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn test_check_pending_delivery() {
    let h = Harness::new();
    h.connect("c1").await;
    h.broker.hold_acks();

    h.ok(message("m1", "x").with_param("topic", "q/1").with_param("qos", "1"))
        .await;
    let send = || {
        ActionConfig::new("send", "SendMessage")
            .with_param("connection_id", "c1")
            .with_param("message_id", "m1")
    };
    assert!(h.ok(send()).await);
    assert!(h.ok(send()).await);

    let check = ActionConfig::new("check", "CheckPendingDelivery").with_param("connection_id", "c1");
    assert!(!h.ok(check.clone()).await);
    assert!(h.trace().has_code(codes::PENDING_DELIVERY_REMAIN));
    assert_eq!(h.trace().records_with_code(codes::CONN_PENDING_TOKEN_DETAIL).len(), 2);

    assert_eq!(h.broker.release_acks(), 2);
    assert!(h.ok(check).await);
}

#[tokio::test]
async fn test_delete_retained_message() {
    let h = Harness::new();
    h.connect("c1").await;

    h.ok(message("m1", "last").with_param("topic", "status").with_param("retained", "true"))
        .await;
    h.ok(ActionConfig::new("send", "SendMessage")
        .with_param("connection_id", "c1")
        .with_param("message_id", "m1"))
        .await;
    assert!(h.broker.retained("status").is_some());

    let delete = ActionConfig::new("delete", "DeleteRetainedMessage")
        .with_param("connection_id", "c1")
        .with_param("topic", "status");
    assert!(h.ok(delete).await);
    assert!(h.broker.retained("status").is_none());
}

#[tokio::test]
async fn test_delete_retained_while_reconnecting() {
    let h = Harness::with_transport(slow_reconnect());
    h.connect("c1").await;
    h.ok(message("m1", "last").with_param("topic", "status").with_param("retained", "true"))
        .await;
    h.ok(send("c1", "m1")).await;

    assert!(h.broker.sever("client-c1"));
    let delete = ActionConfig::new("delete", "DeleteRetainedMessage")
        .with_param("connection_id", "c1")
        .with_param("topic", "status");
    assert!(h.ok(delete).await);
    assert!(h.trace().has_code(codes::CONNECTION_NOT_CONNECTED));
    assert!(!h.trace().has_code(codes::DELETE_RETAINED_FAILED));

    let wait = ActionConfig::new("wait", "WaitForReconnection")
        .with_param("connection_id", "c1")
        .with_param("wait_ms", "2000");
    assert!(h.ok(wait).await);
    assert!(h.broker.retained("status").is_none());
}

#[tokio::test]
async fn test_delete_retained_unsupported_kind() {
    let h = Harness::new();
    h.ok(ActionConfig::new("create", "CreateConnection")
        .with_param("connection_id", "k1")
        .with_param("kind", "kafka")
        .with_param("host", "localhost"))
        .await;

    let delete = ActionConfig::new("delete", "DeleteRetainedMessage")
        .with_param("connection_id", "k1")
        .with_param("topic", "status");
    let err = h.invoke(delete).await.unwrap_err();
    assert_eq!(err.code, codes::DELETE_RETAINED_FAILED);
}

#[tokio::test]
async fn test_wait_for_reconnection() {
    let h = Harness::new();
    h.connect("c1").await;

    assert!(h.broker.sever("client-c1"));
    let wait = ActionConfig::new("wait", "WaitForReconnection")
        .with_param("connection_id", "c1")
        .with_param("wait_ms", "2000");
    assert!(h.ok(wait).await);

    let conn = h.ctx.repository.get("c1").await.unwrap();
    assert!(conn.as_connection().unwrap().is_connected());
}

#[tokio::test]
async fn test_wait_for_reconnection_without_failover() {
    let h = Harness::with_transport(TransportConfig::without_reconnect());
    h.connect("c1").await;

    assert!(h.broker.sever("client-c1"));
    let wait = ActionConfig::new("wait", "WaitForReconnection")
        .with_param("connection_id", "c1")
        .with_param("wait_ms", "100");
    assert!(!h.ok(wait).await);
    assert!(h.trace().has_code(codes::CONN_NO_FAILOVER));
    assert!(h.trace().has_code(codes::RECONNECT_TIMEOUT));
}

// ============================================
// 监控动作
// ============================================

#[tokio::test]
async fn test_decode_and_compare_monitor_record() {
    let h = Harness::new();
    h.connect("c1").await;
    h.ok(message("raw", &server_payload(3))).await;

    let decode = ActionConfig::new("decode", "DecodeMonitorRecord")
        .with_param("message_id", "raw")
        .with_param("record_id", "rec")
        .with_param("connection_id", "c1");
    assert!(h.ok(decode).await);

    let field = |name: &str, expected: &str| {
        ActionConfig::new("field", "CompareMonitorField")
            .with_param("record_id", "rec")
            .with_param("field", name)
            .with_param("expected", expected)
    };
    assert!(h.ok(field("ActiveConnections", "3")).await);
    assert!(!h.ok(field("ActiveConnections", "4")).await);
    assert!(h.trace().has_code(codes::MONITOR_FIELD_MISMATCH));

    let err = h.invoke(field("MemoryFreeBytes", "0")).await.unwrap_err();
    assert_eq!(err.code, codes::MONITOR_UNKNOWN_FIELD);

    let count = |object_type: Option<&str>, expected: &str| {
        let config = ActionConfig::new("count", "CheckMonitorCount")
            .with_param("connection_id", "c1")
            .with_param("expected", expected);
        match object_type {
            Some(t) => config.with_param("object_type", t),
            None => config,
        }
    };
    assert!(h.ok(count(Some("server"), "1")).await);
    assert!(h.ok(count(Some("Memory"), "0")).await);
    assert!(h.ok(count(None, "1")).await);
    assert!(!h.ok(count(None, "2")).await);
    assert!(h.trace().has_code(codes::MONITOR_COUNT_MISMATCH));

    let conn = h.ctx.repository.get("c1").await.unwrap();
    assert_eq!(
        conn.as_connection()
            .unwrap()
            .monitor_record_count(Some(ObjectType::Server)),
        1
    );
}

#[tokio::test]
async fn test_decode_invalid_monitor_record() {
    let h = Harness::new();
    h.ok(message("raw", r#"{"ObjectType":"Server","TimeStamp":"2024-05-01T10:00:00Z"}"#))
        .await;

    let decode = ActionConfig::new("decode", "DecodeMonitorRecord")
        .with_param("message_id", "raw")
        .with_param("record_id", "rec");
    let err = h.invoke(decode).await.unwrap_err();
    assert_eq!(err.code, codes::MONITOR_DECODE);
    assert!(h.trace().has_code(codes::MONITOR_DECODE_FAILED));
    assert!(!h.ctx.repository.contains("rec").await);
}

#[tokio::test]
async fn test_decode_with_unknown_connection_stores_nothing() {
    let h = Harness::new();
    h.ok(message("raw", &server_payload(1))).await;

    let decode = ActionConfig::new("decode", "DecodeMonitorRecord")
        .with_param("message_id", "raw")
        .with_param("record_id", "rec")
        .with_param("connection_id", "ghost");
    assert!(!h.ok(decode).await);
    assert!(h.trace().has_code(codes::CONNECTION_NOT_FOUND));
    assert!(!h.ctx.repository.contains("rec").await);
    assert!(!h.trace().has_code(codes::MONITOR_RECORD_STORED));
}

#[tokio::test(start_paused = true)]
async fn test_sleep_uses_default_wait() {
    let h = Harness::new();
    let started = tokio::time::Instant::now();

    assert!(h.ok(ActionConfig::new("sleep", "Sleep")).await);
    assert!(started.elapsed() >= std::time::Duration::from_secs(1));
}
