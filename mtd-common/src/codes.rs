//! 跟踪码
//!
//! 每个可区分的故障条件对应一个固定编号，按组件划分区段：
//! - 0xx 变量仓库
//! - 1xx 连接
//! - 2xx 监控记录
//! - 3xx 动作
//! - 9xx 脚本执行器

use serde::{Deserialize, Serialize};

/// 跟踪码，显示为 `MTD0123`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TraceCode(pub u16);

impl TraceCode {
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for TraceCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MTD{:04}", self.0)
    }
}

// ============================================
// 变量仓库 (0xx)
// ============================================

pub const VARIABLE_STORED: TraceCode = TraceCode(1);

// ============================================
// 连接 (1xx)
// ============================================

pub const CONN_CREATED: TraceCode = TraceCode(100);
pub const CONN_CONNECT_FAILED: TraceCode = TraceCode(101);
pub const CONN_CONNECTED: TraceCode = TraceCode(102);
pub const CONN_LOST: TraceCode = TraceCode(103);
pub const CONN_RECONNECTING: TraceCode = TraceCode(104);
pub const CONN_RECONNECTED: TraceCode = TraceCode(105);
pub const CONN_RECONNECT_EXHAUSTED: TraceCode = TraceCode(106);
pub const CONN_NO_FAILOVER: TraceCode = TraceCode(107);
pub const CONN_PENDING_TOKENS: TraceCode = TraceCode(108);
pub const CONN_PENDING_TOKEN_DETAIL: TraceCode = TraceCode(109);
pub const CONN_CLOSE_WITH_PENDING: TraceCode = TraceCode(110);
pub const CONN_CLOSE_REASON: TraceCode = TraceCode(111);
pub const CONN_CLOSE_FAILED: TraceCode = TraceCode(112);
pub const CONN_PUBLISH_FAILED: TraceCode = TraceCode(113);
pub const CONN_NOT_CONNECTED: TraceCode = TraceCode(114);
pub const CONN_UNSUPPORTED: TraceCode = TraceCode(115);
pub const CONN_RECEIVE_DISCONNECTED: TraceCode = TraceCode(116);
pub const CONN_SUBSCRIBE_FAILED: TraceCode = TraceCode(117);
pub const CONN_ALREADY_CLOSED: TraceCode = TraceCode(118);
pub const CONN_AWAIT_RECONNECT: TraceCode = TraceCode(119);

// ============================================
// 监控记录 (2xx)
// ============================================

pub const MONITOR_DECODE_FAILED: TraceCode = TraceCode(200);
pub const MONITOR_RECORD_STORED: TraceCode = TraceCode(201);

// ============================================
// 动作 (3xx)
// ============================================

pub const ACTION_VARIABLE_NOT_FOUND: TraceCode = TraceCode(300);
pub const ACTION_WRONG_VARIABLE_TYPE: TraceCode = TraceCode(301);

pub const COUNTER_MISSING: TraceCode = TraceCode(310);
pub const COUNTER_MISMATCH: TraceCode = TraceCode(311);
pub const STRING_MISMATCH: TraceCode = TraceCode(312);

pub const CONNECTION_NOT_FOUND: TraceCode = TraceCode(320);
pub const CONNECTION_NOT_CONNECTED: TraceCode = TraceCode(321);
pub const CONNECTION_CREATE_FAILED: TraceCode = TraceCode(322);
pub const RECONNECT_TIMEOUT: TraceCode = TraceCode(323);
pub const PENDING_DELIVERY_REMAIN: TraceCode = TraceCode(324);
pub const DELETE_RETAINED_FAILED: TraceCode = TraceCode(325);
pub const KIND_NOT_REGISTERED: TraceCode = TraceCode(326);
pub const SUBSCRIBE_FAILED: TraceCode = TraceCode(327);
pub const CLOSE_FAILED: TraceCode = TraceCode(328);

pub const MESSAGE_NOT_FOUND: TraceCode = TraceCode(330);
pub const PAYLOAD_TYPE_MISMATCH: TraceCode = TraceCode(331);
pub const PAYLOAD_MISMATCH: TraceCode = TraceCode(332);
pub const RECEIVE_TIMEOUT: TraceCode = TraceCode(333);
pub const UNEXPECTED_MESSAGE: TraceCode = TraceCode(334);
pub const SEND_FAILED: TraceCode = TraceCode(335);
pub const RECEIVE_FAILED: TraceCode = TraceCode(336);
pub const SEND_ACK_TIMEOUT: TraceCode = TraceCode(337);

pub const MONITOR_DECODE: TraceCode = TraceCode(340);
pub const MONITOR_FIELD_MISMATCH: TraceCode = TraceCode(341);
pub const MONITOR_COUNT_MISMATCH: TraceCode = TraceCode(342);
pub const MONITOR_UNKNOWN_FIELD: TraceCode = TraceCode(343);

// ============================================
// 脚本执行器 (9xx)
// ============================================

pub const SCRIPT_LOADED: TraceCode = TraceCode(900);
pub const STEP_FAILED: TraceCode = TraceCode(901);
pub const STEP_ERRORED: TraceCode = TraceCode(902);
pub const RUN_ABORTED: TraceCode = TraceCode(903);
pub const RUN_RESULT: TraceCode = TraceCode(904);
pub const BRANCH_PANICKED: TraceCode = TraceCode(905);
