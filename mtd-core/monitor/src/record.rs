//! 监控记录类型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 监控对象类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    /// 服务器统计
    Server,
    /// 内存统计
    Memory,
}

impl ObjectType {
    /// 类型数量 (用于按类型计数的数组)
    pub const COUNT: usize = 2;

    pub const ALL: [ObjectType; Self::COUNT] = [ObjectType::Server, ObjectType::Memory];

    /// 计数数组下标
    pub fn index(&self) -> usize {
        match self {
            Self::Server => 0,
            Self::Memory => 1,
        }
    }

    /// 负载中的名称
    pub fn name(&self) -> &'static str {
        match self {
            Self::Server => "Server",
            Self::Memory => "Memory",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 所有记录共有的字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub object_type: ObjectType,
    pub node_name: String,
    pub timestamp: DateTime<Utc>,
}

/// 服务器统计快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub header: RecordHeader,
    pub active_connections: u64,
    pub total_connections: u64,
    pub msg_read: u64,
    pub msg_write: u64,
    pub bytes_read: u64,
    pub bytes_write: u64,
    pub bad_connection_count: u64,
    pub total_endpoints: u64,
}

/// 内存统计快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub header: RecordHeader,
    pub memory_total_bytes: u64,
    pub memory_free_bytes: u64,
    pub memory_free_percent: f64,
    pub server_virtual_memory_bytes: u64,
    pub server_resident_set_bytes: u64,
    pub message_payloads: u64,
    pub publish_subscribe: u64,
    pub destinations: u64,
    pub current_activity: u64,
}

/// 监控记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MonitorRecord {
    Server(ServerRecord),
    Memory(MemoryRecord),
}

impl MonitorRecord {
    pub fn header(&self) -> &RecordHeader {
        match self {
            Self::Server(r) => &r.header,
            Self::Memory(r) => &r.header,
        }
    }

    pub fn object_type(&self) -> ObjectType {
        self.header().object_type
    }

    /// 按负载字段名读取数值字段
    pub fn field(&self, name: &str) -> Option<f64> {
        match self {
            Self::Server(r) => match name {
                "ActiveConnections" => Some(r.active_connections as f64),
                "TotalConnections" => Some(r.total_connections as f64),
                "MsgRead" => Some(r.msg_read as f64),
                "MsgWrite" => Some(r.msg_write as f64),
                "BytesRead" => Some(r.bytes_read as f64),
                "BytesWrite" => Some(r.bytes_write as f64),
                "BadConnCount" => Some(r.bad_connection_count as f64),
                "TotalEndpoints" => Some(r.total_endpoints as f64),
                _ => None,
            },
            Self::Memory(r) => match name {
                "MemoryTotalBytes" => Some(r.memory_total_bytes as f64),
                "MemoryFreeBytes" => Some(r.memory_free_bytes as f64),
                "MemoryFreePercent" => Some(r.memory_free_percent),
                "ServerVirtualMemoryBytes" => Some(r.server_virtual_memory_bytes as f64),
                "ServerResidentSetBytes" => Some(r.server_resident_set_bytes as f64),
                "MessagePayloads" => Some(r.message_payloads as f64),
                "PublishSubscribe" => Some(r.publish_subscribe as f64),
                "Destinations" => Some(r.destinations as f64),
                "CurrentActivity" => Some(r.current_activity as f64),
                _ => None,
            },
        }
    }
}
