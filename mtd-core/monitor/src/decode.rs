//! 监控负载解码
//!
//! 负载示例:
//!
//! ```json
//! {"ObjectType":"Server","NodeName":"node-a","TimeStamp":"2024-05-01T10:00:00Z",
//!  "ActiveConnections":3,"TotalConnections":10, ...}
//! ```
//!
//! 数值字段可以是 JSON 数字，也可以是数字字符串。

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::{
    MemoryRecord, MonitorError, MonitorRecord, ObjectType, RecordHeader, Result, ServerRecord,
};

impl MonitorRecord {
    /// 从 JSON 文本解码
    pub fn decode(payload: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|e| MonitorError::InvalidPayload(e.to_string()))?;
        Self::from_value(&value)
    }

    /// 从二进制负载解码
    pub fn decode_bytes(payload: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| MonitorError::InvalidPayload(e.to_string()))?;
        Self::from_value(&value)
    }

    /// 从已解析的 JSON 值解码
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| MonitorError::InvalidPayload("负载不是 JSON 对象".to_string()))?;
        let fields = FieldReader { obj };

        let type_name = fields.string("ObjectType")?;
        let object_type = ObjectType::from_name(&type_name)
            .ok_or(MonitorError::UnsupportedObjectType(type_name))?;

        let header = RecordHeader {
            object_type,
            node_name: fields.string("NodeName")?,
            timestamp: fields.timestamp("TimeStamp")?,
        };

        match object_type {
            ObjectType::Server => Ok(Self::Server(ServerRecord {
                header,
                active_connections: fields.u64("ActiveConnections")?,
                total_connections: fields.u64("TotalConnections")?,
                msg_read: fields.u64("MsgRead")?,
                msg_write: fields.u64("MsgWrite")?,
                bytes_read: fields.u64("BytesRead")?,
                bytes_write: fields.u64("BytesWrite")?,
                bad_connection_count: fields.u64("BadConnCount")?,
                total_endpoints: fields.u64("TotalEndpoints")?,
            })),
            ObjectType::Memory => Ok(Self::Memory(MemoryRecord {
                header,
                memory_total_bytes: fields.u64("MemoryTotalBytes")?,
                memory_free_bytes: fields.u64("MemoryFreeBytes")?,
                memory_free_percent: fields.f64("MemoryFreePercent")?,
                server_virtual_memory_bytes: fields.u64("ServerVirtualMemoryBytes")?,
                server_resident_set_bytes: fields.u64("ServerResidentSetBytes")?,
                message_payloads: fields.u64("MessagePayloads")?,
                publish_subscribe: fields.u64("PublishSubscribe")?,
                destinations: fields.u64("Destinations")?,
                current_activity: fields.u64("CurrentActivity")?,
            })),
        }
    }
}

/// 必填字段读取器
struct FieldReader<'a> {
    obj: &'a Map<String, Value>,
}

impl<'a> FieldReader<'a> {
    fn get(&self, name: &str) -> Result<&'a Value> {
        match self.obj.get(name) {
            Some(Value::Null) | None => Err(MonitorError::MissingField(name.to_string())),
            Some(value) => Ok(value),
        }
    }

    fn invalid(name: &str, value: &Value) -> MonitorError {
        MonitorError::InvalidField {
            field: name.to_string(),
            value: value.to_string(),
        }
    }

    fn string(&self, name: &str) -> Result<String> {
        match self.get(name)? {
            Value::String(s) => Ok(s.clone()),
            other => Err(Self::invalid(name, other)),
        }
    }

    fn u64(&self, name: &str) -> Result<u64> {
        let value = self.get(name)?;
        match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        }
        .ok_or_else(|| Self::invalid(name, value))
    }

    fn f64(&self, name: &str) -> Result<f64> {
        let value = self.get(name)?;
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|v| v.is_finite())
        .ok_or_else(|| Self::invalid(name, value))
    }

    fn timestamp(&self, name: &str) -> Result<DateTime<Utc>> {
        let value = self.get(name)?;
        value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| Self::invalid(name, value))
    }
}
