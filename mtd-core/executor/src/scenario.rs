//! 测试脚本定义
//!
//! 脚本由步骤组成，步骤可以是单个动作、`repeat` 循环或 `concurrent` 并发块。
//! 可以嵌套，但不是 DAG。
//!
//! ```yaml
//! name: mqtt-echo
//! on_failure: stop
//! steps:
//!   - action: CreateConnection
//!     params: { connection_id: c1, kind: mqtt, host: localhost }
//!   - repeat: 3
//!     steps:
//!       - action: SendMessage
//!         params: { connection_id: c1, message_id: m1 }
//!   - concurrent:
//!       - - action: Sleep
//!       - - action: Sleep
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::config::FailurePolicy;
use crate::ActionConfig;

/// 测试脚本
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    /// 脚本名称（结果记录使用）
    pub name: String,

    /// 脚本描述
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// 标签
    #[serde(default)]
    pub tags: Vec<String>,

    /// 覆盖驱动配置中的失败策略
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<FailurePolicy>,

    /// 步骤列表
    pub steps: Vec<Step>,
}

/// 脚本步骤
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    /// 循环执行嵌套步骤
    Loop {
        repeat: u32,
        steps: Vec<Step>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// 每个分支在独立任务中执行
    Concurrent { concurrent: Vec<Vec<Step>> },

    /// 单个动作
    Action(ActionStep),
}

/// 动作步骤
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStep {
    /// 注册表中的动作类型名
    pub action: String,

    /// 动作 ID，省略时按位置生成
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// 参数
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

/// 参数值
///
/// 脚本中可以直接写数字和布尔值，构造动作前统一转换为字符串。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl ActionStep {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            id: None,
            params: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// 转换为动作配置，`fallback_id` 用于未指定 ID 的步骤
    pub fn to_config(&self, fallback_id: &str) -> ActionConfig {
        ActionConfig {
            id: self.id.clone().unwrap_or_else(|| fallback_id.to_string()),
            action_type: self.action.clone(),
            params: self
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
        }
    }
}

impl Script {
    /// 从 YAML 文件加载脚本
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// 从 YAML 字符串加载脚本
    pub fn from_yaml_str(yaml: &str) -> crate::Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| crate::ExecutorError::SerdeError(e.to_string()))
    }

    /// 从 JSON 文件加载脚本
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// 从 JSON 字符串加载脚本
    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| crate::ExecutorError::SerdeError(e.to_string()))
    }

    /// 按扩展名加载脚本（.json 为 JSON，其余按 YAML）
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => Self::from_json_file(path),
            Some("yaml") | Some("yml") => Self::from_yaml_file(path),
            _ => Err(crate::ExecutorError::ScriptLoadFailed(format!(
                "不支持的脚本格式: {:?}",
                path
            ))),
        }
    }

    /// 导出为 YAML
    pub fn to_yaml(&self) -> crate::Result<String> {
        serde_yaml::to_string(self).map_err(|e| crate::ExecutorError::SerdeError(e.to_string()))
    }

    /// 导出为 JSON
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| crate::ExecutorError::SerdeError(e.to_string()))
    }

    /// 脚本中的动作步骤总数（循环体只计一次）
    pub fn action_count(&self) -> usize {
        fn count(steps: &[Step]) -> usize {
            steps
                .iter()
                .map(|step| match step {
                    Step::Action(_) => 1,
                    Step::Loop { steps, .. } => count(steps),
                    Step::Concurrent { concurrent } => {
                        concurrent.iter().map(|branch| count(branch)).sum()
                    }
                })
                .sum()
        }
        count(&self.steps)
    }
}
