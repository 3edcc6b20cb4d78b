//! 动作抽象接口
//!
//! 动作分两个阶段：构造期从扁平参数块绑定并校验参数，
//! 运行期由执行器调用 [`Action::invoke`]。构造后的动作不可变，
//! 可以被调用多次（循环）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use mtd_common::TraceWriter;
use mtd_transport::{TransportConfig, TransportRegistry};

use crate::config::WaitDefaults;
use crate::{ActionError, ConfigError, VariableRepository};

/// 动作trait
///
/// 所有动作实现必须实现此 trait
#[async_trait]
pub trait Action: Send + Sync {
    /// 动作 ID（用于日志关联）
    fn id(&self) -> &str;

    /// 注册表中的类型名
    fn action_type(&self) -> &'static str;

    /// 执行动作
    ///
    /// `Ok(true)` 继续，`Ok(false)` 表示检查失败（由执行器策略决定是否中止），
    /// `Err` 表示检查本身无法进行。
    async fn invoke(&self) -> Result<bool, ActionError>;
}

/// 动作运行上下文
///
/// 构造时传给每个动作，代替全局状态。
#[derive(Clone)]
pub struct ActionContext {
    pub repository: Arc<VariableRepository>,
    pub trace: Arc<TraceWriter>,
    pub transports: Arc<TransportRegistry>,
    pub transport_config: Arc<TransportConfig>,
    pub waits: WaitDefaults,
}

impl ActionContext {
    pub fn new(
        repository: Arc<VariableRepository>,
        trace: Arc<TraceWriter>,
        transports: Arc<TransportRegistry>,
    ) -> Self {
        Self {
            repository,
            trace,
            transports,
            transport_config: Arc::new(TransportConfig::default()),
            waits: WaitDefaults::default(),
        }
    }

    pub fn with_transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = Arc::new(config);
        self
    }

    pub fn with_waits(mut self, waits: WaitDefaults) -> Self {
        self.waits = waits;
        self
    }
}

/// 动作配置（扁平参数块）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    pub id: String,
    pub action_type: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ActionConfig {
    pub fn new(id: impl Into<String>, action_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action_type: action_type.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// 可选参数；空白值视为未提供
    pub fn optional(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// 必需参数
    pub fn required(&self, name: &str) -> Result<&str, ConfigError> {
        self.optional(name)
            .ok_or_else(|| ConfigError::MissingParameter {
                action: self.id.clone(),
                param: name.to_string(),
            })
    }

    pub fn required_string(&self, name: &str) -> Result<String, ConfigError> {
        self.required(name).map(str::to_string)
    }

    pub fn optional_string(&self, name: &str) -> Option<String> {
        self.optional(name).map(str::to_string)
    }

    /// 必需参数并解析
    pub fn required_parse<T>(&self, name: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let value = self.required(name)?;
        self.parse_value(name, value)
    }

    /// 可选参数并解析
    pub fn optional_parse<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(name)
            .map(|value| self.parse_value(name, value))
            .transpose()
    }

    /// 可选参数并解析，缺省时使用默认值
    pub fn parse_or<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.optional_parse(name)?.unwrap_or(default))
    }

    /// 布尔参数（true/false/yes/no/1/0）
    pub fn flag_or(&self, name: &str, default: bool) -> Result<bool, ConfigError> {
        Ok(self.optional_flag(name)?.unwrap_or(default))
    }

    pub fn optional_flag(&self, name: &str) -> Result<Option<bool>, ConfigError> {
        let Some(value) = self.optional(name) else {
            return Ok(None);
        };
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Some(true)),
            "false" | "no" | "0" => Ok(Some(false)),
            _ => Err(self.invalid(name, value, "期望布尔值")),
        }
    }

    /// 毫秒参数
    pub fn millis_or(&self, name: &str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .optional_parse::<u64>(name)?
            .map(Duration::from_millis)
            .unwrap_or(default))
    }

    fn parse_value<T>(&self, name: &str, value: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        value
            .trim()
            .parse()
            .map_err(|e: T::Err| self.invalid(name, value, e.to_string()))
    }

    /// 构造参数值无效错误
    pub fn invalid(&self, name: &str, value: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidParameter {
            action: self.id.clone(),
            param: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
