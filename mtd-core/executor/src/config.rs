//! 驱动配置管理
//!
//! 支持从多个源加载配置:
//! - 环境变量 (优先级最高)
//! - 配置文件 (TOML/YAML/JSON)
//! - 默认值 (优先级最低)
//!
//! 配置文件搜索路径 (按优先级):
//! 1. `MTD_CONFIG` 环境变量指定的路径
//! 2. `./mtd.toml` (当前目录)
//! 3. `~/.config/mtd/config.toml` (用户配置目录)

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mtd_common::TraceLevel;
use mtd_transport::TransportConfig;

use crate::{ExecutorError, Result};

// ============================================
// 核心配置结构
// ============================================

/// 驱动配置 (顶层)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// 日志级别 (trace/debug/info/warn/error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// 跟踪记录保留的最详细级别
    #[serde(default = "default_trace_level")]
    pub trace_level: TraceLevel,

    /// 步骤返回 false 时的处理策略
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// 各动作的默认等待时间
    #[serde(default)]
    pub waits: WaitDefaults,

    /// 传输层配置
    #[serde(default)]
    pub transport: TransportConfig,
}

/// 默认等待时间（毫秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitDefaults {
    /// `WaitForReconnection`
    #[serde(default = "default_reconnect_wait")]
    pub reconnect_ms: u64,

    /// `ReceiveMessage`
    #[serde(default = "default_receive_wait")]
    pub receive_ms: u64,

    /// `CheckPendingDelivery`（0 表示立即检查）
    #[serde(default)]
    pub pending_delivery_ms: u64,

    /// `Sleep`
    #[serde(default = "default_sleep")]
    pub sleep_ms: u64,

    /// `SendMessage` 等待确认 (`wait_for_ack`)
    #[serde(default = "default_ack_wait")]
    pub ack_ms: u64,
}

/// 失败策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// 停止当前分支 (默认)
    #[default]
    Stop,
    /// 继续执行后续步骤
    Continue,
}

impl std::str::FromStr for FailurePolicy {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "stop" => Ok(Self::Stop),
            "continue" => Ok(Self::Continue),
            other => Err(ExecutorError::ConfigFile(format!(
                "未知失败策略: {}",
                other
            ))),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            trace_level: default_trace_level(),
            failure_policy: FailurePolicy::default(),
            waits: WaitDefaults::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl Default for WaitDefaults {
    fn default() -> Self {
        Self {
            reconnect_ms: default_reconnect_wait(),
            receive_ms: default_receive_wait(),
            pending_delivery_ms: 0,
            sleep_ms: default_sleep(),
            ack_ms: default_ack_wait(),
        }
    }
}

impl WaitDefaults {
    pub fn reconnect(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }

    pub fn receive(&self) -> Duration {
        Duration::from_millis(self.receive_ms)
    }

    pub fn pending_delivery(&self) -> Duration {
        Duration::from_millis(self.pending_delivery_ms)
    }

    pub fn sleep(&self) -> Duration {
        Duration::from_millis(self.sleep_ms)
    }

    pub fn ack(&self) -> Duration {
        Duration::from_millis(self.ack_ms)
    }
}

// ============================================
// 配置加载
// ============================================

impl DriverConfig {
    /// 加载配置 (自动搜索配置文件并应用环境变量)
    pub fn load() -> Result<Self> {
        // 1. 从默认值开始
        let mut config = Self::default();

        // 2. 尝试加载配置文件
        if let Some(path) = Self::find_config_file() {
            tracing::debug!("加载配置文件: {:?}", path);
            config = Self::load_from_file(&path)?;
        } else {
            tracing::debug!("未找到配置文件，使用默认配置");
        }

        // 3. 从环境变量覆盖
        config.apply_overrides(|name| env::var(name).ok())?;

        Ok(config)
    }

    /// 从指定文件加载配置
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;

        // 根据文件扩展名选择解析器
        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&content)
                .map_err(|e| ExecutorError::ConfigFile(format!("{:?}: {}", path, e))),
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| ExecutorError::ConfigFile(format!("{:?}: {}", path, e))),
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| ExecutorError::ConfigFile(format!("{:?}: {}", path, e))),
            _ => Err(ExecutorError::ConfigFile(format!(
                "不支持的配置文件格式: {:?}",
                path
            ))),
        }
    }

    /// 查找配置文件 (按优先级搜索)
    fn find_config_file() -> Option<PathBuf> {
        // 1. 环境变量指定的路径
        if let Ok(path) = env::var("MTD_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        // 2. 当前目录
        let local = PathBuf::from("./mtd.toml");
        if local.exists() {
            return Some(local);
        }

        // 3. 用户配置目录
        if let Some(home) = dirs::home_dir() {
            let user = home.join(".config/mtd/config.toml");
            if user.exists() {
                return Some(user);
            }
        }

        None
    }

    /// 应用覆盖值（`lookup` 按变量名返回值）
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("MTD_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(level) = lookup("MTD_TRACE_LEVEL") {
            self.trace_level = TraceLevel::from_name(&level).ok_or_else(|| {
                ExecutorError::ConfigFile(format!("无效的 MTD_TRACE_LEVEL: {}", level))
            })?;
        }
        if let Some(policy) = lookup("MTD_FAILURE_POLICY") {
            self.failure_policy = policy.parse()?;
        }
        Ok(())
    }
}

// 默认值函数
fn default_log_level() -> String {
    "info".to_string()
}

fn default_trace_level() -> TraceLevel {
    TraceLevel::Debug
}

fn default_reconnect_wait() -> u64 {
    20_000
}

fn default_receive_wait() -> u64 {
    5_000
}

fn default_ack_wait() -> u64 {
    5_000
}

fn default_sleep() -> u64 {
    1_000
}
