//! 传输层配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 传输层配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// 连接超时（毫秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// 是否在链路丢失后自动重连
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// 重连配置
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// 重连配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// 最大重连次数（0 表示不限次数，仅受 max_wait_ms 限制）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// 初始重连延迟（毫秒）
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// 最大重连延迟（毫秒）
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// 退避倍数
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// 链路丢失后首次重连前的等待时间（毫秒）
    #[serde(default)]
    pub wait_before_reconnect_ms: u64,

    /// 重连总时间窗口（毫秒）
    #[serde(default = "default_max_wait")]
    pub max_wait_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            auto_reconnect: default_auto_reconnect(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            wait_before_reconnect_ms: 0,
            max_wait_ms: default_max_wait(),
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// 关闭自动重连的配置
    pub fn without_reconnect() -> Self {
        Self {
            auto_reconnect: false,
            ..Default::default()
        }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn wait_before_reconnect(&self) -> Duration {
        Duration::from_millis(self.wait_before_reconnect_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// 一次完整重连可能耗费的最长时间
    pub fn failover_wait(&self) -> Duration {
        self.wait_before_reconnect() + self.max_wait()
    }

    /// 计算第 attempt 次重试前的延迟（指数退避，上限 max_delay_ms）
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = delay.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// 是否已用完重连次数
    pub fn attempts_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }
}

// 默认值函数
fn default_connect_timeout() -> u64 {
    30_000
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_wait() -> u64 {
    30_000
}
