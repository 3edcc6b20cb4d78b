//! 计数器与字符串变量动作

use async_trait::async_trait;

use mtd_common::codes;

use super::{lookup_counter, lookup_text};
use crate::{
    Action, ActionConfig, ActionContext, ActionError, ConfigError, RepositoryError, Variable,
};

/// 创建计数器
pub struct CreateCounter {
    id: String,
    ctx: ActionContext,
    counter_id: String,
    initial: i64,
}

impl CreateCounter {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            counter_id: config.required_string("counter_id")?,
            initial: config.parse_or("initial", 0)?,
        })
    }
}

#[async_trait]
impl Action for CreateCounter {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "CreateCounter"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        self.ctx
            .repository
            .store(&self.counter_id, Variable::Counter(self.initial))
            .await;
        self.ctx.trace.debug(
            codes::VARIABLE_STORED,
            &self.id,
            format!("计数器 {} = {}", self.counter_id, self.initial),
        );
        Ok(true)
    }
}

/// 计数器加一（或加 `by`）
pub struct IncrementCounter {
    id: String,
    ctx: ActionContext,
    counter_id: String,
    by: i64,
}

impl IncrementCounter {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            counter_id: config.required_string("counter_id")?,
            by: config.parse_or("by", 1)?,
        })
    }
}

#[async_trait]
impl Action for IncrementCounter {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "IncrementCounter"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        match self.ctx.repository.increment(&self.counter_id, self.by).await {
            Ok(value) => {
                self.ctx.trace.debug(
                    codes::VARIABLE_STORED,
                    &self.id,
                    format!("计数器 {} = {}", self.counter_id, value),
                );
                Ok(true)
            }
            Err(e @ RepositoryError::NotFound(_)) => Err(ActionError::new(
                codes::COUNTER_MISSING,
                format!("无法递增计数器 {}", self.counter_id),
            )
            .with_source(e)),
            Err(e) => Err(ActionError::new(
                codes::ACTION_WRONG_VARIABLE_TYPE,
                format!("无法递增计数器 {}", self.counter_id),
            )
            .with_source(e)),
        }
    }
}

/// 比较计数器
pub struct CompareCounter {
    id: String,
    ctx: ActionContext,
    counter_id: String,
    expected: i64,
}

impl CompareCounter {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            counter_id: config.required_string("counter_id")?,
            expected: config.required_parse("expected")?,
        })
    }
}

#[async_trait]
impl Action for CompareCounter {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "CompareCounter"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        let Some(actual) = lookup_counter(&self.ctx, &self.id, &self.counter_id).await else {
            return Ok(false);
        };

        if actual != self.expected {
            self.ctx.trace.error(
                codes::COUNTER_MISMATCH,
                &self.id,
                format!(
                    "计数器 {} 的值为 {}，期望 {}",
                    self.counter_id, actual, self.expected
                ),
            );
            return Ok(false);
        }
        Ok(true)
    }
}

/// 存储字符串
pub struct StoreString {
    id: String,
    ctx: ActionContext,
    variable: String,
    value: String,
}

impl StoreString {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            variable: config.required_string("variable")?,
            // 值可以是空字符串
            value: config.params.get("value").cloned().ok_or_else(|| {
                ConfigError::MissingParameter {
                    action: config.id.clone(),
                    param: "value".to_string(),
                }
            })?,
        })
    }
}

#[async_trait]
impl Action for StoreString {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "StoreString"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        self.ctx
            .repository
            .store(&self.variable, Variable::Text(self.value.clone()))
            .await;
        self.ctx.trace.debug(
            codes::VARIABLE_STORED,
            &self.id,
            format!("字符串 {} = {:?}", self.variable, self.value),
        );
        Ok(true)
    }
}

/// 比较字符串
pub struct CompareString {
    id: String,
    ctx: ActionContext,
    variable: String,
    expected: String,
}

impl CompareString {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        Ok(Self {
            id: config.id.clone(),
            ctx: ctx.clone(),
            variable: config.required_string("variable")?,
            expected: config.params.get("expected").cloned().ok_or_else(|| {
                ConfigError::MissingParameter {
                    action: config.id.clone(),
                    param: "expected".to_string(),
                }
            })?,
        })
    }
}

#[async_trait]
impl Action for CompareString {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "CompareString"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        let Some(actual) = lookup_text(&self.ctx, &self.id, &self.variable).await else {
            return Ok(false);
        };

        if actual != self.expected {
            self.ctx.trace.error(
                codes::STRING_MISMATCH,
                &self.id,
                format!(
                    "字符串 {} 的值为 {:?}，期望 {:?}",
                    self.variable, actual, self.expected
                ),
            );
            return Ok(false);
        }
        Ok(true)
    }
}
