//! 流程控制动作

use async_trait::async_trait;
use std::time::Duration;

use crate::{Action, ActionConfig, ActionContext, ActionError, ConfigError};

/// 暂停指定时间
pub struct Sleep {
    id: String,
    wait: Duration,
}

impl Sleep {
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        Ok(Self {
            id: config.id.clone(),
            wait: config.millis_or("wait_ms", ctx.waits.sleep())?,
        })
    }
}

#[async_trait]
impl Action for Sleep {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &'static str {
        "Sleep"
    }

    async fn invoke(&self) -> Result<bool, ActionError> {
        tokio::time::sleep(self.wait).await;
        Ok(true)
    }
}
