//! 动作注册表

use std::collections::HashMap;
use tracing::debug;

use crate::{Action, ActionConfig, ActionContext, ConfigError};

/// 动作构造函数
pub type ActionConstructor =
    fn(&ActionConfig, &ActionContext) -> Result<Box<dyn Action>, ConfigError>;

/// 动作注册表
///
/// 类型名 -> 构造函数。执行器只通过注册表创建动作，不知道具体类型。
pub struct ActionRegistry {
    constructors: HashMap<String, ActionConstructor>,
}

impl ActionRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// 创建包含全部内置动作的注册表
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        crate::actions::register_builtin(&mut registry);
        registry
    }

    /// 注册动作类型，覆盖同名的已有注册
    pub fn register(&mut self, name: &str, constructor: ActionConstructor) {
        debug!("注册动作: {}", name);
        self.constructors.insert(name.to_string(), constructor);
    }

    /// 构造动作实例
    pub fn create(
        &self,
        config: &ActionConfig,
        context: &ActionContext,
    ) -> Result<Box<dyn Action>, ConfigError> {
        let constructor = self
            .constructors
            .get(&config.action_type)
            .ok_or_else(|| ConfigError::UnknownAction(config.action_type.clone()))?;

        constructor(config, context)
    }

    /// 已注册的动作类型（已排序）
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 把具体动作的构造结果装箱
pub fn boxed<A: Action + 'static>(
    action: Result<A, ConfigError>,
) -> Result<Box<dyn Action>, ConfigError> {
    action.map(|a| Box::new(a) as Box<dyn Action>)
}
