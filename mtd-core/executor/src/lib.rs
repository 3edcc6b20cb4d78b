//! MTD 执行器
//!
//! 变量仓库、动作框架、内置动作目录与脚本执行引擎

pub mod action;
pub mod actions;
pub mod config;
pub mod error;
pub mod registry;
pub mod repository;
pub mod runner;
pub mod scenario;

pub use action::{Action, ActionConfig, ActionContext};
pub use config::{DriverConfig, FailurePolicy, WaitDefaults};
pub use error::{ActionError, ConfigError};
pub use registry::{ActionConstructor, ActionRegistry};
pub use repository::{RepositoryError, Variable, VariableRepository};
pub use runner::{Branch, ExecutionReport, PlanStep, ScriptRunner, StepReport, StepStatus};
pub use scenario::{ActionStep, ParamValue, Script, Step};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("脚本加载失败: {0}")]
    ScriptLoadFailed(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("配置文件错误: {0}")]
    ConfigFile(String),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    SerdeError(String),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
