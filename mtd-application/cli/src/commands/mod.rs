//! CLI 命令处理模块

pub mod actions;
pub mod output;
pub mod script;
