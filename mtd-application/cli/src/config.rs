//! CLI 配置加载
//!
//! 指定 `--config` 时只读该文件；否则按驱动配置的默认搜索路径加载。
//! 两种情况都会应用 `MTD_*` 环境变量覆盖。

use anyhow::{Context, Result};
use std::env;
use std::path::Path;

use mtd_executor::DriverConfig;

/// 加载驱动配置
pub fn load_driver_config(path: Option<&Path>) -> Result<DriverConfig> {
    let Some(path) = path else {
        return DriverConfig::load().context("加载驱动配置失败");
    };

    let mut config = DriverConfig::load_from_file(path)
        .with_context(|| format!("读取配置文件失败: {:?}", path))?;
    config
        .apply_overrides(|name| env::var(name).ok())
        .context("应用环境变量覆盖失败")?;
    Ok(config)
}

/// 以 TOML 打印配置
pub fn print_driver_config(config: &DriverConfig) -> Result<()> {
    let content = toml::to_string_pretty(config).context("序列化配置失败")?;
    println!("{}", content);
    Ok(())
}
