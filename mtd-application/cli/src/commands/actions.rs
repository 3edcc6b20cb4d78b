//! Actions 命令处理

use anyhow::Result;
use serde::Serialize;

use mtd_executor::ActionRegistry;

use super::output::{output_formatted, TableRow};

#[derive(Serialize)]
struct ActionEntry {
    name: String,
}

impl TableRow for ActionEntry {
    fn headers() -> Vec<&'static str> {
        vec!["动作类型"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.clone()]
    }
}

pub fn handle(format: &str) -> Result<()> {
    let registry = ActionRegistry::builtin();
    let entries: Vec<ActionEntry> = registry
        .names()
        .into_iter()
        .map(|name| ActionEntry {
            name: name.to_string(),
        })
        .collect();

    output_formatted(&entries, format)
}
