//! Script 命令处理

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use mtd_common::{TraceLevel, TraceRecord};
use mtd_executor::{
    ActionRegistry, DriverConfig, ExecutionReport, PlanStep, Script, ScriptRunner, StepReport,
    StepStatus,
};
use mtd_transport::{LoopbackBroker, LoopbackBuilder, TransportRegistry};

use super::output::{print_table, TableRow};
use crate::ScriptAction;

pub async fn handle(action: ScriptAction, config: DriverConfig) -> Result<bool> {
    match action {
        ScriptAction::Run {
            file,
            format,
            policy,
            show_trace,
        } => run_script(&file, &format, policy.as_deref(), show_trace, config).await,
        ScriptAction::Check { file } => check_script(&file, config),
    }
}

/// 创建执行器
///
/// 所有连接类型都使用进程内回环传输。
fn build_runner(config: &DriverConfig) -> ScriptRunner {
    info!("使用回环传输");
    let broker = LoopbackBroker::new();
    let transports = TransportRegistry::new().with_all(Arc::new(LoopbackBuilder::new(broker)));

    ScriptRunner::from_driver_config(
        config,
        Arc::new(ActionRegistry::builtin()),
        Arc::new(transports),
    )
}

fn load_script(file: &Path) -> Result<Script> {
    let script = Script::from_file(file).with_context(|| format!("加载脚本失败: {:?}", file))?;

    println!(
        "{} 脚本加载成功: {}",
        "✓".green().bold(),
        script.name.cyan()
    );
    if let Some(desc) = &script.description {
        println!("描述: {}", desc.bright_black());
    }
    println!("动作数: {}", script.action_count().to_string().yellow());
    if !script.tags.is_empty() {
        println!("标签: {}", script.tags.join(", ").bright_black());
    }
    println!();

    Ok(script)
}

async fn run_script(
    file: &Path,
    format: &str,
    policy: Option<&str>,
    show_trace: bool,
    mut config: DriverConfig,
) -> Result<bool> {
    if let Some(policy) = policy {
        config.failure_policy = policy.parse()?;
    }

    let script = load_script(file)?;
    let runner = build_runner(&config);
    let report = runner.run(&script).await?;

    if show_trace {
        for record in runner.trace().records() {
            print_trace_record(&record);
        }
        println!();
    }

    match format {
        "json" => println!("{}", report.to_json()?),
        "yaml" => print!("{}", report.to_yaml()?),
        _ => print_report(&report),
    }

    Ok(report.passed)
}

fn check_script(file: &Path, config: DriverConfig) -> Result<bool> {
    let script = load_script(file)?;
    let runner = build_runner(&config);
    let plan = runner.compile(&script)?;

    print_plan(&plan, 0);
    println!();
    println!("{} 所有动作构造成功", "✓".green().bold());
    Ok(true)
}

fn print_plan(steps: &[PlanStep], depth: usize) {
    let indent = "  ".repeat(depth);
    for step in steps {
        match step {
            PlanStep::Action(action) => {
                println!("{}- {} ({})", indent, action.id(), action.action_type().cyan())
            }
            PlanStep::Loop { repeat, steps } => {
                println!("{}- 循环 x{}", indent, repeat);
                print_plan(steps, depth + 1);
            }
            PlanStep::Concurrent(branches) => {
                println!("{}- 并发 ({} 个分支)", indent, branches.len());
                for branch in branches {
                    println!("{}  [{}]", indent, branch.label);
                    print_plan(&branch.steps, depth + 2);
                }
            }
        }
    }
}

fn print_trace_record(record: &TraceRecord) {
    let line = record.to_string();
    match record.level {
        TraceLevel::Error => println!("{}", line.red()),
        TraceLevel::Warn => println!("{}", line.yellow()),
        TraceLevel::Status => println!("{}", line.bold()),
        TraceLevel::Info => println!("{}", line),
        TraceLevel::Debug | TraceLevel::Trace => println!("{}", line.bright_black()),
    }
}

impl TableRow for StepReport {
    fn headers() -> Vec<&'static str> {
        vec!["#", "动作", "状态", "耗时(ms)", "错误"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.step_index.to_string(),
            self.action_id.clone(),
            format!("{:?}", self.status),
            self.duration_ms.to_string(),
            self.error.clone().unwrap_or_default(),
        ]
    }
}

fn print_report(report: &ExecutionReport) {
    print_table(&report.steps);
    println!();

    let verdict = if report.passed {
        "PASSED".green().bold()
    } else {
        "FAILED".red().bold()
    };
    println!("{} {}", verdict, report.script_name);
    println!(
        "成功 {}，失败 {}，错误 {}，跳过 {}，耗时 {} ms",
        report.passed_count.to_string().green(),
        report.failed_count.to_string().red(),
        report.errored_count.to_string().red(),
        report.skipped_count.to_string().yellow(),
        report.duration_ms
    );

    if report.aborted {
        let first = report
            .steps
            .iter()
            .find(|s| s.status == StepStatus::Errored);
        if let Some(step) = first {
            println!("{} 于 {}", "运行中止".red(), step.action_id);
        }
    }
}
