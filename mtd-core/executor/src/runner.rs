//! 脚本执行器
//!
//! 加载时一次性构造脚本中的全部动作，任何 [`ConfigError`] 都阻止执行。
//! 运行时按脚本顺序调用动作：
//! - `Ok(true)` 继续
//! - `Ok(false)` 记录失败，按 [`FailurePolicy`] 停止当前分支或继续
//! - `Err` 记录错误并中止整个运行，所有分支不再开始新步骤

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use mtd_common::{codes, TraceWriter};
use mtd_transport::TransportRegistry;

use crate::config::{DriverConfig, FailurePolicy};
use crate::scenario::{Script, Step};
use crate::{Action, ActionContext, ActionRegistry, ConfigError, Result, VariableRepository};

// ============================================
// 执行计划
// ============================================

/// 编译后的步骤
#[derive(Clone)]
pub enum PlanStep {
    Action(Arc<dyn Action>),
    Loop { repeat: u32, steps: Vec<PlanStep> },
    Concurrent(Vec<Branch>),
}

/// 并发块中的一个分支
#[derive(Clone)]
pub struct Branch {
    /// 分支标签，例如 `3.b1`
    pub label: String,
    pub steps: Arc<Vec<PlanStep>>,
}

enum Flow {
    Continue,
    /// 当前分支停止，其他分支不受影响
    StopBranch,
    /// 整个运行中止
    Abort,
}

/// 一次运行的共享状态
struct RunState {
    policy: FailurePolicy,
    trace: Arc<TraceWriter>,
    aborted: AtomicBool,
    reports: Mutex<Vec<StepReport>>,
}

impl RunState {
    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn record(&self, mut report: StepReport) {
        let mut reports = self.reports.lock().unwrap_or_else(PoisonError::into_inner);
        report.step_index = reports.len() + 1;
        reports.push(report);
    }

    fn take_reports(&self) -> Vec<StepReport> {
        let mut reports = self.reports.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *reports)
    }
}

// ============================================
// ScriptRunner
// ============================================

/// 脚本执行器
pub struct ScriptRunner {
    registry: Arc<ActionRegistry>,
    context: ActionContext,
    policy: FailurePolicy,
}

impl ScriptRunner {
    pub fn new(registry: Arc<ActionRegistry>, context: ActionContext) -> Self {
        Self {
            registry,
            context,
            policy: FailurePolicy::default(),
        }
    }

    /// 按驱动配置创建执行器（新的变量仓库和跟踪写入器）
    pub fn from_driver_config(
        config: &DriverConfig,
        registry: Arc<ActionRegistry>,
        transports: Arc<TransportRegistry>,
    ) -> Self {
        let context = ActionContext::new(
            Arc::new(VariableRepository::new()),
            Arc::new(TraceWriter::with_verbosity(config.trace_level)),
            transports,
        )
        .with_transport_config(config.transport.clone())
        .with_waits(config.waits);

        Self::new(registry, context).with_policy(config.failure_policy)
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn context(&self) -> &ActionContext {
        &self.context
    }

    pub fn trace(&self) -> &Arc<TraceWriter> {
        &self.context.trace
    }

    /// 构造脚本中的全部动作
    ///
    /// 未指定 ID 的动作使用 `类型@位置`，例如 `Sleep@3.b1.2`。
    pub fn compile(&self, script: &Script) -> std::result::Result<Vec<PlanStep>, ConfigError> {
        if script.steps.is_empty() {
            return Err(ConfigError::Script(format!("脚本 {} 没有步骤", script.name)));
        }

        let plan = self.compile_steps(&script.steps, "")?;
        self.context.trace.info(
            codes::SCRIPT_LOADED,
            &script.name,
            format!("脚本已加载，共 {} 个动作", script.action_count()),
        );
        Ok(plan)
    }

    fn compile_steps(
        &self,
        steps: &[Step],
        prefix: &str,
    ) -> std::result::Result<Vec<PlanStep>, ConfigError> {
        let mut plan = Vec::with_capacity(steps.len());

        for (i, step) in steps.iter().enumerate() {
            let path = if prefix.is_empty() {
                (i + 1).to_string()
            } else {
                format!("{}.{}", prefix, i + 1)
            };

            match step {
                Step::Action(step) => {
                    let config = step.to_config(&format!("{}@{}", step.action, path));
                    let action = self.registry.create(&config, &self.context)?;
                    plan.push(PlanStep::Action(Arc::from(action)));
                }
                Step::Loop { repeat, steps, id } => {
                    if steps.is_empty() {
                        return Err(ConfigError::Script(format!(
                            "循环 {} 没有步骤",
                            id.as_deref().unwrap_or(&path)
                        )));
                    }
                    plan.push(PlanStep::Loop {
                        repeat: *repeat,
                        steps: self.compile_steps(steps, &path)?,
                    });
                }
                Step::Concurrent { concurrent } => {
                    if concurrent.is_empty() {
                        return Err(ConfigError::Script(format!("并发块 {} 没有分支", path)));
                    }
                    let mut branches = Vec::with_capacity(concurrent.len());
                    for (j, branch) in concurrent.iter().enumerate() {
                        let label = format!("{}.b{}", path, j + 1);
                        let steps = self.compile_steps(branch, &label)?;
                        branches.push(Branch {
                            label,
                            steps: Arc::new(steps),
                        });
                    }
                    plan.push(PlanStep::Concurrent(branches));
                }
            }
        }

        Ok(plan)
    }

    /// 执行脚本
    pub async fn run(&self, script: &Script) -> Result<ExecutionReport> {
        let plan = self.compile(script)?;
        let policy = script.on_failure.unwrap_or(self.policy);
        info!("执行脚本: {} (策略 {:?})", script.name, policy);

        let state = Arc::new(RunState {
            policy,
            trace: self.context.trace.clone(),
            aborted: AtomicBool::new(false),
            reports: Mutex::new(Vec::new()),
        });

        let started = Instant::now();
        run_steps(&plan, None, &state).await;

        let mut report = ExecutionReport::new(&script.name);
        report.description = script.description.clone();
        report.tags = script.tags.clone();
        for step in state.take_reports() {
            report.add_step(step);
        }
        report.aborted = state.is_aborted();
        report.duration_ms = started.elapsed().as_millis() as u64;

        let trace = &self.context.trace;
        if report.aborted {
            trace.error(codes::RUN_ABORTED, &script.name, "运行因步骤错误中止");
        }
        trace.status(
            codes::RUN_RESULT,
            &script.name,
            format!(
                "{}: 成功 {}，失败 {}，错误 {}，跳过 {}，耗时 {} ms",
                if report.passed { "PASSED" } else { "FAILED" },
                report.passed_count,
                report.failed_count,
                report.errored_count,
                report.skipped_count,
                report.duration_ms
            ),
        );
        trace.record_result(&script.name, report.passed);

        Ok(report)
    }
}

// ============================================
// 步骤执行
// ============================================

fn run_steps<'a>(
    steps: &'a [PlanStep],
    branch: Option<&'a str>,
    state: &'a Arc<RunState>,
) -> Pin<Box<dyn Future<Output = Flow> + Send + 'a>> {
    Box::pin(async move {
        for (i, step) in steps.iter().enumerate() {
            if state.is_aborted() {
                skip_all(&steps[i..], branch, state);
                return Flow::Abort;
            }

            let flow = match step {
                PlanStep::Action(action) => run_action(action.as_ref(), branch, state).await,
                PlanStep::Loop { repeat, steps } => run_loop(*repeat, steps, branch, state).await,
                PlanStep::Concurrent(branches) => run_concurrent(branches, state).await,
            };

            match flow {
                Flow::Continue => {}
                stop => {
                    skip_all(&steps[i + 1..], branch, state);
                    return stop;
                }
            }
        }
        Flow::Continue
    })
}

async fn run_loop(
    repeat: u32,
    steps: &[PlanStep],
    branch: Option<&str>,
    state: &Arc<RunState>,
) -> Flow {
    for iteration in 0..repeat {
        debug!("循环第 {}/{} 次", iteration + 1, repeat);
        match run_steps(steps, branch, state).await {
            Flow::Continue => {}
            stop => return stop,
        }
    }
    Flow::Continue
}

async fn run_concurrent(branches: &[Branch], state: &Arc<RunState>) -> Flow {
    let mut tasks = JoinSet::new();
    for branch in branches {
        let label = branch.label.clone();
        let steps = branch.steps.clone();
        let state = state.clone();
        tasks.spawn(async move {
            let flow = run_steps(&steps, Some(label.as_str()), &state).await;
            (label, flow)
        });
    }

    let mut result = Flow::Continue;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((label, Flow::StopBranch)) => debug!("分支 {} 已停止", label),
            Ok((_, Flow::Abort)) => result = Flow::Abort,
            Ok((_, Flow::Continue)) => {}
            Err(e) => {
                warn!("并发分支异常退出: {}", e);
                state
                    .trace
                    .error(codes::BRANCH_PANICKED, "executor", format!("并发分支异常退出: {}", e));
                state.aborted.store(true, Ordering::SeqCst);
                result = Flow::Abort;
            }
        }
    }
    result
}

async fn run_action(action: &dyn Action, branch: Option<&str>, state: &RunState) -> Flow {
    let started = Instant::now();
    let outcome = action.invoke().await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let (report, flow) = match outcome {
        Ok(true) => (StepReport::success(action, branch), Flow::Continue),
        Ok(false) => {
            state
                .trace
                .error(codes::STEP_FAILED, action.id(), format!("{} 步骤失败", action.action_type()));
            let flow = match state.policy {
                FailurePolicy::Stop => Flow::StopBranch,
                FailurePolicy::Continue => Flow::Continue,
            };
            (StepReport::failed(action, branch, "检查未通过"), flow)
        }
        Err(e) => {
            let description = e.describe();
            state.trace.error(codes::STEP_ERRORED, action.id(), description.clone());
            state.aborted.store(true, Ordering::SeqCst);
            (StepReport::errored(action, branch, &description), Flow::Abort)
        }
    };

    state.record(report.with_duration(duration_ms));
    flow
}

/// 未执行的动作记为跳过（循环体只记一次）
fn skip_all(steps: &[PlanStep], branch: Option<&str>, state: &RunState) {
    for step in steps {
        match step {
            PlanStep::Action(action) => state.record(StepReport::skipped(action.as_ref(), branch)),
            PlanStep::Loop { steps, .. } => skip_all(steps, branch, state),
            PlanStep::Concurrent(branches) => {
                for b in branches {
                    skip_all(&b.steps, Some(&b.label), state);
                }
            }
        }
    }
}

// ============================================
// 执行报告
// ============================================

/// 执行报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// 脚本名称
    pub script_name: String,

    /// 脚本描述
    pub description: Option<String>,

    /// 标签
    pub tags: Vec<String>,

    /// 是否通过（没有失败或错误的步骤）
    pub passed: bool,

    /// 是否因错误中止
    pub aborted: bool,

    /// 执行的步骤数（不含跳过）
    pub steps_executed: usize,

    /// 通过的步骤数
    pub passed_count: usize,

    /// 失败的步骤数
    pub failed_count: usize,

    /// 错误的步骤数
    pub errored_count: usize,

    /// 跳过的步骤数
    pub skipped_count: usize,

    /// 总耗时（毫秒）
    pub duration_ms: u64,

    /// 步骤报告列表
    pub steps: Vec<StepReport>,
}

impl ExecutionReport {
    pub fn new(name: &str) -> Self {
        Self {
            script_name: name.to_string(),
            description: None,
            tags: Vec::new(),
            passed: true,
            aborted: false,
            steps_executed: 0,
            passed_count: 0,
            failed_count: 0,
            errored_count: 0,
            skipped_count: 0,
            duration_ms: 0,
            steps: Vec::new(),
        }
    }

    pub fn add_step(&mut self, step: StepReport) {
        match step.status {
            StepStatus::Success => {
                self.steps_executed += 1;
                self.passed_count += 1;
            }
            StepStatus::Failed => {
                self.steps_executed += 1;
                self.failed_count += 1;
                self.passed = false;
            }
            StepStatus::Errored => {
                self.steps_executed += 1;
                self.errored_count += 1;
                self.passed = false;
            }
            StepStatus::Skipped => self.skipped_count += 1,
        }

        self.steps.push(step);
    }

    /// 指定动作 ID 的步骤报告
    pub fn steps_for(&self, action_id: &str) -> Vec<&StepReport> {
        self.steps.iter().filter(|s| s.action_id == action_id).collect()
    }

    /// 导出为 JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// 导出为 YAML
    pub fn to_yaml(&self) -> serde_yaml::Result<String> {
        serde_yaml::to_string(self)
    }
}

/// 步骤报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    /// 步骤索引（按完成顺序）
    pub step_index: usize,

    /// 动作 ID
    pub action_id: String,

    /// 动作类型
    pub action_type: String,

    /// 并发分支标签
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// 步骤状态
    pub status: StepStatus,

    /// 错误信息
    pub error: Option<String>,

    /// 耗时（毫秒）
    pub duration_ms: u64,
}

impl StepReport {
    fn with_status(action: &dyn Action, branch: Option<&str>, status: StepStatus) -> Self {
        Self {
            step_index: 0,
            action_id: action.id().to_string(),
            action_type: action.action_type().to_string(),
            branch: branch.map(str::to_string),
            status,
            error: None,
            duration_ms: 0,
        }
    }

    pub fn success(action: &dyn Action, branch: Option<&str>) -> Self {
        Self::with_status(action, branch, StepStatus::Success)
    }

    pub fn failed(action: &dyn Action, branch: Option<&str>, error: &str) -> Self {
        let mut report = Self::with_status(action, branch, StepStatus::Failed);
        report.error = Some(error.to_string());
        report
    }

    pub fn errored(action: &dyn Action, branch: Option<&str>, error: &str) -> Self {
        let mut report = Self::with_status(action, branch, StepStatus::Errored);
        report.error = Some(error.to_string());
        report
    }

    pub fn skipped(action: &dyn Action, branch: Option<&str>) -> Self {
        Self::with_status(action, branch, StepStatus::Skipped)
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// 步骤状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Success,
    Failed,
    Errored,
    Skipped,
}
