//! 脚本执行测试

use std::io::Write;
use std::sync::Arc;

use mtd_common::codes;
use mtd_executor::{
    ActionRegistry, ConfigError, DriverConfig, ExecutorError, FailurePolicy, Script, ScriptRunner,
    StepStatus,
};
use mtd_transport::{LoopbackBroker, LoopbackBuilder, TransportRegistry};

fn runner() -> ScriptRunner {
    let broker = LoopbackBroker::new();
    let transports =
        TransportRegistry::new().with_all(Arc::new(LoopbackBuilder::new(broker)));
    ScriptRunner::from_driver_config(
        &DriverConfig::default(),
        Arc::new(ActionRegistry::builtin()),
        Arc::new(transports),
    )
}

fn script(yaml: &str) -> Script {
    Script::from_yaml_str(yaml).unwrap()
}

async fn text(runner: &ScriptRunner, key: &str) -> Option<String> {
    runner
        .context()
        .repository
        .get(key)
        .await
        .and_then(|v| v.as_text().map(str::to_string))
}

#[tokio::test]
async fn test_loop_and_concurrent_script_passes() {
    let runner = runner();
    let script = script(
        r#"
name: counters
tags: [smoke]
steps:
  - action: CreateCounter
    params: { counter_id: hits }
  - repeat: 3
    steps:
      - action: IncrementCounter
        params: { counter_id: hits }
  - concurrent:
      - - action: IncrementCounter
          params: { counter_id: hits, by: 10 }
      - - action: IncrementCounter
          params: { counter_id: hits, by: 100 }
  - action: CompareCounter
    params: { counter_id: hits, expected: 113 }
"#,
    );

    let report = runner.run(&script).await.unwrap();
    assert!(report.passed);
    assert!(!report.aborted);
    assert_eq!(report.steps_executed, 7);
    assert_eq!(report.passed_count, 7);
    assert_eq!(report.tags, vec!["smoke".to_string()]);

    // 自动生成的 ID 带位置
    assert_eq!(report.steps_for("IncrementCounter@2.1").len(), 3);
    let branch = report.steps_for("IncrementCounter@3.b2.1");
    assert_eq!(branch.len(), 1);
    assert_eq!(branch[0].branch.as_deref(), Some("3.b2"));

    let trace = runner.trace();
    assert!(trace.has_code(codes::SCRIPT_LOADED));
    assert!(trace.has_code(codes::RUN_RESULT));
    let results = trace.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].test, "counters");
    assert!(results[0].passed);
}

#[tokio::test]
async fn test_stop_policy_skips_rest_of_branch() {
    let yaml = r#"
name: stop
steps:
  - action: StoreString
    params: { variable: s, value: a }
  - action: CompareString
    id: check
    params: { variable: s, expected: b }
  - action: StoreString
    params: { variable: t, value: x }
"#;

    let runner = runner();
    let report = runner.run(&script(yaml)).await.unwrap();
    assert!(!report.passed);
    assert!(!report.aborted);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.skipped_count, 1);
    assert_eq!(report.steps_for("check")[0].status, StepStatus::Failed);
    assert!(runner.trace().has_code(codes::STEP_FAILED));
    assert_eq!(text(&runner, "t").await, None);
    assert!(!runner.trace().results()[0].passed);
}

#[tokio::test]
async fn test_continue_policy_runs_remaining_steps() {
    let yaml = r#"
name: continue
steps:
  - action: CompareString
    params: { variable: missing, expected: b }
  - action: StoreString
    params: { variable: t, value: x }
"#;

    let runner = runner().with_policy(FailurePolicy::Continue);
    let report = runner.run(&script(yaml)).await.unwrap();
    assert!(!report.passed);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.passed_count, 1);
    assert_eq!(report.skipped_count, 0);
    assert_eq!(text(&runner, "t").await.as_deref(), Some("x"));
}

#[tokio::test]
async fn test_script_policy_overrides_runner() {
    let yaml = r#"
name: override
on_failure: continue
steps:
  - action: CompareString
    params: { variable: missing, expected: b }
  - action: StoreString
    params: { variable: t, value: x }
"#;

    let runner = runner().with_policy(FailurePolicy::Stop);
    let report = runner.run(&script(yaml)).await.unwrap();
    assert_eq!(report.skipped_count, 0);
    assert_eq!(text(&runner, "t").await.as_deref(), Some("x"));
}

#[tokio::test]
async fn test_errored_step_aborts_run() {
    let yaml = r#"
name: errored
steps:
  - action: IncrementCounter
    params: { counter_id: ghost }
  - action: StoreString
    params: { variable: t, value: x }
"#;

    let runner = runner().with_policy(FailurePolicy::Continue);
    let report = runner.run(&script(yaml)).await.unwrap();
    assert!(!report.passed);
    assert!(report.aborted);
    assert_eq!(report.errored_count, 1);
    assert_eq!(report.skipped_count, 1);

    let errored = &report.steps[0];
    assert_eq!(errored.status, StepStatus::Errored);
    assert!(errored.error.as_deref().unwrap().contains("MTD0310"));

    assert!(runner.trace().has_code(codes::STEP_ERRORED));
    assert!(runner.trace().has_code(codes::RUN_ABORTED));
    assert_eq!(text(&runner, "t").await, None);
}

#[tokio::test]
async fn test_failed_branch_does_not_stop_siblings() {
    let yaml = r#"
name: branches
steps:
  - concurrent:
      - - action: CompareString
          params: { variable: missing, expected: x }
        - action: StoreString
          params: { variable: a, value: "1" }
      - - action: StoreString
          params: { variable: b, value: "2" }
  - action: StoreString
    params: { variable: c, value: "3" }
"#;

    let runner = runner();
    let report = runner.run(&script(yaml)).await.unwrap();
    assert!(!report.passed);
    assert_eq!(report.skipped_count, 1);
    assert_eq!(text(&runner, "a").await, None);
    assert_eq!(text(&runner, "b").await.as_deref(), Some("2"));
    assert_eq!(text(&runner, "c").await.as_deref(), Some("3"));
}

#[tokio::test]
async fn test_construction_error_prevents_run() {
    let yaml = r#"
name: broken
steps:
  - action: StoreString
    params: { variable: s, value: a }
  - action: CloseConnection
"#;

    let runner = runner();
    let result = runner.run(&script(yaml)).await;
    match result {
        Err(ExecutorError::Config(ConfigError::MissingParameter { action, param })) => {
            assert_eq!(action, "CloseConnection@2");
            assert_eq!(param, "connection_id");
        }
        other => panic!("期望配置错误，实际 {:?}", other.map(|r| r.passed)),
    }

    assert!(runner.context().repository.is_empty().await);
    assert!(!runner.trace().has_code(codes::SCRIPT_LOADED));
}

#[tokio::test]
async fn test_zero_repeat_loop() {
    let yaml = r#"
name: zero
steps:
  - repeat: 0
    steps:
      - action: StoreString
        params: { variable: s, value: a }
"#;

    let runner = runner();
    let report = runner.run(&script(yaml)).await.unwrap();
    assert!(report.passed);
    assert_eq!(report.steps_executed, 0);
    assert_eq!(text(&runner, "s").await, None);
}

#[tokio::test]
async fn test_messaging_script_over_loopback() {
    let yaml = r#"
name: echo
steps:
  - action: CreateConnection
    params: { connection_id: pub, kind: mqtt, host: localhost, client_id: pub-1 }
  - action: CreateConnection
    params: { connection_id: sub, kind: mqtt, host: localhost, client_id: sub-1 }
  - action: Subscribe
    params: { connection_id: sub, topic: "echo/#", qos: 1 }
  - action: CreateMessage
    params: { message_id: out, payload: ping, topic: echo/1, qos: 1 }
  - action: SendMessage
    params: { connection_id: pub, message_id: out }
  - action: CheckPendingDelivery
    params: { connection_id: pub, wait_ms: 500 }
  - action: ReceiveMessage
    params: { connection_id: sub, message_id: in, wait_ms: 500 }
  - action: CompareMessageData
    params: { message_id: in, compare_to: ping }
  - concurrent:
      - - action: CloseConnection
          params: { connection_id: pub }
      - - action: CloseConnection
          params: { connection_id: sub }
"#;

    let runner = runner();
    let report = runner.run(&script(yaml)).await.unwrap();
    assert!(report.passed, "{}", report.to_yaml().unwrap());
    assert_eq!(report.passed_count, 10);

    let json = report.to_json().unwrap();
    assert!(json.contains("\"script_name\": \"echo\""));
}

#[tokio::test]
async fn test_script_from_json_file() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        file,
        r#"{{"name":"from-file","steps":[{{"action":"StoreString","params":{{"variable":"s","value":"v"}}}}]}}"#
    )
    .unwrap();

    let script = Script::from_file(file.path()).unwrap();
    let runner = runner();
    let report = runner.run(&script).await.unwrap();
    assert!(report.passed);
    assert_eq!(text(&runner, "s").await.as_deref(), Some("v"));
}

#[tokio::test]
async fn test_bundled_scripts_pass() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../scripts");
    for name in ["mqtt-echo.yaml", "monitor-check.yaml"] {
        let script = Script::from_file(dir.join(name)).unwrap();
        let report = runner().run(&script).await.unwrap();
        assert!(report.passed, "{}: {}", name, report.to_yaml().unwrap());
    }
}
