use std::sync::Arc;

use anomaly_core::{PlanNodeSpec, SchedulerError};
use anomaly_pipeline::{PlanExecutor, TimeWindow};
use anomaly_testing_utils::{
    scripted_registry, InvocationLog, PlanNodeSpecBuilder, CONSTANT, FAILING, RECORDING, SILENT,
};
use serde_json::json;

fn executor(log: &InvocationLog) -> PlanExecutor {
    PlanExecutor::new(Arc::new(scripted_registry(log)), 4)
}

fn window() -> TimeWindow {
    TimeWindow::new(1_000, 2_000)
}

fn recording(name: &str, sources: &[&str]) -> PlanNodeSpec {
    sources
        .iter()
        .fold(PlanNodeSpecBuilder::new(name, RECORDING), |builder, source| {
            builder.depends_on(source)
        })
        .build()
}

#[tokio::test]
async fn test_chain_executes_in_dependency_order() {
    let log = InvocationLog::new();
    // 声明顺序与依赖顺序相反
    let nodes = vec![
        recording("root", &["detector"]),
        recording("detector", &["fetcher"]),
        recording("fetcher", &[]),
    ];

    let outputs = executor(&log)
        .execute_plan(&nodes, "root", window())
        .await
        .unwrap();

    assert_eq!(log.calls(), vec!["fetcher", "detector", "root"]);
    let root = outputs["output"].as_json().unwrap();
    assert_eq!(root["node"], json!("root"));
    assert_eq!(root["inputs"]["detector"]["inputs"]["fetcher"]["node"], json!("fetcher"));
}

#[tokio::test]
async fn test_shared_ancestor_executes_once() {
    let log = InvocationLog::new();
    let nodes = vec![
        recording("a", &[]),
        recording("b", &["a"]),
        recording("c", &["a"]),
        recording("root", &["b", "c"]),
    ];

    let outputs = executor(&log)
        .execute_plan(&nodes, "root", window())
        .await
        .unwrap();

    assert_eq!(log.count("a"), 1);
    assert_eq!(log.calls().len(), 4);

    let root = outputs["output"].as_json().unwrap();
    let seen_by_b = &root["inputs"]["b"]["inputs"]["a"];
    let seen_by_c = &root["inputs"]["c"]["inputs"]["a"];
    assert_eq!(seen_by_b, seen_by_c);
    assert_eq!(seen_by_b["seq"], json!(0));
}

#[tokio::test]
async fn test_only_required_nodes_execute() {
    let log = InvocationLog::new();
    let nodes = vec![
        recording("fetcher", &[]),
        recording("root", &["fetcher"]),
        recording("unused", &["fetcher"]),
    ];

    executor(&log)
        .execute_plan(&nodes, "root", window())
        .await
        .unwrap();

    assert_eq!(log.count("unused"), 0);
}

#[tokio::test]
async fn test_missing_declared_output_is_fatal() {
    let log = InvocationLog::new();
    let nodes = vec![
        PlanNodeSpecBuilder::new("source", SILENT)
            .output("x", "x")
            .build(),
        PlanNodeSpecBuilder::new("root", RECORDING)
            .input("source", "x", "value")
            .build(),
    ];

    let err = executor(&log)
        .execute_plan(&nodes, "root", window())
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulerError::MissingContextKey(ref key) if key == "source#x"));
    assert!(err.is_fatal());
    assert!(log.calls().is_empty());
}

#[tokio::test]
async fn test_missing_output_shared_by_two_inputs_does_not_rerun_source() {
    let log = InvocationLog::new();
    let nodes = vec![
        recording("source", &[]),
        PlanNodeSpecBuilder::new("root", RECORDING)
            .depends_on("source")
            .input("source", "missing", "other")
            .build(),
    ];

    let err = executor(&log)
        .execute_plan(&nodes, "root", window())
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulerError::MissingContextKey(ref key) if key == "source#missing"));
    assert_eq!(log.count("source"), 1);
}

#[tokio::test]
async fn test_cyclic_plan_is_rejected_before_execution() {
    let log = InvocationLog::new();
    let nodes = vec![
        recording("a", &["b"]),
        recording("b", &["a"]),
        recording("root", &["a"]),
    ];

    let err = executor(&log)
        .execute_plan(&nodes, "root", window())
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulerError::CircularDependency(_)));
    assert!(log.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_component_type() {
    let log = InvocationLog::new();
    let nodes = vec![PlanNodeSpecBuilder::new("root", "SqlExecutor").build()];

    let err = executor(&log)
        .execute_plan(&nodes, "root", window())
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulerError::UnknownComponentType(ref t) if t == "SqlExecutor"));
}

#[tokio::test]
async fn test_operator_failure_is_tagged_with_node() {
    let log = InvocationLog::new();
    let nodes = vec![
        PlanNodeSpecBuilder::new("detector", FAILING)
            .param("message", json!("bad data"))
            .build(),
        recording("root", &["detector"]),
    ];

    let err = executor(&log)
        .execute_plan(&nodes, "root", window())
        .await
        .unwrap_err();

    match err {
        SchedulerError::OperatorExecution { node, message } => {
            assert_eq!(node, "detector");
            assert!(message.contains("bad data"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_same_output_key_on_two_nodes() {
    let log = InvocationLog::new();
    let nodes = vec![
        PlanNodeSpecBuilder::new("left", CONSTANT)
            .param("value", json!("L"))
            .build(),
        PlanNodeSpecBuilder::new("right", CONSTANT)
            .param("value", json!("R"))
            .build(),
        PlanNodeSpecBuilder::new("root", RECORDING)
            .input("left", "output", "l")
            .input("right", "output", "r")
            .build(),
    ];

    let outputs = executor(&log)
        .execute_plan(&nodes, "root", window())
        .await
        .unwrap();

    let inputs = &outputs["output"].as_json().unwrap()["inputs"];
    assert_eq!(inputs["l"], json!("L"));
    assert_eq!(inputs["r"], json!("R"));
}
