mod common;
use common::init_tracing;

use std::io::Write;

use tempfile::NamedTempFile;

use dagforge::errors::DagforgeError;
use dagforge::plan::load_and_validate;

fn plan_file(contents: &str, extension: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(&format!(".{extension}"))
        .tempfile()
        .unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn cycle_returns_plan_invalid() {
    init_tracing();
    let file = plan_file(
        r#"{
          "name": "p",
          "tasks": [
            {"id": "a", "name": "A", "complexity": "S", "dependencies": ["b"]},
            {"id": "b", "name": "B", "complexity": "S", "dependencies": ["a"]}
          ]
        }"#,
        "json",
    );

    match load_and_validate(file.path()) {
        Err(DagforgeError::PlanInvalid(msg)) => {
            assert!(msg.contains("cycle"));
        }
        other => panic!("expected PlanInvalid cycle error, got: {other:?}"),
    }
}

#[test]
fn unknown_dependency_returns_plan_invalid() {
    init_tracing();
    let file = plan_file(
        r#"{
          "name": "p",
          "tasks": [
            {"id": "a", "name": "A", "complexity": "S", "dependencies": ["missing"]}
          ]
        }"#,
        "json",
    );

    match load_and_validate(file.path()) {
        Err(DagforgeError::PlanInvalid(msg)) => {
            assert!(msg.contains("unknown task"));
            assert!(msg.contains("missing"));
        }
        other => panic!("expected PlanInvalid unknown-dependency error, got: {other:?}"),
    }
}

#[test]
fn duplicate_task_id_returns_plan_invalid() {
    init_tracing();
    let file = plan_file(
        r#"{
          "name": "p",
          "tasks": [
            {"id": "a", "name": "A", "complexity": "S"},
            {"id": "a", "name": "A again", "complexity": "M"}
          ]
        }"#,
        "json",
    );

    match load_and_validate(file.path()) {
        Err(DagforgeError::PlanInvalid(msg)) => {
            assert!(msg.contains("duplicate task id"));
        }
        other => panic!("expected PlanInvalid duplicate-id error, got: {other:?}"),
    }
}

#[test]
fn self_dependency_returns_plan_invalid() {
    init_tracing();
    let file = plan_file(
        r#"{
          "name": "p",
          "tasks": [
            {"id": "a", "name": "A", "complexity": "S", "dependencies": ["a"]}
          ]
        }"#,
        "json",
    );

    match load_and_validate(file.path()) {
        Err(DagforgeError::PlanInvalid(msg)) => {
            assert!(msg.contains("cannot depend on itself"));
        }
        other => panic!("expected PlanInvalid self-dependency error, got: {other:?}"),
    }
}

#[test]
fn unknown_complexity_returns_plan_format_error() {
    init_tracing();
    let file = plan_file(
        r#"{
          "name": "p",
          "tasks": [
            {"id": "a", "name": "A", "complexity": "HUGE"}
          ]
        }"#,
        "json",
    );

    match load_and_validate(file.path()) {
        Err(DagforgeError::PlanFormat(_)) => {}
        other => panic!("expected PlanFormat error for unknown complexity, got: {other:?}"),
    }
}

#[test]
fn garbage_document_returns_plan_format_error() {
    init_tracing();
    let file = plan_file("not a plan, just text ;;;", "txt");

    match load_and_validate(file.path()) {
        Err(DagforgeError::PlanFormat(_)) => {}
        other => panic!("expected PlanFormat error for unparseable document, got: {other:?}"),
    }
}

#[test]
fn empty_plan_is_valid() {
    init_tracing();
    let file = plan_file(r#"{"name": "p", "tasks": []}"#, "json");
    let validated = load_and_validate(file.path()).expect("empty plan should be valid");
    assert!(validated.plan.tasks.is_empty());
    assert!(validated.graph.topo_order().is_empty());
}
