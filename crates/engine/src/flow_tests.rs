//! End-to-end tests for loading descriptions and building flow graphs.
//!
//! Leaves are either real jobs running `/bin/sh` or a `Mock` kind
//! registered here on top of the default kinds, backed by `MockNode`.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tempfile::TempDir;

use nodes::mock::MockNode;
use nodes::{NodeError, NodeStatus, ReturnValue, StaticStore, TriggerContext, Triggerable};

use crate::models::{Dependencies, Parsed, TriggerableDescription};
use crate::{validate_flows, EngineError, FlowForest, ObjectStore};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MockDescription {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Returns")]
    returns: ReturnValue,
}

impl TriggerableDescription for MockDescription {
    fn id(&self) -> &str {
        &self.name
    }

    fn instantiate(&self, unique: &str, _deps: &Dependencies) -> Result<Arc<dyn Triggerable>, NodeError> {
        Ok(Arc::new(MockNode::returning(
            format!("{unique}__{}", self.name),
            self.returns,
        )))
    }
}

fn store() -> ObjectStore {
    let mut store = ObjectStore::with_default_kinds();
    store
        .register_type("Mock", |spec: Value| {
            Ok(Parsed::triggerable(serde_json::from_value::<MockDescription>(spec)?))
        })
        .unwrap();
    store
}

fn deps() -> Dependencies {
    Dependencies::new(Arc::new(StaticStore::new()))
}

fn envelope(kind: &str, spec: Value) -> String {
    json!({ "Kind": { "Name": kind }, "Spec": spec }).to_string()
}

/// Write the description files and one flow file, then load both.
fn fixture(descriptions: &[(&str, Value)], flows: Value) -> (TempDir, ObjectStore, FlowForest) {
    let dir = tempfile::tempdir().unwrap();
    for (i, (kind, spec)) in descriptions.iter().enumerate() {
        fs::write(dir.path().join(format!("{i:02}.json")), envelope(kind, spec.clone())).unwrap();
    }
    fs::write(dir.path().join("main.flow"), json!({ "Flows": flows }).to_string()).unwrap();

    let (store, forest) = load(dir.path());
    (dir, store, forest)
}

fn load(dir: &Path) -> (ObjectStore, FlowForest) {
    let mut store = store();
    store.load_all(dir).unwrap();
    (store, FlowForest::load_all(dir).unwrap())
}

fn shape(status: &NodeStatus) -> Value {
    json!({
        "kind": status.kind,
        "targets": status.targets.iter().map(shape).collect::<Vec<_>>(),
    })
}

fn mock(name: &str, returns: &str) -> (&'static str, Value) {
    ("Mock", json!({ "Name": name, "Returns": returns }))
}

// ============================================================
// Building
// ============================================================

#[test]
fn ids_follow_the_path_through_the_tree() {
    let (_dir, store, forest) = fixture(
        &[
            ("Simple", json!({ "Name": "fan" })),
            ("Retry", json!({ "Name": "retry", "Timer": "*/5 * * * *" })),
            mock("leaf", "Ok"),
        ],
        json!({ "f": { "Root": { "Name": "fan", "Targets": [
            { "Name": "retry", "Targets": [ { "Name": "leaf" } ] },
            { "Name": "leaf" }
        ] } } }),
    );

    let built = forest.build("f", &store, &deps()).unwrap();
    assert_eq!(
        built.node_ids(),
        vec!["f__fan", "f_0__retry", "f_0_retry_0__leaf", "f_1__leaf"]
    );
    assert!(built.node("f_0_retry_0__leaf").is_some());
    assert!(built.node("f__fan").is_none(), "root is not a child node");
}

#[test]
fn reused_descriptions_get_distinct_ids_and_keep_declared_order() {
    let (_dir, store, forest) = fixture(
        &[
            ("Simple", json!({ "Name": "fan" })),
            mock("a", "Ok"),
            mock("b", "Ok"),
        ],
        json!({ "f": { "Root": { "Name": "fan", "Targets": [
            { "Name": "b" }, { "Name": "a" }, { "Name": "b" }
        ] } } }),
    );

    let built = forest.build("f", &store, &deps()).unwrap();
    let ids: Vec<String> = built.status().targets.iter().map(|t| t.id.clone()).collect();
    assert_eq!(ids, vec!["f_0__b", "f_1__a", "f_2__b"]);
}

#[test]
fn seeded_builds_are_disjoint_with_identical_shape() {
    let (_dir, store, forest) = fixture(
        &[
            ("Simple", json!({ "Name": "fan", "Parallel": true })),
            ("Retry", json!({ "Name": "retry", "Timer": "0 * * * *" })),
            mock("leaf", "Ok"),
        ],
        json!({ "f": { "Root": { "Name": "fan", "Targets": [
            { "Name": "retry", "Targets": [ { "Name": "leaf" }, { "Name": "leaf" } ] }
        ] } } }),
    );

    let a = forest.build_seeded("f", "one", &store, &deps()).unwrap();
    let b = forest.build_seeded("f", "two", &store, &deps()).unwrap();

    let ids_a = a.node_ids();
    let ids_b = b.node_ids();
    assert!(ids_a.iter().all(|id| !ids_b.contains(id)));
    assert_eq!(shape(&a.status()), shape(&b.status()));
}

#[test]
fn loading_the_same_directory_twice_builds_the_same_graph() {
    let (dir, store, forest) = fixture(
        &[("Simple", json!({ "Name": "fan" })), mock("leaf", "Ok")],
        json!({ "f": { "Root": { "Name": "fan", "Targets": [ { "Name": "leaf" } ] } } }),
    );
    let first = forest.build("f", &store, &deps()).unwrap();

    let (store, forest) = load(dir.path());
    let second = forest.build("f", &store, &deps()).unwrap();
    assert_eq!(first.node_ids(), second.node_ids());
}

#[test]
fn root_that_is_only_triggerable_is_rejected() {
    let (_dir, store, forest) = fixture(
        &[mock("leaf", "Ok")],
        json!({ "f": { "Root": { "Name": "leaf", "Targets": [ { "Name": "leaf" } ] } } }),
    );

    let err = forest.build("f", &store, &deps()).unwrap_err();
    assert!(matches!(err, EngineError::NotATriggerer(ref n) if n == "leaf"));
    assert!(err.to_string().contains("not a Triggerer"));
}

#[test]
fn inner_node_with_targets_must_be_a_triggerer() {
    let (_dir, store, forest) = fixture(
        &[("Simple", json!({ "Name": "fan" })), mock("leaf", "Ok")],
        json!({ "f": { "Root": { "Name": "fan", "Targets": [
            { "Name": "leaf", "Targets": [ { "Name": "leaf" } ] }
        ] } } }),
    );
    assert!(matches!(
        forest.build("f", &store, &deps()),
        Err(EngineError::NotATriggerer(ref n)) if n == "leaf"
    ));
}

#[test]
fn unknown_names_and_flows_are_build_errors() {
    let (_dir, store, forest) = fixture(
        &[("Simple", json!({ "Name": "fan" }))],
        json!({
            "ghost-root": { "Root": { "Name": "nobody" } },
            "ghost-child": { "Root": { "Name": "fan", "Targets": [ { "Name": "nobody" } ] } }
        }),
    );

    assert!(matches!(
        forest.build("ghost-root", &store, &deps()),
        Err(EngineError::NotFound { role: "triggerer", .. })
    ));
    assert!(matches!(
        forest.build("ghost-child", &store, &deps()),
        Err(EngineError::NotFound { role: "triggerable", .. })
    ));
    assert!(matches!(
        forest.build("absent", &store, &deps()),
        Err(EngineError::FlowNotFound(_))
    ));
}

#[test]
fn bad_schedule_fails_only_its_flow() {
    let (_dir, store, forest) = fixture(
        &[
            ("Simple", json!({ "Name": "fan" })),
            ("Retry", json!({ "Name": "broken", "Timer": "whenever" })),
            mock("leaf", "Ok"),
        ],
        json!({
            "bad": { "Root": { "Name": "fan", "Targets": [
                { "Name": "broken", "Targets": [ { "Name": "leaf" } ] }
            ] } },
            "good": { "Root": { "Name": "fan", "Targets": [ { "Name": "leaf" } ] } }
        }),
    );

    let report = forest.build_all(&store, &deps());
    assert_eq!(report.built.keys().collect::<Vec<_>>(), vec!["good"]);
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(
        &report.failed[0],
        (flow, EngineError::Instantiate { id, .. }) if flow == "bad" && id == "bad_0__broken"
    ));
}

#[test]
fn validation_agrees_with_the_builder() {
    let (_dir, store, forest) = fixture(
        &[("Simple", json!({ "Name": "fan" })), mock("leaf", "Ok")],
        json!({
            "ok": { "Root": { "Name": "fan", "Targets": [ { "Name": "leaf" } ] } },
            "bad": { "Root": { "Name": "leaf" } }
        }),
    );
    let problems = validate_flows(&forest, &store);
    assert_eq!(problems.len(), 1);
    assert!(problems[0].to_string().starts_with("flow 'bad'"));
    assert!(forest.build("ok", &store, &deps()).is_ok());
}

// ============================================================
// Running built graphs
// ============================================================

#[tokio::test(start_paused = true)]
async fn retry_with_budget_two_makes_three_attempts() {
    let (_dir, store, forest) = fixture(
        &[
            ("Simple", json!({ "Name": "fan" })),
            (
                "Retry",
                json!({ "Name": "retry", "Timer": "* * * * * *", "WaitGranularity": 100, "MaxFailedRetries": 2 }),
            ),
            mock("flaky", "Retry"),
        ],
        json!({ "c": { "Root": { "Name": "fan", "Targets": [
            { "Name": "retry", "Targets": [ { "Name": "flaky" } ] }
        ] } } }),
    );

    let built = forest.build("c", &store, &deps()).unwrap();
    built.root.run(&TriggerContext::new("c")).await.unwrap();

    let flaky = built.node("c_0_retry_0__flaky").unwrap();
    assert_eq!(flaky.status().trigger_count, 3);
    let retry = built.node("c_0__retry").unwrap();
    assert_eq!(retry.status().current_retry, Some(2));
}

#[tokio::test]
async fn parallel_fanout_with_one_failing_child_is_retry() {
    let (_dir, store, forest) = fixture(
        &[
            ("Simple", json!({ "Name": "root" })),
            ("Simple", json!({ "Name": "par", "Parallel": true })),
            mock("good", "Ok"),
            mock("bad", "Retry"),
        ],
        json!({ "d": { "Root": { "Name": "root", "Targets": [
            { "Name": "par", "Targets": [ { "Name": "good" }, { "Name": "bad" }, { "Name": "good" } ] }
        ] } } }),
    );

    let built = forest.build("d", &store, &deps()).unwrap();
    let par = built.node("d_0__par").unwrap();
    assert_eq!(par.trigger(&TriggerContext::new("d")).await, ReturnValue::Retry);
    for t in &par.status().targets {
        assert_eq!(t.trigger_count, 1, "{}", t.id);
    }
}

#[cfg(unix)]
#[tokio::test]
async fn job_exit_status_decides_the_result() {
    let (_dir, store, forest) = fixture(
        &[
            ("Simple", json!({ "Name": "fan" })),
            (
                "Job",
                json!({ "Name": "fine", "ResticPath": "/bin/sh", "ResticArguments": ["-c", "exit 0"] }),
            ),
            (
                "Job",
                json!({ "Name": "gone", "ResticPath": "/nonexistent/restic", "ResticArguments": ["backup"] }),
            ),
        ],
        json!({ "jobs": { "Root": { "Name": "fan", "Targets": [
            { "Name": "fine" }, { "Name": "gone" }
        ] } } }),
    );

    let built = forest.build("jobs", &store, &deps()).unwrap();
    let ctx = TriggerContext::new("jobs");

    let fine = built.node("jobs_0__fine").unwrap();
    assert_eq!(fine.trigger(&ctx).await, ReturnValue::Ok);
    assert_eq!(fine.status().last_exit_code, Some(0));

    let gone = built.node("jobs_1__gone").unwrap();
    assert_eq!(gone.trigger(&ctx).await, ReturnValue::Retry);
    assert_eq!(gone.status().last_exit_code, Some(1));
}
