//! End-to-end process scenarios over an in-memory database.

mod common;

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tideflow_core::manager::{self, ListOutcome};
use tideflow_core::models::{ActivityManagerType, ActivityStatus};
use tideflow_core::worker::process_outbox;
use tideflow_core::{EngineConfig, EngineEventType, EngineInner, ProcessStatus};

use common::*;

#[tokio::test]
async fn test_create_then_run_to_finish() {
    let engine = test_engine();
    let workflow = register(&engine, "linear", linear_blueprint()).await;
    let actor = json!({ "id": "u1" });

    let created = manager::create_process(&engine, &workflow, actor.clone(), json!({ "doc": "a" }))
        .await
        .unwrap();
    assert_eq!(created.status, ProcessStatus::Unstarted);
    let state = created.state.as_ref().unwrap();
    assert_eq!(state.step_number, 1);
    assert_eq!(state.node_id, "1");
    assert_eq!(state.next_node_id.as_deref(), Some("1"));

    let outcome = manager::run_process(&engine, &created.process_id, actor, json!({}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.status, ProcessStatus::Finished);

    let states = history(&engine, &created.process_id).await;
    assert_gapless(&states);
    assert_eq!(states.len(), 4);
    let last = states.last().unwrap();
    assert_eq!(last.node_id, "3");
    assert_eq!(last.bag, json!({ "doc": "a", "stamped_by": "u1" }));
    assert!(last.next_node_id.is_none());

    let record = manager::fetch_process(&engine, &created.process_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.current_status, Some(ProcessStatus::Finished));
    assert_eq!(record.current_state_id.as_deref(), Some(last.id.as_str()));
}

#[tokio::test]
async fn test_create_outcomes() {
    let engine = test_engine();
    let admins_only = register(
        &engine,
        "admins-only",
        json!({
            "lanes": [{ "id": "admins", "rule": { "type": "has_claim", "claim": "admin" } }],
            "nodes": [
                { "id": "1", "type": "Start", "next": "2", "lane_id": "admins" },
                { "id": "2", "type": "Finish", "next": null, "lane_id": "admins" }
            ]
        }),
    )
    .await;
    let two_starts = register(
        &engine,
        "two-starts",
        json!({
            "lanes": [open_lane()],
            "nodes": [
                { "id": "1", "type": "Start", "next": "3", "lane_id": "any" },
                { "id": "2", "type": "Start", "next": "3", "lane_id": "any" },
                { "id": "3", "type": "Finish", "next": null, "lane_id": "any" }
            ]
        }),
    )
    .await;

    let forbidden = manager::create_process(&engine, &admins_only, json!({ "claims": [] }), json!({}))
        .await
        .unwrap();
    assert_eq!(forbidden.status, ProcessStatus::Forbidden);

    let allowed = manager::create_process(
        &engine,
        &admins_only,
        json!({ "claims": ["admin"] }),
        json!({}),
    )
    .await
    .unwrap();
    assert_eq!(allowed.status, ProcessStatus::Unstarted);

    let ambiguous = manager::create_process(&engine, &two_starts, json!({}), json!({}))
        .await
        .unwrap();
    assert_eq!(ambiguous.status, ProcessStatus::Error);
    assert_eq!(ambiguous.error.as_deref(), Some("Multiple start nodes"));

    // Only the admitted process was persisted.
    match manager::list_processes(&engine, json!({})).await.unwrap() {
        ListOutcome::Processes(processes) => {
            assert_eq!(processes.len(), 1);
            assert_eq!(processes[0].id, allowed.process_id);
        }
        ListOutcome::Invalid { error } => panic!("unexpected invalid filters: {}", error),
    }
}

#[tokio::test]
async fn test_create_by_unknown_workflow_name() {
    let engine = test_engine();
    let created = manager::create_process_by_workflow_name(&engine, "nope", json!({}), json!({}))
        .await
        .unwrap();
    assert!(created.is_none());
}

#[tokio::test]
async fn test_run_gates_on_status() {
    let engine = test_engine();
    let workflow = register(
        &engine,
        "dead-end",
        json!({
            "lanes": [open_lane()],
            "nodes": [
                { "id": "1", "type": "Start", "next": "2", "lane_id": "any" },
                {
                    "id": "2", "type": "Flow", "lane_id": "any",
                    "next": { "yes": "3" },
                    "parameters": { "input": { "decision": "no" } }
                },
                { "id": "3", "type": "Finish", "next": null, "lane_id": "any" }
            ]
        }),
    )
    .await;

    let created = manager::create_process(&engine, &workflow, json!({}), json!({}))
        .await
        .unwrap();
    let failed = manager::run_process(&engine, &created.process_id, json!({}), json!({}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, ProcessStatus::Error);
    assert_eq!(failed.error.as_deref(), Some("no branch for decision 'no'"));
    let before = history(&engine, &created.process_id).await.len();

    // From ERROR no node runs.
    let again = manager::run_process(&engine, &created.process_id, json!({}), json!({}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.status, ProcessStatus::Error);
    assert_eq!(history(&engine, &created.process_id).await.len(), before);

    // From FINISHED a run is forbidden.
    let linear = register(&engine, "linear", linear_blueprint()).await;
    let done = manager::create_process(&engine, &linear, json!({ "id": "u1" }), json!({}))
        .await
        .unwrap();
    manager::run_process(&engine, &done.process_id, json!({ "id": "u1" }), json!({}))
        .await
        .unwrap();
    let forbidden = manager::run_process(&engine, &done.process_id, json!({ "id": "u1" }), json!({}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(forbidden.status, ProcessStatus::Forbidden);
}

#[tokio::test]
async fn test_run_unknown_process() {
    let engine = test_engine();
    let outcome = manager::run_process(&engine, "missing", json!({}), json!({}))
        .await
        .unwrap();
    assert!(outcome.is_none());
}

#[tokio::test]
async fn test_user_task_waits_and_resumes_on_completion() {
    let engine = test_engine();
    let workflow = register(&engine, "approval", user_task_blueprint(json!({}))).await;
    let created = manager::create_process(&engine, &workflow, json!({ "id": "u1" }), json!({ "doc": "d1" }))
        .await
        .unwrap();
    let waiting = manager::run_process(&engine, &created.process_id, json!({ "id": "u1" }), json!({}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(waiting.status, ProcessStatus::Waiting);
    let waiting_state = waiting.state.unwrap();
    assert_eq!(waiting_state.step_number, 3);
    assert_eq!(waiting_state.next_node_id.as_deref(), Some("2"));

    let ams = manager::list_activity_managers(&engine, &created.process_id)
        .await
        .unwrap();
    assert_eq!(ams.len(), 1);
    let am = &ams[0];
    assert_eq!(am.am_type, ActivityManagerType::Commit);
    assert_eq!(am.status, ActivityStatus::Started);
    assert_eq!(am.process_state_id, waiting_state.id);
    assert_eq!(am.parameters.next_step_number, Some(4));
    assert_eq!(am.props["action"], "APPROVE");
    assert_eq!(am.props["result"]["doc"], "d1");

    let completion = manager::complete_activity_manager(
        &engine,
        &am.id,
        reviewer(),
        json!({ "approved": true }),
    )
    .await
    .unwrap();
    assert_eq!(completion.activity_manager.status, ActivityStatus::Completed);
    assert_eq!(completion.activity_manager.activities.len(), 1);
    let resumed = completion.process.unwrap();
    assert_eq!(resumed.status, ProcessStatus::Finished);

    let states = history(&engine, &created.process_id).await;
    assert_gapless(&states);
    let resumed_step = &states[3];
    assert_eq!(resumed_step.status, ProcessStatus::Running);
    assert_eq!(
        resumed_step.result.as_ref().unwrap()["activities"][0]["data"]["approved"],
        true
    );

    // A second completion is refused.
    let err = manager::complete_activity_manager(&engine, &am.id, reviewer(), json!({}))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("completed"));
}

#[tokio::test]
async fn test_run_checks_the_lane_of_the_current_node() {
    let engine = test_engine();
    let workflow = register(&engine, "approval", user_task_blueprint(json!({}))).await;
    let created = manager::create_process(&engine, &workflow, json!({ "id": "u1" }), json!({}))
        .await
        .unwrap();
    manager::run_process(&engine, &created.process_id, json!({ "id": "u1" }), json!({}))
        .await
        .unwrap();

    let outsider = manager::run_process(
        &engine,
        &created.process_id,
        json!({ "id": "mallory", "claims": [] }),
        json!({ "approved": true }),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(outsider.status, ProcessStatus::Forbidden);
    assert_eq!(history(&engine, &created.process_id).await.len(), 3);

    let insider = manager::run_process(&engine, &created.process_id, reviewer(), json!({ "approved": true }))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(insider.status, ProcessStatus::Finished);
}

#[tokio::test]
async fn test_activity_schema_rejects_bad_submissions() {
    let engine = test_engine();
    let workflow = register(
        &engine,
        "approval",
        user_task_blueprint(json!({
            "activity_schema": {
                "type": "object",
                "required": ["approved"],
                "properties": { "approved": { "type": "boolean" } }
            }
        })),
    )
    .await;
    let created = manager::create_process(&engine, &workflow, json!({}), json!({}))
        .await
        .unwrap();
    manager::run_process(&engine, &created.process_id, json!({}), json!({}))
        .await
        .unwrap();
    let am = manager::list_activity_managers(&engine, &created.process_id)
        .await
        .unwrap()
        .remove(0);

    let err = manager::complete_activity_manager(&engine, &am.id, reviewer(), json!({ "approved": "yes" }))
        .await
        .unwrap_err();
    assert!(matches!(err, tideflow_core::EngineError::BadRequest(_)));

    let ok = manager::complete_activity_manager(&engine, &am.id, reviewer(), json!({ "approved": false }))
        .await
        .unwrap();
    assert_eq!(ok.process.unwrap().status, ProcessStatus::Finished);
}

#[tokio::test]
async fn test_notify_activity_is_announced_and_settled() {
    let announced: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = announced.clone();
    let db = tideflow_core::Database::open_in_memory().unwrap();
    let engine: tideflow_core::Engine = Arc::new(
        EngineInner::new(db, EngineConfig::default()).with_activity_manager_notifier(Arc::new(
            move |am: &Value| sink.lock().unwrap().push(am.clone()),
        )),
    );

    let workflow = register(
        &engine,
        "fire-and-forget",
        user_task_blueprint(json!({ "activity_manager": "notify" })),
    )
    .await;
    let created = manager::create_process(&engine, &workflow, json!({}), json!({}))
        .await
        .unwrap();
    let outcome = manager::run_process(&engine, &created.process_id, json!({}), json!({}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.status, ProcessStatus::Finished);

    let announced = announced.lock().unwrap();
    assert_eq!(announced.len(), 1);
    assert_eq!(announced[0]["_process_id"], json!(created.process_id));
    assert_eq!(announced[0]["type"], "notify");

    // Finishing closes the activity manager it never waited for.
    let ams = manager::list_activity_managers(&engine, &created.process_id)
        .await
        .unwrap();
    assert_eq!(ams[0].status, ActivityStatus::Completed);
}

#[tokio::test]
async fn test_state_notifier_and_events() {
    let seen: Arc<Mutex<Vec<(Value, Value)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let db = tideflow_core::Database::open_in_memory().unwrap();
    let engine: tideflow_core::Engine = Arc::new(
        EngineInner::new(db, EngineConfig::default()).with_state_notifier(Arc::new(
            move |state: &Value, actor: &Value| sink.lock().unwrap().push((state.clone(), actor.clone())),
        )),
    );
    let mut events = engine.event_bus.subscribe();

    let workflow = register(&engine, "linear", linear_blueprint()).await;
    let actor = json!({ "id": "u1" });
    let created = manager::create_process(&engine, &workflow, actor.clone(), json!({}))
        .await
        .unwrap();
    manager::run_process(&engine, &created.process_id, actor.clone(), json!({}))
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    assert!(seen.iter().all(|(state, _)| state["workflow_name"] == "linear"));
    assert_eq!(seen[3].0["status"], "FINISHED");
    assert_eq!(seen[3].1, actor);

    let mut types = Vec::new();
    while let Ok(event) = events.try_recv() {
        types.push(event.event_type);
    }
    assert!(types.contains(&EngineEventType::ProcessCreated));
    assert!(types.contains(&EngineEventType::LockAcquired));
    assert!(types.contains(&EngineEventType::TransactionCommit));
    assert!(types.contains(&EngineEventType::ProcessFinished));
    assert!(!types.contains(&EngineEventType::TransactionRollback));
}

#[tokio::test]
async fn test_non_representable_result_is_an_error() {
    let engine = test_engine();
    let workflow = register(
        &engine,
        "scalar",
        json!({
            "lanes": [open_lane()],
            "nodes": [
                { "id": "1", "type": "Start", "next": "2", "lane_id": "any" },
                {
                    "id": "2", "type": "SystemTask", "next": "3", "lane_id": "any",
                    "parameters": { "input": "just a string" }
                },
                { "id": "3", "type": "Finish", "next": null, "lane_id": "any" }
            ]
        }),
    )
    .await;
    let created = manager::create_process(&engine, &workflow, json!({}), json!({}))
        .await
        .unwrap();
    let outcome = manager::run_process(&engine, &created.process_id, json!({}), json!({}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.status, ProcessStatus::Error);
    let state = outcome.state.unwrap();
    assert_eq!(state.error.as_deref(), Some("Node Result is invalid"));
    assert_eq!(state.result, Some(json!({})));
}

#[tokio::test]
async fn test_result_schema_violation() {
    let engine = test_engine();
    let blueprint = |data: Value| {
        json!({
            "lanes": [open_lane()],
            "nodes": [
                { "id": "1", "type": "Start", "next": "2", "lane_id": "any" },
                {
                    "id": "2", "type": "SystemTask", "next": "3", "lane_id": "any",
                    "parameters": { "input": { "data": data } },
                    "result_schema": { "type": "object", "required": ["total"] }
                },
                { "id": "3", "type": "Finish", "next": null, "lane_id": "any" }
            ]
        })
    };
    let bad = register(&engine, "bad", blueprint(json!({ "count": 1 }))).await;
    let good = register(&engine, "good", blueprint(json!({ "total": 1 }))).await;

    let created = manager::create_process(&engine, &bad, json!({}), json!({}))
        .await
        .unwrap();
    let outcome = manager::run_process(&engine, &created.process_id, json!({}), json!({}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.status, ProcessStatus::Error);
    assert!(outcome.error.unwrap().contains("total"));

    let created = manager::create_process(&engine, &good, json!({}), json!({}))
        .await
        .unwrap();
    let outcome = manager::run_process(&engine, &created.process_id, json!({}), json!({}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.status, ProcessStatus::Finished);
}

fn parent_blueprint() -> Value {
    json!({
        "lanes": [open_lane()],
        "nodes": [
            { "id": "1", "type": "Start", "next": "2", "lane_id": "any" },
            {
                "id": "2", "type": "SubProcess", "name": "bill", "next": "3", "lane_id": "any",
                "parameters": {
                    "workflow_name": "billing",
                    "actor_data": { "id": { "$ref": "actor_data.id" } },
                    "input": { "amount": { "$ref": "bag.amount" } }
                }
            },
            { "id": "3", "type": "Finish", "next": null, "lane_id": "any" }
        ]
    })
}

fn child_blueprint() -> Value {
    json!({
        "lanes": [open_lane()],
        "nodes": [
            { "id": "1", "type": "Start", "next": "2", "lane_id": "any" },
            {
                "id": "2", "type": "Finish", "next": null, "lane_id": "any",
                "parameters": { "input": { "total": { "$ref": "bag.amount" } } }
            }
        ]
    })
}

#[tokio::test]
async fn test_sub_process_delegation_round_trip() {
    let engine = test_engine();
    let parent_wf = register(&engine, "order", parent_blueprint()).await;
    register(&engine, "billing", child_blueprint()).await;

    let actor = json!({ "id": "u1" });
    let parent = manager::create_process(&engine, &parent_wf, actor.clone(), json!({ "amount": 10 }))
        .await
        .unwrap();
    let delegated = manager::run_process(&engine, &parent.process_id, actor, json!({}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delegated.status, ProcessStatus::Delegated);
    assert_eq!(delegated.state.as_ref().unwrap().step_number, 3);

    // The child exists but only starts once the outbox is drained.
    let children = match manager::list_processes(&engine, json!({ "workflow_name": "billing" }))
        .await
        .unwrap()
    {
        ListOutcome::Processes(p) => p,
        ListOutcome::Invalid { error } => panic!("{}", error),
    };
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].current_status, Some(ProcessStatus::Unstarted));
    let child_id = children[0].id.clone();

    let handled = process_outbox(&engine).await;
    assert_eq!(handled, 2);

    let child_states = history(&engine, &child_id).await;
    assert_eq!(child_states[0].bag["parent_process_data"]["id"], json!(parent.process_id));
    assert_eq!(child_states[0].bag["parent_process_data"]["expected_step_number"], 3);
    assert_eq!(child_states[0].actor_data, Some(json!({ "id": "u1" })));
    assert_eq!(child_states.last().unwrap().status, ProcessStatus::Finished);

    let parent_states = history(&engine, &parent.process_id).await;
    assert_gapless(&parent_states);
    assert_eq!(parent_states.len(), 5);
    let continued = &parent_states[3];
    assert_eq!(continued.status, ProcessStatus::Running);
    let merged = continued.result.as_ref().unwrap();
    assert_eq!(merged["amount"], 10);
    assert_eq!(merged["data"]["total"], 10);
    assert_eq!(merged["status"], "FINISHED");
    assert_eq!(merged["sub_process_id"], json!(child_id));
    assert_eq!(parent_states[4].status, ProcessStatus::Finished);

    // A late duplicate of the child's notification is dropped.
    let continued = manager::continue_process(&engine, &parent.process_id, json!({}), 4)
        .await
        .unwrap();
    assert!(!continued);
    assert_eq!(history(&engine, &parent.process_id).await.len(), 5);
}

#[tokio::test]
async fn test_delegation_to_missing_workflow_rolls_back() {
    let engine = test_engine();
    let parent_wf = register(&engine, "order", parent_blueprint()).await;
    let parent = manager::create_process(&engine, &parent_wf, json!({ "id": "u1" }), json!({}))
        .await
        .unwrap();
    let outcome = manager::run_process(&engine, &parent.process_id, json!({ "id": "u1" }), json!({}))
        .await
        .unwrap()
        .unwrap();

    // The delegating step never committed; the process stays where it was.
    assert_eq!(outcome.status, ProcessStatus::Running);
    let states = history(&engine, &parent.process_id).await;
    assert_eq!(states.len(), 2);
    assert_eq!(process_outbox(&engine).await, 0);
}

#[tokio::test]
async fn test_start_process_node_runs_child_independently() {
    let engine = test_engine();
    register(&engine, "billing", child_blueprint()).await;
    let launcher = register(
        &engine,
        "launcher",
        json!({
            "lanes": [open_lane()],
            "nodes": [
                { "id": "1", "type": "Start", "next": "2", "lane_id": "any" },
                {
                    "id": "2", "type": "StartProcess", "next": "3", "lane_id": "any",
                    "parameters": {
                        "workflow_name": { "$ref": "bag.child" },
                        "actor_data": { "id": "system" },
                        "input": { "amount": 5 }
                    }
                },
                { "id": "3", "type": "Finish", "next": null, "lane_id": "any" }
            ]
        }),
    )
    .await;

    let created = manager::create_process(&engine, &launcher, json!({}), json!({ "child": "billing" }))
        .await
        .unwrap();
    let outcome = manager::run_process(&engine, &created.process_id, json!({}), json!({}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.status, ProcessStatus::Finished);

    let states = history(&engine, &created.process_id).await;
    let child_id = states[2].result.as_ref().unwrap()["process_id"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(!child_id.is_empty());

    assert_eq!(process_outbox(&engine).await, 1);
    let child = manager::fetch_process(&engine, &child_id).await.unwrap().unwrap();
    assert_eq!(child.current_status, Some(ProcessStatus::Finished));
    let child_states = history(&engine, &child_id).await;
    assert_eq!(
        child_states[0].actor_data.as_ref().unwrap()["parentProcessData"]["id"],
        json!(created.process_id)
    );

    let missing = manager::create_process(&engine, &launcher, json!({}), json!({ "child": "nope" }))
        .await
        .unwrap();
    let outcome = manager::run_process(&engine, &missing.process_id, json!({}), json!({}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.status, ProcessStatus::Error);
    assert_eq!(
        outcome.state.unwrap().result.unwrap()["error"],
        "unable to create process"
    );
}

#[tokio::test]
async fn test_set_state_parks_process_in_pending() {
    let engine = test_engine();
    let workflow = register(&engine, "approval", user_task_blueprint(json!({}))).await;
    let created = manager::create_process(&engine, &workflow, json!({}), json!({}))
        .await
        .unwrap();
    manager::run_process(&engine, &created.process_id, json!({}), json!({}))
        .await
        .unwrap();

    let parked = manager::set_process_state(
        &engine,
        &created.process_id,
        json!({ "override": true }),
        json!({ "note": "manual" }),
        Some("3".to_string()),
    )
    .await
    .unwrap();
    assert_eq!(parked.status, ProcessStatus::Pending);
    let state = parked.state.unwrap();
    assert_eq!(state.step_number, 4);
    assert_eq!(state.bag, json!({ "override": true }));
    assert_eq!(state.next_node_id.as_deref(), Some("3"));

    let linear = register(&engine, "linear", linear_blueprint()).await;
    let done = manager::create_process(&engine, &linear, json!({}), json!({}))
        .await
        .unwrap();
    manager::run_process(&engine, &done.process_id, json!({}), json!({}))
        .await
        .unwrap();
    let err = manager::set_process_state(&engine, &done.process_id, json!({}), json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, tideflow_core::EngineError::InvalidStatus(_)));
}

#[tokio::test]
async fn test_invalid_filters_are_reported_as_data() {
    let engine = test_engine();
    let outcome = manager::list_processes(&engine, json!({ "process_id": "not-a-uuid" }))
        .await
        .unwrap();
    assert!(matches!(outcome, ListOutcome::Invalid { .. }));
}
