//! Controller behaviour over real node tasks.

mod common;

use std::time::Duration;

use common::{passthrough, Harness};
use conflux_flow::{ConfigError, HealthType, NodePhase};
use conflux_testing::{COUNTER, FAILING, PASSTHROUGH, STUCK, SUM};
use conflux_value::{Block, Expr, Value};

#[tokio::test]
async fn test_chain_evaluates_in_dependency_order() {
    let h = Harness::new();

    // Declared consumer first.
    let blocks = vec![
        passthrough("c", Expr::reference("testing.passthrough.b.output")),
        passthrough("b", Expr::reference("testing.passthrough.a.output")),
        passthrough("a", Expr::literal(1)),
    ];
    let summary = h.controller.reload(blocks).await.unwrap();
    assert_eq!(summary.generation, 1);
    assert_eq!(summary.added.len(), 3);

    assert_eq!(
        h.journal.matching("construct"),
        vec![
            "construct testing.passthrough.a",
            "construct testing.passthrough.b",
            "construct testing.passthrough.c",
        ]
    );
    assert_eq!(h.output("testing.passthrough.c"), Some(Value::from(1)));

    let snapshot = h.snapshot();
    let order: Vec<String> = snapshot.nodes.iter().map(|n| n.id.to_string()).collect();
    assert_eq!(
        order,
        vec![
            "testing.passthrough.a",
            "testing.passthrough.b",
            "testing.passthrough.c"
        ]
    );
    let c = snapshot.node("testing.passthrough.c").unwrap();
    assert_eq!(c.dependencies.len(), 1);
    assert_eq!(c.dependencies[0].to_string(), "testing.passthrough.b");

    h.stop().await;
}

#[tokio::test]
async fn test_exports_propagate_through_run_loop() {
    let h = Harness::new();
    let blocks = vec![
        Block::new(COUNTER, Some("c")).attr("interval_ms", Expr::literal(5)),
        passthrough("p", Expr::reference("testing.counter.c.count")),
    ];
    h.controller.reload(blocks).await.unwrap();

    h.wait_for("counter to reach the passthrough", || {
        h.output("testing.passthrough.p")
            .and_then(|v| v.as_f64())
            .is_some_and(|n| n >= 3.0)
    })
    .await;

    // Component-reported health replaces the default run health.
    let counter = h.snapshot();
    let counter = counter.node("testing.counter.c").unwrap();
    assert_eq!(counter.health.health, HealthType::Healthy);
    assert!(counter.health.message.starts_with("counted to"));

    h.stop().await;
}

#[tokio::test]
async fn test_cycle_rejected_and_live_graph_untouched() {
    let h = Harness::new();
    h.controller
        .reload(vec![passthrough("a", Expr::literal(1))])
        .await
        .unwrap();
    h.wait_for("a to run", || h.journal.count("run testing.passthrough.a") == 1)
        .await;
    let events_before = h.journal.events();

    let errors = h
        .controller
        .reload(vec![
            passthrough("a", Expr::reference("testing.passthrough.b.output")),
            passthrough("b", Expr::reference("testing.passthrough.a.output")),
        ])
        .await
        .unwrap_err();

    let cycle = errors
        .iter()
        .find_map(|e| match e {
            ConfigError::Cycle { nodes } => Some(nodes.clone()),
            _ => None,
        })
        .expect("cycle error");
    assert_eq!(cycle, vec!["testing.passthrough.a", "testing.passthrough.b"]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.controller.generation(), 1);
    assert_eq!(h.journal.events(), events_before);

    let snapshot = h.snapshot();
    let a = snapshot.node("testing.passthrough.a").unwrap();
    assert_eq!(a.health.health, HealthType::Healthy);
    assert_eq!(a.phase, NodePhase::Running);
    assert!(snapshot.node("testing.passthrough.b").is_none());

    h.stop().await;
}

#[tokio::test]
async fn test_rapid_updates_coalesce_to_latest() {
    let h = Harness::new();
    let slow = |input: i64| {
        Block::new(PASSTHROUGH, Some("x"))
            .attr("input", Expr::literal(input))
            .attr("update_delay_ms", Expr::literal(200))
    };

    h.controller.reload(vec![slow(1)]).await.unwrap();
    h.controller.reload(vec![slow(2)]).await.unwrap();
    h.wait_for("first update to start", || {
        h.journal.count("update testing.passthrough.x 2") == 1
    })
    .await;

    // Both land while the first update is still sleeping.
    h.controller.reload(vec![slow(3)]).await.unwrap();
    h.controller.reload(vec![slow(4)]).await.unwrap();

    h.wait_for("latest update to finish", || {
        h.journal.count("updated testing.passthrough.x 4") == 1
    })
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(
        h.journal.matching("update testing.passthrough.x"),
        vec![
            "update testing.passthrough.x 2",
            "update testing.passthrough.x 4"
        ]
    );
    assert_eq!(h.output("testing.passthrough.x"), Some(Value::from(4)));

    h.stop().await;
}

#[tokio::test]
async fn test_removed_node_stops_and_dependent_degrades() {
    let h = Harness::new();
    h.controller
        .reload(vec![
            passthrough("a", Expr::literal(1)),
            passthrough("b", Expr::reference("testing.passthrough.a.output")),
        ])
        .await
        .unwrap();
    assert_eq!(h.output("testing.passthrough.b"), Some(Value::from(1)));

    let summary = h
        .controller
        .reload(vec![passthrough(
            "b",
            Expr::reference("testing.passthrough.a.output"),
        )])
        .await
        .unwrap();
    assert_eq!(summary.removed.len(), 1);
    assert_eq!(summary.removed[0].to_string(), "testing.passthrough.a");
    assert_eq!(summary.updated.len(), 1);

    h.wait_for("a to stop", || h.journal.count("stop testing.passthrough.a") == 1)
        .await;

    let snapshot = h.snapshot();
    assert!(snapshot.node("testing.passthrough.a").is_none());
    let b = snapshot.node("testing.passthrough.b").unwrap();
    assert_eq!(b.health.health, HealthType::Degraded);
    assert_eq!(b.health.message, "dependency testing.passthrough.a was removed");
    assert_eq!(b.exports.get("output"), Some(&Value::from(1)));
    assert_eq!(h.journal.count("construct testing.passthrough.b"), 1);

    h.stop().await;
}

#[tokio::test]
async fn test_failed_update_keeps_exports_and_degrades_dependents() {
    let h = Harness::new();
    let source = |input: i64, fail: bool| {
        Block::new(PASSTHROUGH, Some("a"))
            .attr("input", Expr::literal(input))
            .attr("fail_update", Expr::literal(fail))
    };

    h.controller
        .reload(vec![
            source(1, false),
            passthrough("b", Expr::reference("testing.passthrough.a.output")),
        ])
        .await
        .unwrap();
    h.controller
        .reload(vec![
            source(2, true),
            passthrough("b", Expr::reference("testing.passthrough.a.output")),
        ])
        .await
        .unwrap();

    h.wait_for("a to turn unhealthy", || {
        h.health("testing.passthrough.a") == Some(HealthType::Unhealthy)
    })
    .await;
    h.wait_for("b to degrade", || {
        h.health("testing.passthrough.b") == Some(HealthType::Degraded)
    })
    .await;

    assert_eq!(h.output("testing.passthrough.a"), Some(Value::from(1)));
    assert_eq!(h.output("testing.passthrough.b"), Some(Value::from(1)));
    assert_eq!(
        h.snapshot().node("testing.passthrough.a").unwrap().phase,
        NodePhase::Running
    );

    h.stop().await;
}

#[tokio::test]
async fn test_run_error_exits_node() {
    let h = Harness::new();
    h.controller
        .reload(vec![Block::new(FAILING, Some("f"))])
        .await
        .unwrap();

    h.wait_for("f to exit", || {
        h.health("testing.failing.f") == Some(HealthType::Exited)
    })
    .await;

    let snapshot = h.snapshot();
    let f = snapshot.node("testing.failing.f").unwrap();
    assert_eq!(f.phase, NodePhase::Exited);
    assert_eq!(f.health.message, "component shut down with error: boom");

    let report = h.stop().await;
    assert_eq!(report.stopped, 1);
}

#[tokio::test]
async fn test_config_errors_are_aggregated() {
    let h = Harness::new();
    let errors = h
        .controller
        .reload(vec![
            Block::new("unknown.kind", Some("x")),
            passthrough("a", Expr::reference("missing.node.value")),
            passthrough("a", Expr::literal(1)),
        ])
        .await
        .unwrap_err();

    assert_eq!(errors.len(), 3, "{errors}");
    assert!(errors
        .iter()
        .any(|e| matches!(e, ConfigError::UnknownKind { kind } if kind == "unknown.kind")));
    assert!(errors
        .iter()
        .any(|e| matches!(e, ConfigError::DuplicateNode { id } if id == "testing.passthrough.a")));
    assert!(errors.iter().any(|e| matches!(
        e,
        ConfigError::UnresolvedReference { reference, .. } if reference == "missing.node.value"
    )));
    assert_eq!(h.controller.generation(), 0);

    h.stop().await;
}

#[tokio::test]
async fn test_static_attribute_checks() {
    let h = Harness::new();
    let errors = h
        .controller
        .reload(vec![Block::new(PASSTHROUGH, Some("a"))
            .attr("fail_update", Expr::literal("yes"))
            .attr("bogus", Expr::literal(1))])
        .await
        .unwrap_err();

    let errors: Vec<ConfigError> = errors.into_iter().collect();
    assert_eq!(
        errors,
        vec![
            ConfigError::TypeMismatch {
                id: "testing.passthrough.a".to_string(),
                attribute: "fail_update".to_string(),
                expected: "bool",
                actual: "string",
            },
            ConfigError::UnknownAttribute {
                id: "testing.passthrough.a".to_string(),
                attribute: "bogus".to_string(),
            },
        ]
    );

    h.stop().await;
}

#[tokio::test]
async fn test_shutdown_stops_every_task() {
    let h = Harness::new();
    h.controller
        .reload(vec![
            passthrough("a", Expr::literal(1)),
            passthrough("b", Expr::literal(2)),
        ])
        .await
        .unwrap();
    h.wait_for("both to run", || h.journal.count("run ") == 2).await;

    let journal = h.journal.clone();
    let report = h.stop().await;
    assert_eq!(report.stopped, 2);
    assert!(report.abandoned.is_empty());
    assert_eq!(journal.count("stop "), 2);
}

#[tokio::test]
async fn test_evaluation_error_isolates_node() {
    let h = Harness::new();
    let summary = h
        .controller
        .reload(vec![
            passthrough("a", Expr::literal(1)),
            // a's output is a number, so walking into it fails.
            passthrough("b", Expr::reference("testing.passthrough.a.output.deep")),
            passthrough("c", Expr::reference("testing.passthrough.b.output")),
            passthrough("d", Expr::literal(2)),
        ])
        .await
        .unwrap();

    let b_id = "testing.passthrough.b";
    assert_eq!(
        summary.unhealthy.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        vec![b_id]
    );

    let snapshot = h.snapshot();
    let b = snapshot.node(b_id).unwrap();
    assert_eq!(b.health.health, HealthType::Unhealthy);
    assert!(
        b.health.message.starts_with("failed to evaluate"),
        "{}",
        b.health.message
    );
    assert!(b.health.message.contains("expected object"), "{}", b.health.message);
    assert_eq!(h.journal.count("construct testing.passthrough.b"), 0);

    let c = snapshot.node("testing.passthrough.c").unwrap();
    assert_eq!(c.health.health, HealthType::Degraded);
    assert_eq!(c.health.message, "dependency testing.passthrough.b is unhealthy");

    h.wait_for("d to run", || {
        h.health("testing.passthrough.d") == Some(HealthType::Healthy)
    })
    .await;
    assert_eq!(h.output("testing.passthrough.d"), Some(Value::from(2)));
    assert_eq!(h.output("testing.passthrough.a"), Some(Value::from(1)));

    h.stop().await;
}

#[tokio::test]
async fn test_construction_failure_is_retried() {
    let h = Harness::new();
    let blocks = |a: i64, second: Expr| {
        vec![
            passthrough("a", Expr::literal(a)),
            passthrough("d", Expr::literal(2)),
            Block::new(SUM, Some("total")).attr(
                "inputs",
                Expr::Array(vec![Expr::reference("testing.passthrough.a.output"), second]),
            ),
        ]
    };

    h.controller
        .reload(blocks(1, Expr::literal("two")))
        .await
        .unwrap();
    let snapshot = h.snapshot();
    let total = snapshot.node("testing.sum.total").unwrap();
    assert_eq!(total.health.health, HealthType::Unhealthy);
    assert!(total.health.message.contains("inputs[1]"), "{}", total.health.message);
    assert_eq!(total.phase, NodePhase::Created);

    // The next evaluation constructs it.
    h.controller
        .reload(blocks(1, Expr::reference("testing.passthrough.d.output")))
        .await
        .unwrap();
    assert_eq!(
        h.exports("testing.sum.total"),
        Some(Value::from_pairs([("total", Value::from(3))]))
    );
    assert_eq!(h.journal.count("construct testing.sum.total"), 2);

    h.controller
        .reload(blocks(5, Expr::reference("testing.passthrough.d.output")))
        .await
        .unwrap();
    h.wait_for("total to follow a", || {
        h.exports("testing.sum.total") == Some(Value::from_pairs([("total", Value::from(7))]))
    })
    .await;
    assert_eq!(h.health("testing.sum.total"), Some(HealthType::Healthy));

    h.stop().await;
}

#[tokio::test]
async fn test_shutdown_abandons_unresponsive_tasks() {
    let h = Harness::new();
    h.controller
        .reload(vec![
            Block::new(STUCK, Some("s")),
            passthrough("a", Expr::literal(1)),
        ])
        .await
        .unwrap();
    h.wait_for("both to run", || h.journal.count("run ") == 2).await;

    let report = h.stop_within(Duration::from_millis(100)).await;
    assert_eq!(report.stopped, 1);
    assert_eq!(
        report
            .abandoned
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>(),
        vec!["testing.stuck.s"]
    );
}

#[tokio::test]
async fn test_shutdown_waits_for_removed_nodes() {
    let h = Harness::new();
    h.controller
        .reload(vec![Block::new(STUCK, Some("s"))])
        .await
        .unwrap();
    h.wait_for("s to run", || h.journal.count("run testing.stuck.s") == 1)
        .await;

    let summary = h.controller.reload(Vec::new()).await.unwrap();
    assert_eq!(summary.removed.len(), 1);
    assert!(h.snapshot().nodes.is_empty());

    let report = h.stop_within(Duration::from_millis(100)).await;
    assert_eq!(report.stopped, 0);
    assert_eq!(
        report
            .abandoned
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>(),
        vec!["testing.stuck.s"]
    );
}
