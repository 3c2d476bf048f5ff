#![allow(clippy::unwrap_used, clippy::expect_used)]

use cadence_core::*;

// ---------------------------------------------------------------------------
// 1. Error conversions from std and serde
// ---------------------------------------------------------------------------

#[test]
fn io_and_json_errors_convert() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
    let err: CadenceError = io.into();
    assert!(matches!(err, CadenceError::Io(_)));
    assert!(err.to_string().contains("read-only"));

    let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let err: CadenceError = json_err.into();
    assert!(matches!(err, CadenceError::Json(_)));
}

#[test]
fn question_mark_propagates_scheduling_error() {
    fn layer() -> Result<(), SchedulingError> {
        Err(SchedulingError::CircularDependency(
            "Circular dependency detected among tasks: a".into(),
        ))
    }
    fn run() -> CadenceResult<()> {
        layer()?;
        Ok(())
    }

    let err = run().unwrap_err();
    match err {
        CadenceError::Scheduling(inner) => assert_eq!(inner.key(), "circular_dependency"),
        other => panic!("unexpected error: {other}"),
    }
}

// ---------------------------------------------------------------------------
// 2. Event bus fan-out to several subscribers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_subscriber_sees_events_in_order() {
    let bus = BroadcastEventBus::new(16);
    let mut first = bus.subscribe();
    let mut second = bus.subscribe();

    bus.publish("workflow.started", serde_json::json!({"n": 1}))
        .await
        .unwrap();
    bus.publish("workflow.completed", serde_json::json!({"n": 2}))
        .await
        .unwrap();

    for rx in [&mut first, &mut second] {
        assert_eq!(rx.recv().await.unwrap().topic, "workflow.started");
        assert_eq!(rx.recv().await.unwrap().topic, "workflow.completed");
    }
}

#[tokio::test]
async fn event_bus_usable_as_trait_object() {
    let bus: std::sync::Arc<dyn EventBus> = std::sync::Arc::new(BroadcastEventBus::new(4));
    bus.publish("workflow.failed", serde_json::Value::Null)
        .await
        .unwrap();
}
