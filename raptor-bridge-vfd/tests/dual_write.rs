//! Paired wheel writes against fake drives.

mod common;

use std::time::Duration;

use common::{FakeConnector, OUTER_RATIO, WHEEL_LIMITS, coordinator};
use raptor_bridge_vfd::coordinator::{BOTH_FAILED_WARNING, DualWriteOutcome};
use raptor_bridge_vfd::error::DriveError;
use raptor_bridge_vfd::link::DriveRole;
use raptor_bridge_vfd::registers::{DIRECTION, SPEED_SETPOINT};
use raptor_bridge_vfd::state::{ControlState, ControlStore, Direction};
use tokio_test::{assert_err, assert_ok};

fn store() -> ControlStore {
    ControlStore::new(ControlState::initial(600, 420))
}

#[tokio::test]
async fn test_speed_clamp_and_ratio() {
    let connector = FakeConnector::new();
    let wheels = coordinator(&connector, false);
    let store = store();

    for requested in [0u16, 1, 99, 100, 101, 333, 600, 999, 1499, 1500, 1501, 4000, u16::MAX] {
        let outcome = assert_ok!(wheels.set_speed(requested, &store).await);

        let clamped = requested.clamp(WHEEL_LIMITS.min, WHEEL_LIMITS.max);
        let expected_outer = (f64::from(clamped) * OUTER_RATIO).round() as u16;

        assert_eq!(outcome.inner_speed, clamped, "requested {}", requested);
        assert_eq!(outcome.outer_speed, expected_outer, "requested {}", requested);
        assert!(outcome.writes.is_both_ok());
        assert_eq!(store.current().wheel_speed, clamped);
    }

    for write in connector.writes() {
        assert_eq!(write.param, SPEED_SETPOINT);
        match write.role {
            DriveRole::InnerWheel => assert!(WHEEL_LIMITS.contains(write.value)),
            DriveRole::OuterWheel => assert!(write.value <= WHEEL_LIMITS.max),
            DriveRole::Main => panic!("speed write reached the main drive"),
        }
    }
}

#[tokio::test]
async fn test_speed_recorded_whatever_the_outcome() {
    for failing in [
        vec![],
        vec![DriveRole::InnerWheel],
        vec![DriveRole::OuterWheel],
        vec![DriveRole::InnerWheel, DriveRole::OuterWheel],
    ] {
        let connector = FakeConnector::new();
        for role in &failing {
            connector.fail_writes(*role);
        }
        let wheels = coordinator(&connector, false);
        let store = store();

        let outcome = wheels.set_speed(2000, &store).await.unwrap();

        assert_eq!(store.current().wheel_speed, 1500, "failing {:?}", failing);
        assert_eq!(outcome.writes.is_both_ok(), failing.is_empty());
        assert_eq!(connector.writes().len(), 2);
    }
}

#[tokio::test]
async fn test_outer_wheel_gets_ratio_speed() {
    let connector = FakeConnector::new();
    let wheels = coordinator(&connector, false);

    wheels.set_speed(1200, &store()).await.unwrap();

    assert_eq!(connector.writes_to(DriveRole::InnerWheel)[0].value, 1200);
    // 1200 * 0.9167 = 1100.04
    assert_eq!(connector.writes_to(DriveRole::OuterWheel)[0].value, 1100);
}

#[tokio::test]
async fn test_both_wheels_written_concurrently() {
    // Each write blocks until the other one has started.
    let connector = FakeConnector::with_rendezvous(2);
    let wheels = coordinator(&connector, true);
    let store = store();

    tokio::time::timeout(Duration::from_secs(5), wheels.set_speed(800, &store))
        .await
        .expect("speed writes were serialized")
        .unwrap();

    tokio::time::timeout(
        Duration::from_secs(5),
        wheels.set_direction(Direction::Reverse, &store),
    )
    .await
    .expect("direction writes were serialized")
    .unwrap();
}

#[tokio::test]
async fn test_direction_both_ok() {
    let connector = FakeConnector::new();
    let wheels = coordinator(&connector, true);
    let store = store();
    store.update(|s| s.mismatch_warning = Some("stale".to_string()));

    let outcome = wheels.set_direction(Direction::Reverse, &store).await.unwrap();

    assert!(outcome.is_both_ok());
    let state = store.current();
    assert_eq!(state.direction, Direction::Reverse);
    assert_eq!(state.warning_text(), "");

    let writes = connector.writes();
    assert_eq!(writes.len(), 2);
    assert!(writes.iter().all(|w| w.param == DIRECTION && w.value == 1));
}

#[tokio::test]
async fn test_direction_inner_fails() {
    let connector = FakeConnector::new();
    connector.fail_writes(DriveRole::InnerWheel);
    let wheels = coordinator(&connector, true);
    let store = store();

    let outcome = wheels.set_direction(Direction::Reverse, &store).await.unwrap();

    assert!(matches!(outcome, DualWriteOutcome::InnerFailed(_)));
    let state = store.current();
    assert_eq!(state.direction, Direction::Reverse);
    assert!(state.warning_text().contains("Inner wheel"));
    assert!(state.warning_text().contains("192.168.1.153"));
    assert!(!state.warning_text().contains("Outer wheel"));
}

#[tokio::test]
async fn test_direction_outer_fails() {
    let connector = FakeConnector::new();
    connector.fail_writes(DriveRole::OuterWheel);
    let wheels = coordinator(&connector, true);
    let store = store();

    let outcome = wheels.set_direction(Direction::Reverse, &store).await.unwrap();

    assert!(matches!(outcome, DualWriteOutcome::OuterFailed(_)));
    let state = store.current();
    assert_eq!(state.direction, Direction::Reverse);
    assert!(state.warning_text().contains("Outer wheel"));
}

#[tokio::test]
async fn test_direction_both_fail_keeps_direction() {
    let connector = FakeConnector::new();
    connector.fail_writes(DriveRole::InnerWheel);
    connector.fail_writes(DriveRole::OuterWheel);
    let wheels = coordinator(&connector, true);
    let store = store();

    let outcome = wheels.set_direction(Direction::Reverse, &store).await.unwrap();

    assert!(matches!(outcome, DualWriteOutcome::BothFailed { .. }));
    let state = store.current();
    assert_eq!(state.direction, Direction::Forward);
    assert_eq!(state.warning_text(), BOTH_FAILED_WARNING);
}

#[tokio::test]
async fn test_symmetric_write_clears_mismatch() {
    let connector = FakeConnector::new();
    connector.fail_writes(DriveRole::OuterWheel);
    let wheels = coordinator(&connector, true);
    let store = store();

    wheels.set_direction(Direction::Reverse, &store).await.unwrap();
    assert!(!store.current().warning_text().is_empty());

    connector.heal_writes();
    wheels.set_direction(Direction::Forward, &store).await.unwrap();

    let state = store.current();
    assert_eq!(state.direction, Direction::Forward);
    assert!(state.mismatch_warning.is_none());
}

#[tokio::test]
async fn test_direction_refused_when_disabled() {
    let connector = FakeConnector::new();
    let wheels = coordinator(&connector, false);
    let store = store();

    let err = assert_err!(wheels.set_direction(Direction::Reverse, &store).await);

    assert!(matches!(err, DriveError::WriteRefused { .. }));
    assert!(connector.writes().is_empty());
    assert_eq!(store.current(), ControlState::initial(600, 420));
}
