use std::fs;
use std::sync::Arc;
use std::thread;
use switchyard::core::config::GovernanceConfig;
use switchyard::plugins::governance::{
    ALERT_MESSAGE, FailureReport, GovernanceEventKind, GovernanceMonitor, GovernanceState,
    load_event_log,
};
use tempfile::tempdir;

fn report(key: &str) -> FailureReport {
    FailureReport {
        key: key.to_string(),
        path: format!("./{}", key),
        operation: "write.document".to_string(),
        error: "disk full".to_string(),
    }
}

#[test]
fn alert_fires_once_streak_reaches_threshold() {
    let tmp = tempdir().expect("tempdir");
    let log = tmp.path().join("governance.events.jsonl");
    let monitor = GovernanceMonitor::new(3, &log, 32).expect("monitor");

    let results: Vec<bool> = (0..5).map(|i| monitor.record_failure(report(&format!("k{}", i)))).collect();
    assert_eq!(results, vec![false, false, true, true, true]);
    assert_eq!(monitor.failure_streak(), 5);
    assert_eq!(monitor.state(), GovernanceState::Alerting);

    let events = monitor.recent_events(100);
    // Five failures plus one alert for each of the last three.
    assert_eq!(events.len(), 8);
    let alert = events.iter().find(|e| e.is_alert()).expect("alert event");
    assert_eq!(alert.streak, 3);
    match &alert.kind {
        GovernanceEventKind::GovernanceAlert { message, threshold } => {
            assert_eq!(message, ALERT_MESSAGE);
            assert_eq!(*threshold, 3);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn success_resets_streak_and_is_idempotent() {
    let tmp = tempdir().expect("tempdir");
    let monitor = GovernanceMonitor::new(2, &tmp.path().join("g.jsonl"), 8).expect("monitor");

    monitor.record_success();
    assert_eq!(monitor.failure_streak(), 0);

    monitor.record_failure(report("a"));
    monitor.record_failure(report("b"));
    assert_eq!(monitor.state(), GovernanceState::Alerting);
    monitor.record_success();
    assert_eq!(monitor.failure_streak(), 0);
    assert_eq!(monitor.state(), GovernanceState::Normal);

    // The streak starts over after a success.
    assert!(!monitor.record_failure(report("c")));
}

#[test]
fn threshold_of_one_alerts_on_first_failure() {
    let tmp = tempdir().expect("tempdir");
    let monitor = GovernanceMonitor::new(1, &tmp.path().join("g.jsonl"), 8).expect("monitor");
    assert!(monitor.record_failure(report("a")));
}

#[test]
fn zero_threshold_is_rejected() {
    let tmp = tempdir().expect("tempdir");
    assert!(GovernanceMonitor::new(0, &tmp.path().join("g.jsonl"), 8).is_err());
}

#[test]
fn events_are_appended_to_the_durable_log() {
    let tmp = tempdir().expect("tempdir");
    let log = tmp.path().join("logs").join("governance.events.jsonl");
    let monitor = GovernanceMonitor::new(2, &log, 8).expect("monitor");

    monitor.record_failure(report("a"));
    monitor.record_failure(report("b"));

    let raw = fs::read_to_string(&log).expect("log exists");
    let lines: Vec<serde_json::Value> = raw
        .lines()
        .map(|l| serde_json::from_str(l).expect("valid json line"))
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["type"], "memory_bus_failure");
    assert_eq!(lines[0]["streak"], 1);
    assert_eq!(lines[0]["key"], "a");
    assert_eq!(lines[0]["path"], "./a");
    assert_eq!(lines[2]["type"], "governance_alert");
    assert!(lines[2]["ts"].as_str().is_some_and(|ts| ts.ends_with('Z')));
    assert!(lines[2]["event_id"].as_str().is_some_and(|id| id.len() == 26));

    // A second monitor on the same log appends rather than truncating.
    let again = GovernanceMonitor::new(2, &log, 8).expect("monitor");
    again.record_failure(report("c"));
    assert_eq!(fs::read_to_string(&log).expect("log").lines().count(), 4);
}

#[test]
fn load_event_log_tails_and_skips_garbage() {
    let tmp = tempdir().expect("tempdir");
    let log = tmp.path().join("g.jsonl");
    let monitor = GovernanceMonitor::new(10, &log, 8).expect("monitor");
    monitor.record_failure(report("a"));
    fs::write(
        &log,
        format!("{}not json\n\n", fs::read_to_string(&log).expect("log")),
    )
    .expect("corrupt log");
    monitor.record_failure(report("b"));
    monitor.record_failure(report("c"));

    let all = load_event_log(&log, 100).expect("load");
    assert_eq!(all.len(), 3);

    let tail = load_event_log(&log, 2).expect("load");
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].streak, 2);
    assert_eq!(tail[1].streak, 3);

    assert!(load_event_log(&log, 0).expect("load").is_empty());
    assert!(load_event_log(&tmp.path().join("missing.jsonl"), 5).expect("load").is_empty());
}

#[test]
fn unwritable_log_does_not_break_the_monitor() {
    let tmp = tempdir().expect("tempdir");
    let log = tmp.path().join("g.jsonl");
    let monitor = GovernanceMonitor::new(1, &log, 8).expect("monitor");
    // A directory where the log file should be makes every append fail.
    fs::create_dir(&log).expect("block log path");

    assert!(monitor.record_failure(report("a")));
    assert_eq!(monitor.failure_streak(), 1);
    assert_eq!(monitor.recent_events(10).len(), 2);
}

#[test]
fn ring_keeps_only_the_newest_events() {
    let tmp = tempdir().expect("tempdir");
    let monitor = GovernanceMonitor::new(100, &tmp.path().join("g.jsonl"), 3).expect("monitor");
    for i in 0..5 {
        monitor.record_failure(report(&format!("k{}", i)));
    }
    let events = monitor.recent_events(10);
    let streaks: Vec<u32> = events.iter().map(|e| e.streak).collect();
    assert_eq!(streaks, vec![3, 4, 5]);

    let last_two: Vec<u32> = monitor.recent_events(2).iter().map(|e| e.streak).collect();
    assert_eq!(last_two, vec![4, 5]);
    assert!(monitor.recent_events(0).is_empty());
}

#[test]
fn from_config_uses_configured_threshold() {
    let tmp = tempdir().expect("tempdir");
    let config = GovernanceConfig {
        alert_threshold: 4,
        ring_capacity: 16,
    };
    let monitor = GovernanceMonitor::from_config(&config, &tmp.path().join("g.jsonl")).expect("monitor");
    assert_eq!(monitor.alert_threshold(), 4);
}

#[test]
fn concurrent_failures_are_all_counted() {
    let tmp = tempdir().expect("tempdir");
    let monitor = Arc::new(
        GovernanceMonitor::new(1000, &tmp.path().join("g.jsonl"), 1024).expect("monitor"),
    );
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || {
                for i in 0..25 {
                    monitor.record_failure(report(&format!("t{}-{}", t, i)));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("thread");
    }
    assert_eq!(monitor.failure_streak(), 200);

    let logged = load_event_log(monitor.log_path(), 1000).expect("load");
    assert_eq!(logged.len(), 200);
    let mut streaks: Vec<u32> = logged.iter().map(|e| e.streak).collect();
    streaks.sort_unstable();
    assert_eq!(streaks, (1..=200).collect::<Vec<u32>>());
}
