use chrono::{Duration, Utc};
use vigil_common::types::{Comparison, MetricState, MetricValue, Severity, ValueType};

use crate::compare::{classify, compare_value, ThresholdSpec, Verdict};
use crate::evaluator::{transition, GatePolicy, Intent, SubjectSnapshot};

fn gt(threshold: f64) -> ThresholdSpec {
    ThresholdSpec {
        comparison: Comparison::Gt,
        value: MetricValue::Number(threshold),
        severity: Severity::Critical,
    }
}

#[test]
fn numeric_comparisons() {
    let n = |v: f64| MetricValue::Number(v);
    assert_eq!(
        compare_value(Comparison::Gt, ValueType::Number, &n(0.9), &n(0.8)),
        Some(true)
    );
    assert_eq!(
        compare_value(Comparison::Le, ValueType::Number, &n(0.8), &n(0.8)),
        Some(true)
    );
    assert_eq!(
        compare_value(Comparison::Ne, ValueType::Number, &n(1.0), &n(1.0)),
        Some(false)
    );
}

#[test]
fn nan_is_not_comparable() {
    let nan = MetricValue::Number(f64::NAN);
    let bound = MetricValue::Number(0.8);
    assert_eq!(
        compare_value(Comparison::Gt, ValueType::Number, &nan, &bound),
        None
    );
    let verdict = classify(Some(&gt(0.8)), ValueType::Number, &nan, true, false);
    assert_eq!(verdict, Verdict::Unknown);
}

#[test]
fn string_values_coerce_for_numeric_comparisons() {
    let sample = MetricValue::Text("0.95".to_string());
    let bound = MetricValue::Number(0.8);
    assert_eq!(
        compare_value(Comparison::Gt, ValueType::Number, &sample, &bound),
        Some(true)
    );
    let garbage = MetricValue::Text("high".to_string());
    assert_eq!(
        compare_value(Comparison::Gt, ValueType::Number, &garbage, &bound),
        None
    );
}

#[test]
fn bool_comparisons_are_eq_ne_only() {
    let t = MetricValue::Bool(true);
    let f = MetricValue::Bool(false);
    assert_eq!(compare_value(Comparison::Eq, ValueType::Bool, &t, &f), Some(false));
    assert_eq!(compare_value(Comparison::Ne, ValueType::Bool, &t, &f), Some(true));
    assert_eq!(compare_value(Comparison::Gt, ValueType::Bool, &t, &f), None);
}

#[test]
fn string_contains() {
    let hay = MetricValue::Text("disk /dev/sda1 read-only".to_string());
    let needle = MetricValue::Text("read-only".to_string());
    assert_eq!(
        compare_value(Comparison::Contains, ValueType::String, &hay, &needle),
        Some(true)
    );
    let other = MetricValue::Text("writable".to_string());
    assert_eq!(
        compare_value(Comparison::Contains, ValueType::String, &hay, &other),
        Some(false)
    );
}

#[test]
fn missing_threshold_means_unknown_without_intent() {
    let verdict = classify(None, ValueType::Number, &MetricValue::Number(0.9), true, false);
    assert_eq!(verdict, Verdict::Unknown);

    let prev = SubjectSnapshot {
        state: MetricState::Normal,
        pending_since: None,
        critical_streak: 0,
    };
    let d = transition(&prev, verdict, &GatePolicy::default(), Utc::now());
    assert_eq!(d.next.state, MetricState::Unknown);
    assert_eq!(d.intent, None);
}

#[test]
fn paused_suppresses_and_resolves() {
    let verdict = classify(
        Some(&gt(0.8)),
        ValueType::Number,
        &MetricValue::Number(0.95),
        true,
        true,
    );
    assert_eq!(verdict, Verdict::Suppressed);

    let prev = SubjectSnapshot {
        state: MetricState::Critical,
        pending_since: Some(Utc::now()),
        critical_streak: 3,
    };
    let d = transition(&prev, verdict, &GatePolicy::default(), Utc::now());
    assert_eq!(d.next.state, MetricState::Unknown);
    assert_eq!(d.intent, Some(Intent::ResolveIncident));
}

#[test]
fn open_resolve_cycle_without_gates() {
    let gates = GatePolicy::default();
    let now = Utc::now();
    let spec = gt(0.8);

    let mut snap = SubjectSnapshot::default();

    // 0.5 -> NORMAL, no intent
    let v = classify(Some(&spec), ValueType::Number, &MetricValue::Number(0.5), true, false);
    let d = transition(&snap, v, &gates, now);
    assert_eq!(d.next.state, MetricState::Normal);
    assert_eq!(d.intent, None);
    snap = d.next;

    // 0.9 -> CRITICAL, open
    let v = classify(Some(&spec), ValueType::Number, &MetricValue::Number(0.9), true, false);
    let d = transition(&snap, v, &gates, now);
    assert_eq!(d.next.state, MetricState::Critical);
    assert_eq!(d.intent, Some(Intent::OpenIncident));
    snap = d.next;

    // 0.9 again -> same state, silent
    let d = transition(&snap, v, &gates, now);
    assert_eq!(d.next.state, MetricState::Critical);
    assert_eq!(d.intent, None);
    snap = d.next;

    // 0.4 -> NORMAL, resolve
    let v = classify(Some(&spec), ValueType::Number, &MetricValue::Number(0.4), true, false);
    let d = transition(&snap, v, &gates, now);
    assert_eq!(d.next.state, MetricState::Normal);
    assert_eq!(d.intent, Some(Intent::ResolveIncident));
}

#[test]
fn grace_period_defers_opening() {
    let gates = GatePolicy {
        grace_period_seconds: 60,
        consecutive_failures: 1,
    };
    let t0 = Utc::now();

    let d = transition(&SubjectSnapshot::default(), Verdict::Critical, &gates, t0);
    assert_eq!(d.intent, None, "first critical starts the window");
    assert_eq!(d.next.state, MetricState::Unknown, "previous state held");
    assert_eq!(d.next.pending_since, Some(t0));

    // Still inside the window.
    let d2 = transition(&d.next, Verdict::Critical, &gates, t0 + Duration::seconds(30));
    assert_eq!(d2.intent, None);

    // Past the window: open.
    let d3 = transition(&d2.next, Verdict::Critical, &gates, t0 + Duration::seconds(61));
    assert_eq!(d3.intent, Some(Intent::OpenIncident));
    assert_eq!(d3.next.state, MetricState::Critical);
}

#[test]
fn normal_inside_grace_window_clears_pending() {
    let gates = GatePolicy {
        grace_period_seconds: 60,
        consecutive_failures: 1,
    };
    let t0 = Utc::now();

    let d = transition(&SubjectSnapshot::default(), Verdict::Critical, &gates, t0);
    let d2 = transition(&d.next, Verdict::Normal, &gates, t0 + Duration::seconds(10));
    assert_eq!(d2.intent, None, "nothing was confirmed, nothing to resolve");
    assert_eq!(d2.next.pending_since, None);
    assert_eq!(d2.next.critical_streak, 0);

    // A fresh critical starts a fresh window.
    let d3 = transition(&d2.next, Verdict::Critical, &gates, t0 + Duration::seconds(70));
    assert_eq!(d3.intent, None);
    assert_eq!(d3.next.pending_since, Some(t0 + Duration::seconds(70)));
}

#[test]
fn consecutive_failures_gate() {
    let gates = GatePolicy {
        grace_period_seconds: 0,
        consecutive_failures: 3,
    };
    let now = Utc::now();

    let mut snap = SubjectSnapshot::default();
    for expected_intent in [None, None, Some(Intent::OpenIncident)] {
        let d = transition(&snap, Verdict::Critical, &gates, now);
        assert_eq!(d.intent, expected_intent);
        snap = d.next;
    }
    assert_eq!(snap.critical_streak, 3);
}

#[test]
fn combined_gates_require_both() {
    let gates = GatePolicy {
        grace_period_seconds: 60,
        consecutive_failures: 2,
    };
    let t0 = Utc::now();

    // Two quick criticals satisfy the streak but not the grace window.
    let d = transition(&SubjectSnapshot::default(), Verdict::Critical, &gates, t0);
    let d2 = transition(&d.next, Verdict::Critical, &gates, t0 + Duration::seconds(5));
    assert_eq!(d2.intent, None);

    // A third one past the window satisfies both.
    let d3 = transition(&d2.next, Verdict::Critical, &gates, t0 + Duration::seconds(65));
    assert_eq!(d3.intent, Some(Intent::OpenIncident));
}

#[test]
fn resolve_without_open_is_not_emitted_twice() {
    let gates = GatePolicy::default();
    let now = Utc::now();

    // NORMAL from UNKNOWN emits nothing.
    let d = transition(&SubjectSnapshot::default(), Verdict::Normal, &gates, now);
    assert_eq!(d.intent, None);

    // NORMAL from NORMAL emits nothing.
    let d2 = transition(&d.next, Verdict::Normal, &gates, now);
    assert_eq!(d2.intent, None);
}
