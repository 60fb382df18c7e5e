use chrono::{Duration, Utc};

use crate::notifier::{reminder_due, resolve_cooldown_seconds};

#[test]
fn cooldown_prefers_client_setting() {
    assert_eq!(resolve_cooldown_seconds(600, 30), 600);
    assert_eq!(resolve_cooldown_seconds(0, 30), 1800);
    assert_eq!(resolve_cooldown_seconds(-5, 30), 1800);
}

#[test]
fn cooldown_zero_means_every_notify_fires() {
    assert_eq!(resolve_cooldown_seconds(0, 0), 0);
    let now = Utc::now();
    assert!(reminder_due(Some(now), 0, now));
}

#[test]
fn first_notification_is_immediate() {
    assert!(reminder_due(None, 600, Utc::now()));
}

#[test]
fn reminder_respects_interval() {
    // reminder_notification_seconds=600, last success at t=0:
    // t=300 holds, t=620 fires.
    let t0 = Utc::now();
    assert!(!reminder_due(Some(t0), 600, t0 + Duration::seconds(300)));
    assert!(reminder_due(Some(t0), 600, t0 + Duration::seconds(620)));
    assert!(reminder_due(Some(t0), 600, t0 + Duration::seconds(600)));
}
