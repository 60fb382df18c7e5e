use chrono::{DateTime, Duration, Utc};
use vigil_common::types::MetricState;

use crate::compare::Verdict;

/// Stored evaluator state of a subject, loaded before each evaluation and
/// written back after. `state` is the confirmed state: a subject sitting
/// inside an unexpired grace window is still reported in its previous
/// state and no incident exists for it yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectSnapshot {
    pub state: MetricState,
    pub pending_since: Option<DateTime<Utc>>,
    pub critical_streak: i32,
}

impl Default for SubjectSnapshot {
    fn default() -> Self {
        Self {
            state: MetricState::Unknown,
            pending_since: None,
            critical_streak: 0,
        }
    }
}

/// Gates that must both pass before a CRITICAL observation opens an
/// incident. When both are configured the stricter outcome wins, which
/// falls out of requiring both.
#[derive(Debug, Clone, Copy)]
pub struct GatePolicy {
    pub grace_period_seconds: i64,
    pub consecutive_failures: i32,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            grace_period_seconds: 0,
            consecutive_failures: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    OpenIncident,
    ResolveIncident,
}

/// Result of one evaluation step: the snapshot to persist and the intent
/// to hand to the incident manager, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub next: SubjectSnapshot,
    pub intent: Option<Intent>,
}

/// Advances the subject state machine by one observation.
///
/// Emission rules:
/// - intents fire only on transitions; re-evaluating the same state is
///   silent,
/// - a CRITICAL observation opens only once both gates pass; until then
///   the subject keeps its previous confirmed state while pending-since
///   and the streak accumulate,
/// - any NORMAL clears the gates; NORMAL after confirmed CRITICAL
///   resolves,
/// - UNKNOWN clears the gates without emitting,
/// - SUPPRESSED clears the gates and always asks for a resolve; the
///   incident manager treats resolve-without-open as a no-op.
pub fn transition(
    prev: &SubjectSnapshot,
    verdict: Verdict,
    gates: &GatePolicy,
    now: DateTime<Utc>,
) -> Decision {
    match verdict {
        Verdict::Suppressed => Decision {
            next: SubjectSnapshot::default(),
            intent: Some(Intent::ResolveIncident),
        },
        Verdict::Unknown => Decision {
            next: SubjectSnapshot::default(),
            intent: None,
        },
        Verdict::Normal => Decision {
            next: SubjectSnapshot {
                state: MetricState::Normal,
                pending_since: None,
                critical_streak: 0,
            },
            intent: if prev.state == MetricState::Critical {
                Some(Intent::ResolveIncident)
            } else {
                None
            },
        },
        Verdict::Critical => {
            let pending_since = prev.pending_since.unwrap_or(now);
            let critical_streak = prev.critical_streak.saturating_add(1);

            if prev.state == MetricState::Critical {
                // Already confirmed and open; nothing new to emit.
                return Decision {
                    next: SubjectSnapshot {
                        state: MetricState::Critical,
                        pending_since: Some(pending_since),
                        critical_streak,
                    },
                    intent: None,
                };
            }

            let grace_ok =
                now - pending_since >= Duration::seconds(gates.grace_period_seconds.max(0));
            let streak_ok = critical_streak >= gates.consecutive_failures.max(1);

            if grace_ok && streak_ok {
                Decision {
                    next: SubjectSnapshot {
                        state: MetricState::Critical,
                        pending_since: Some(pending_since),
                        critical_streak,
                    },
                    intent: Some(Intent::OpenIncident),
                }
            } else {
                // Still inside a gate: hold the previous confirmed state.
                Decision {
                    next: SubjectSnapshot {
                        state: prev.state,
                        pending_since: Some(pending_since),
                        critical_streak,
                    },
                    intent: None,
                }
            }
        }
    }
}
