//! Count-based hysteresis for a single (subscription, check) pair.
//!
//! # State Machine
//!
//! ```text
//!             fired, count < threshold
//!  Inactive ─────────────────────────► Armed
//!     ▲  ▲                               │
//!     │  │        not fired              │ fired, count >= threshold
//!     │  └───────────────────────────────┤        (Triggered)
//!     │                                  ▼
//!     └──────────────────────────────  Active ◄──┐
//!            not fired (Resolved)        │       │ fired (Sustained)
//!                                        └───────┘
//! ```
//!
//! A check has to report `fired` on `threshold` consecutive cycles before the
//! user hears about it. The first healthy sample resets the count and, if the
//! alert was active, resolves it right away.

use super::{AlertState, NotificationKind};

/// Where a pair sits in the state machine. Derived from [`AlertState`], never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Inactive,
    Armed,
    Active,
}

/// What a single step did.
///
/// | Previous | fired | Result      |
/// |----------|-------|-------------|
/// | Inactive | false | `Quiet`     |
/// | Inactive | true  | `Arming` or `Triggered` |
/// | Armed    | false | `Disarmed`  |
/// | Armed    | true  | `Arming` or `Triggered` |
/// | Active   | false | `Resolved`  |
/// | Active   | true  | `Sustained` |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Quiet,
    Arming,
    Disarmed,
    Triggered,
    Sustained,
    Resolved,
}

impl Transition {
    /// The notification this step owes the user, if any.
    pub fn notification(self) -> Option<NotificationKind> {
        match self {
            Transition::Triggered => Some(NotificationKind::Fire),
            Transition::Resolved => Some(NotificationKind::Resolve),
            _ => None,
        }
    }
}

impl AlertState {
    pub fn phase(&self) -> Phase {
        if self.is_active {
            Phase::Active
        } else if self.consecutive_fire_count > 0 {
            Phase::Armed
        } else {
            Phase::Inactive
        }
    }

    /// Compute the next state for this cycle's result. Pure; `self` is not touched.
    ///
    /// A threshold of 0 behaves like 1: the first firing sample activates.
    pub fn advance(&self, fired: bool, threshold: u32) -> (AlertState, Transition) {
        if !fired {
            let transition = match self.phase() {
                Phase::Active => Transition::Resolved,
                Phase::Armed => Transition::Disarmed,
                Phase::Inactive => Transition::Quiet,
            };
            return (AlertState::default(), transition);
        }

        let count = self.consecutive_fire_count.saturating_add(1);
        if self.is_active {
            let next = AlertState {
                consecutive_fire_count: count,
                is_active: true,
            };
            return (next, Transition::Sustained);
        }

        if count >= threshold.max(1) {
            let next = AlertState {
                consecutive_fire_count: count,
                is_active: true,
            };
            (next, Transition::Triggered)
        } else {
            let next = AlertState {
                consecutive_fire_count: count,
                is_active: false,
            };
            (next, Transition::Arming)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(samples: &[bool], threshold: u32) -> (AlertState, Vec<Transition>) {
        let mut state = AlertState::default();
        let mut transitions = Vec::new();
        for &fired in samples {
            let (next, transition) = state.advance(fired, threshold);
            state = next;
            transitions.push(transition);
        }
        (state, transitions)
    }

    #[test]
    fn test_fires_once_when_threshold_is_crossed() {
        let (state, transitions) = run(&[true, true, true, false], 3);
        assert_eq!(
            transitions,
            vec![
                Transition::Arming,
                Transition::Arming,
                Transition::Triggered,
                Transition::Resolved
            ]
        );
        assert_eq!(state, AlertState::default());
    }

    #[test]
    fn test_sustained_condition_does_not_refire() {
        let (state, transitions) = run(&[true; 10], 3);
        let fires = transitions
            .iter()
            .filter(|t| t.notification() == Some(NotificationKind::Fire))
            .count();
        assert_eq!(fires, 1);
        assert_eq!(transitions[2], Transition::Triggered);
        assert!(transitions[3..].iter().all(|t| *t == Transition::Sustained));
        assert_eq!(state.consecutive_fire_count, 10);
        assert!(state.is_active);
    }

    #[test]
    fn test_below_threshold_flap_is_silent() {
        let (state, transitions) = run(&[true, true, false], 3);
        assert!(transitions.iter().all(|t| t.notification().is_none()));
        assert_eq!(transitions[2], Transition::Disarmed);
        assert_eq!(state.phase(), Phase::Inactive);
    }

    #[test]
    fn test_first_healthy_sample_resolves() {
        let active = AlertState {
            consecutive_fire_count: 7,
            is_active: true,
        };
        let (next, transition) = active.advance(false, 3);
        assert_eq!(transition.notification(), Some(NotificationKind::Resolve));
        assert_eq!(next.consecutive_fire_count, 0);
        assert!(!next.is_active);
    }

    #[test]
    fn test_rearms_after_resolve() {
        let (_, transitions) = run(&[true, true, true, false, true, true, true], 3);
        assert_eq!(transitions[6], Transition::Triggered);
    }

    #[test]
    fn test_zero_threshold_activates_on_first_sample() {
        let (next, transition) = AlertState::default().advance(true, 0);
        assert_eq!(transition, Transition::Triggered);
        assert!(next.is_active);
    }

    #[test]
    fn test_advance_is_pure() {
        let state = AlertState {
            consecutive_fire_count: 2,
            is_active: false,
        };
        assert_eq!(state.advance(true, 3), state.advance(true, 3));
        assert_eq!(state.consecutive_fire_count, 2);
    }

    #[test]
    fn test_count_saturates() {
        let state = AlertState {
            consecutive_fire_count: u32::MAX,
            is_active: true,
        };
        let (next, transition) = state.advance(true, 3);
        assert_eq!(transition, Transition::Sustained);
        assert_eq!(next.consecutive_fire_count, u32::MAX);
    }
}
