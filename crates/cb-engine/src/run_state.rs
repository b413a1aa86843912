//! Activity and worker lifecycle states
//!
//! ```text
//! Created -> Starting -> Running -> Stopping -> Stopped
//!                           |                      |
//!                           +------> Finished      |
//!                                       |          |
//!                      Starting <-------+----------+
//! ```

use crate::error::ActivityError;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Lifecycle state of an activity or one of its workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Built, never started
    Created,
    /// Workers are being spawned
    Starting,
    /// Workers are claiming cycles
    Running,
    /// Workers were asked to exit
    Stopping,
    /// Workers exited before the cycle range was exhausted
    Stopped,
    /// The cycle range was exhausted
    Finished,
}

impl RunState {
    /// Every state, in lifecycle order
    pub const ALL: [RunState; 6] = [
        RunState::Created,
        RunState::Starting,
        RunState::Running,
        RunState::Stopping,
        RunState::Stopped,
        RunState::Finished,
    ];

    /// Whether no worker can be active in this state
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Finished)
    }

    /// Whether workers may be active in this state
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Validate a lifecycle transition
///
/// # Errors
/// Returns [`ActivityError::InvalidTransition`] when `to` is not reachable
/// from `from` in one step.
pub fn validate_transition(from: RunState, to: RunState) -> Result<(), ActivityError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(ActivityError::InvalidTransition { from, to })
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: RunState) -> &'static [RunState] {
    use RunState::{Created, Finished, Running, Starting, Stopped, Stopping};
    match from {
        Created | Stopped | Finished => &[Starting],
        Starting => &[Running, Stopping],
        Running => &[Stopping, Finished],
        Stopping => &[Stopped],
    }
}

/// Counts of worker slots per state
///
/// Workers report their own transitions; control code waits on the counts.
#[derive(Debug, Default)]
pub struct RunStateTally {
    counts: Mutex<[usize; 6]>,
    changed: Condvar,
}

impl RunStateTally {
    /// Create an empty tally
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a slot entering `to`, leaving `from` if it had a state
    pub fn change(&self, from: Option<RunState>, to: RunState) {
        let mut counts = self.counts.lock();
        if let Some(from) = from {
            counts[from.index()] = counts[from.index()].saturating_sub(1);
        }
        counts[to.index()] += 1;
        drop(counts);
        self.changed.notify_all();
    }

    /// Forget every slot
    pub fn reset(&self) {
        *self.counts.lock() = [0; 6];
        self.changed.notify_all();
    }

    /// Number of slots in `state`
    #[must_use]
    pub fn count(&self, state: RunState) -> usize {
        self.counts.lock()[state.index()]
    }

    /// Number of slots in an active state
    #[must_use]
    pub fn active(&self) -> usize {
        let counts = self.counts.lock();
        RunState::ALL
            .iter()
            .filter(|s| s.is_active())
            .map(|s| counts[s.index()])
            .sum()
    }

    /// Snapshot of all counts
    #[must_use]
    pub fn snapshot(&self) -> Vec<(RunState, usize)> {
        let counts = self.counts.lock();
        RunState::ALL
            .iter()
            .map(|s| (*s, counts[s.index()]))
            .filter(|(_, n)| *n > 0)
            .collect()
    }

    /// Block until no slot is active or `timeout` elapses
    ///
    /// Returns whether every slot became inactive.
    pub fn await_idle(&self, timeout: Duration) -> bool {
        self.await_condition(timeout, |counts| {
            RunState::ALL
                .iter()
                .filter(|s| s.is_active())
                .all(|s| counts[s.index()] == 0)
        })
    }

    /// Block until at least `n` slots are in `state` or `timeout` elapses
    pub fn await_at_least(&self, state: RunState, n: usize, timeout: Duration) -> bool {
        self.await_condition(timeout, |counts| counts[state.index()] >= n)
    }

    fn await_condition(&self, timeout: Duration, done: impl Fn(&[usize; 6]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut counts = self.counts.lock();
        while !done(&counts) {
            if self.changed.wait_until(&mut counts, deadline).timed_out() {
                return done(&counts);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn transitions_follow_lifecycle() {
        assert!(validate_transition(RunState::Created, RunState::Starting).is_ok());
        assert!(validate_transition(RunState::Running, RunState::Finished).is_ok());
        assert!(validate_transition(RunState::Stopped, RunState::Starting).is_ok());
        assert!(validate_transition(RunState::Finished, RunState::Starting).is_ok());
        assert!(matches!(
            validate_transition(RunState::Created, RunState::Running),
            Err(ActivityError::InvalidTransition { .. })
        ));
        assert!(validate_transition(RunState::Finished, RunState::Stopped).is_err());
    }

    #[test]
    fn every_terminal_state_restarts() {
        for state in RunState::ALL.iter().filter(|s| s.is_terminal()) {
            assert_eq!(allowed_transitions(*state), &[RunState::Starting]);
        }
    }

    #[test]
    fn tally_counts_and_waits() {
        let tally = Arc::new(RunStateTally::new());
        tally.change(None, RunState::Starting);
        tally.change(Some(RunState::Starting), RunState::Running);
        assert_eq!(tally.count(RunState::Running), 1);
        assert_eq!(tally.active(), 1);
        assert!(!tally.await_idle(Duration::from_millis(10)));

        let worker = {
            let tally = Arc::clone(&tally);
            thread::spawn(move || tally.change(Some(RunState::Running), RunState::Finished))
        };
        assert!(tally.await_idle(Duration::from_secs(5)));
        worker.join().unwrap();
        assert_eq!(tally.snapshot(), vec![(RunState::Finished, 1)]);
    }
}
