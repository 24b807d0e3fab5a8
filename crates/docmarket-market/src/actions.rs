//! Per-action busy flags.
//!
//! Each user action is idle, busy or in error. Starting an action that is
//! already busy is refused instead of queued.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::{MarketError, Result};

/// User actions that submit requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Upload,
    Buy,
    Checkout,
    Activate,
    Deactivate,
    Delete,
    Airdrop,
    SetAirdropAmount,
    Approve,
    Transfer,
    SetApproval,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Upload => "upload",
            Action::Buy => "buy",
            Action::Checkout => "checkout",
            Action::Activate => "activate",
            Action::Deactivate => "deactivate",
            Action::Delete => "delete",
            Action::Airdrop => "airdrop request",
            Action::SetAirdropAmount => "airdrop amount update",
            Action::Approve => "approve",
            Action::Transfer => "transfer",
            Action::SetApproval => "operator approval",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionState {
    Idle,
    Busy,
    Error(String),
}

type States = Arc<Mutex<HashMap<Action, ActionState>>>;

#[derive(Debug, Clone, Default)]
pub struct ActionTracker {
    states: States,
}

impl ActionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an action busy, or fails with [`MarketError::Busy`] if it already is.
    pub fn begin(&self, action: Action) -> Result<ActionGuard> {
        let mut states = lock(&self.states);
        if states.get(&action) == Some(&ActionState::Busy) {
            return Err(MarketError::Busy(action));
        }
        states.insert(action, ActionState::Busy);
        Ok(ActionGuard {
            action,
            states: Arc::clone(&self.states),
            finished: false,
        })
    }

    pub fn state(&self, action: Action) -> ActionState {
        lock(&self.states)
            .get(&action)
            .cloned()
            .unwrap_or(ActionState::Idle)
    }
}

/// Clears the busy flag when finished or dropped.
#[derive(Debug)]
pub struct ActionGuard {
    action: Action,
    states: States,
    finished: bool,
}

impl ActionGuard {
    /// Records the outcome: idle on success, error with the message on failure.
    pub fn finish<T>(mut self, outcome: &Result<T>) {
        let state = match outcome {
            Ok(_) => ActionState::Idle,
            Err(e) => ActionState::Error(e.to_string()),
        };
        lock(&self.states).insert(self.action, state);
        self.finished = true;
    }
}

impl Drop for ActionGuard {
    fn drop(&mut self) {
        if !self.finished {
            lock(&self.states).insert(self.action, ActionState::Idle);
        }
    }
}

// A poisoned map only means a panic happened mid-update; the flags are still usable.
fn lock(states: &States) -> std::sync::MutexGuard<'_, HashMap<Action, ActionState>> {
    states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WalletError;

    #[test]
    fn test_second_begin_is_refused_while_busy() {
        let tracker = ActionTracker::new();
        let guard = tracker.begin(Action::Buy).unwrap();
        assert_eq!(tracker.state(Action::Buy), ActionState::Busy);

        let second = tracker.begin(Action::Buy);
        assert!(matches!(second, Err(MarketError::Busy(Action::Buy))));

        drop(guard);
        assert_eq!(tracker.state(Action::Buy), ActionState::Idle);
        assert!(tracker.begin(Action::Buy).is_ok());
    }

    #[test]
    fn test_actions_are_independent() {
        let tracker = ActionTracker::new();
        let _upload = tracker.begin(Action::Upload).unwrap();
        assert!(tracker.begin(Action::Buy).is_ok());
    }

    #[test]
    fn test_finish_records_error_then_allows_retry() {
        let tracker = ActionTracker::new();
        let guard = tracker.begin(Action::Upload).unwrap();
        let outcome: Result<()> = Err(WalletError::NotConnected.into());
        guard.finish(&outcome);

        assert!(matches!(tracker.state(Action::Upload), ActionState::Error(msg) if msg.contains("not connected")));
        assert!(tracker.begin(Action::Upload).is_ok());
    }

    #[test]
    fn test_finish_success_returns_to_idle() {
        let tracker = ActionTracker::new();
        let guard = tracker.begin(Action::Delete).unwrap();
        guard.finish(&Ok::<_, MarketError>(()));
        assert_eq!(tracker.state(Action::Delete), ActionState::Idle);
    }
}
