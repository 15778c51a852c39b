//! Load/run state machine - single source of truth for valid state transitions
//!
//! State diagram:
//! ```text
//! Idle ──Begin──> Loading ──Loaded──> Ready ──Evicted──> Idle
//!                  │  ▲                 │
//!             [Failed] └─────Begin──────┤
//!                  ↓                    │
//!               Failed ──Begin──> Loading
//!                  ▲                    │
//!                  └──────[Failed]──────┘
//! ```
//!
//! A generation run can only be active while Loading (implicit load) or
//! Ready. Idle and Failed are unreachable while a run is active: the run
//! has to end first.

use serde::{Deserialize, Serialize};

/// Model load state as observed by the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, strum::Display)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum LoadState {
    Idle,
    Loading {
        /// Fraction in 0..=1
        progress: f64,
    },
    Ready,
    Failed {
        error: String,
    },
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, PartialEq, strum::Display)]
pub enum LoadEvent {
    /// A load attempt was issued
    Begin,
    /// Fractional load progress arrived
    Progress(f64),
    /// The session became resident
    Loaded,
    /// Loading or generating failed
    Failed(String),
    /// The resident session was released
    Evicted,
}

/// Result of a successful state transition
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    Changed { from: LoadState, to: LoadState },
    /// Event was valid but state didn't change
    Unchanged,
}

/// Reason a transition was rejected
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{attempted_event} event rejected in {current_state} state (running: {running})")]
pub struct TransitionRejection {
    pub current_state: LoadState,
    pub attempted_event: LoadEvent,
    pub running: bool,
}

/// Reason a generation run could not start
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunRejection {
    #[error("a generation is already running")]
    AlreadyRunning,
    #[error("cannot generate in {0} state")]
    NotLoaded(LoadState),
}

/// Load state plus the `running` flag.
///
/// Owned by the chat controller; every mutation goes through here.
#[derive(Debug, Clone)]
pub struct ChatStateMachine {
    load: LoadState,
    running: bool,
}

impl ChatStateMachine {
    pub fn new() -> Self {
        Self {
            load: LoadState::Idle,
            running: false,
        }
    }

    pub fn current(&self) -> &LoadState {
        &self.load
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_ready(&self) -> bool {
        self.load == LoadState::Ready
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.load, LoadState::Loading { .. })
    }

    /// `running` never coexists with Idle or Failed.
    pub fn is_consistent(&self) -> bool {
        !self.running || matches!(self.load, LoadState::Loading { .. } | LoadState::Ready)
    }

    /// Attempt a state transition based on an event
    ///
    /// This is the ONLY way to change the load state.
    pub fn transition(
        &mut self,
        event: LoadEvent,
    ) -> Result<TransitionResult, TransitionRejection> {
        let rejection = |machine: &Self, event: LoadEvent| TransitionRejection {
            current_state: machine.load.clone(),
            attempted_event: event,
            running: machine.running,
        };

        let Some(next) = Self::compute_transition(&self.load, &event) else {
            return Err(rejection(self, event));
        };

        if self.running && matches!(next, LoadState::Idle | LoadState::Failed { .. }) {
            return Err(rejection(self, event));
        }

        if next == self.load {
            return Ok(TransitionResult::Unchanged);
        }

        let from = std::mem::replace(&mut self.load, next.clone());
        Ok(TransitionResult::Changed { from, to: next })
    }

    /// Pure function: compute what transition should happen (if any)
    /// Returns None if the transition is invalid
    fn compute_transition(current: &LoadState, event: &LoadEvent) -> Option<LoadState> {
        match (current, event) {
            (_, LoadEvent::Begin) => Some(LoadState::Loading { progress: 0.0 }),

            (LoadState::Loading { progress }, LoadEvent::Progress(fraction)) => {
                Some(LoadState::Loading {
                    progress: progress.max(fraction.clamp(0.0, 1.0)),
                })
            }
            (_, LoadEvent::Progress(_)) => None,

            (LoadState::Loading { .. } | LoadState::Ready, LoadEvent::Loaded) => {
                Some(LoadState::Ready)
            }
            (_, LoadEvent::Loaded) => None,

            (_, LoadEvent::Failed(error)) => Some(LoadState::Failed {
                error: error.clone(),
            }),

            (LoadState::Ready | LoadState::Idle, LoadEvent::Evicted) => Some(LoadState::Idle),
            (_, LoadEvent::Evicted) => None,
        }
    }

    /// Mark a generation run as active.
    pub fn begin_run(&mut self) -> Result<(), RunRejection> {
        if self.running {
            return Err(RunRejection::AlreadyRunning);
        }
        if !matches!(self.load, LoadState::Loading { .. } | LoadState::Ready) {
            return Err(RunRejection::NotLoaded(self.load.clone()));
        }
        self.running = true;
        Ok(())
    }

    pub fn end_run(&mut self) {
        self.running = false;
    }
}

impl Default for ChatStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loading(progress: f64) -> LoadState {
        LoadState::Loading { progress }
    }

    fn failed(error: &str) -> LoadState {
        LoadState::Failed {
            error: error.to_string(),
        }
    }

    #[test]
    fn test_transition_table() {
        let cases = vec![
            ("begin from idle", LoadState::Idle, LoadEvent::Begin, Some(loading(0.0))),
            ("begin from failed", failed("x"), LoadEvent::Begin, Some(loading(0.0))),
            ("begin from ready", LoadState::Ready, LoadEvent::Begin, Some(loading(0.0))),
            ("progress while loading", loading(0.2), LoadEvent::Progress(0.5), Some(loading(0.5))),
            ("progress never goes back", loading(0.6), LoadEvent::Progress(0.5), Some(loading(0.6))),
            ("progress is clamped", loading(0.0), LoadEvent::Progress(3.0), Some(loading(1.0))),
            ("progress when ready", LoadState::Ready, LoadEvent::Progress(0.5), None),
            ("loaded", loading(1.0), LoadEvent::Loaded, Some(LoadState::Ready)),
            ("loaded twice", LoadState::Ready, LoadEvent::Loaded, Some(LoadState::Ready)),
            ("stale loaded after failure", failed("x"), LoadEvent::Loaded, None),
            ("loaded when idle", LoadState::Idle, LoadEvent::Loaded, None),
            ("load failure", loading(0.3), LoadEvent::Failed("e".into()), Some(failed("e"))),
            ("generation failure", LoadState::Ready, LoadEvent::Failed("e".into()), Some(failed("e"))),
            ("evict ready", LoadState::Ready, LoadEvent::Evicted, Some(LoadState::Idle)),
            ("evict while loading", loading(0.3), LoadEvent::Evicted, None),
        ];

        for (description, from, event, expected) in cases {
            assert_eq!(
                ChatStateMachine::compute_transition(&from, &event),
                expected,
                "{}",
                description
            );
        }
    }

    #[test]
    fn test_transition_reports_changes() {
        let mut machine = ChatStateMachine::new();

        assert_eq!(
            machine.transition(LoadEvent::Begin),
            Ok(TransitionResult::Changed {
                from: LoadState::Idle,
                to: loading(0.0),
            })
        );
        assert_eq!(
            machine.transition(LoadEvent::Begin),
            Ok(TransitionResult::Unchanged)
        );

        let rejected = machine.transition(LoadEvent::Evicted).unwrap_err();
        assert_eq!(rejected.current_state, loading(0.0));
        assert_eq!(
            rejected.to_string(),
            "Evicted event rejected in Loading state (running: false)"
        );
    }

    #[test]
    fn test_running_never_coexists_with_idle_or_failed() {
        let mut machine = ChatStateMachine::new();
        assert_eq!(
            machine.begin_run(),
            Err(RunRejection::NotLoaded(LoadState::Idle))
        );

        machine.transition(LoadEvent::Begin).unwrap();
        machine.begin_run().unwrap();
        assert!(machine.is_consistent());
        assert_eq!(machine.begin_run(), Err(RunRejection::AlreadyRunning));

        assert!(machine.transition(LoadEvent::Failed("e".into())).is_err());
        machine.transition(LoadEvent::Loaded).unwrap();
        assert!(machine.transition(LoadEvent::Evicted).is_err());
        assert!(machine.is_consistent());

        machine.end_run();
        machine.transition(LoadEvent::Failed("e".into())).unwrap();
        assert!(machine.is_consistent());
        assert_eq!(*machine.current(), failed("e"));
    }
}
