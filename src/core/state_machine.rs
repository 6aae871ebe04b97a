//! Session State Machine
//!
//! `Idle -> Active -> Closed`. `Closed` is terminal; a failed handshake
//! leaves the machine in `Idle` so the caller can retry.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Transport open, handshake not done
    Idle,
    /// Signed on, requests allowed
    Active,
    /// Logged off and transport released
    Closed,
}

impl SessionState {
    /// Check if state allows requests
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Active => write!(f, "Active"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Why a session was closed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Caller requested shutdown
    Shutdown,
    /// Session dropped while still open
    Dropped,
}

/// State transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: SessionState,
    /// New state
    pub to: SessionState,
    /// Timestamp
    pub timestamp: DateTime<Local>,
    /// Reason for transition
    pub reason: Option<String>,
    /// Associated error if any
    pub error: Option<String>,
}

/// Session state machine
pub struct SessionStateMachine {
    state: SessionState,
    previous_state: Option<SessionState>,
    history: Vec<StateTransition>,
    max_history: usize,
    last_transition: Option<Instant>,
    state_durations: HashMap<SessionState, Duration>,
    close_reason: Option<CloseReason>,
    on_state_change: Option<Box<dyn Fn(SessionState, SessionState) + Send + Sync>>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    /// Create a new state machine in `Idle`
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            previous_state: None,
            history: Vec::new(),
            max_history: 100,
            last_transition: Some(Instant::now()),
            state_durations: HashMap::new(),
            close_reason: None,
            on_state_change: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Get previous state
    pub fn previous_state(&self) -> Option<SessionState> {
        self.previous_state
    }

    /// Get close reason
    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// Get state history
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Get time in current state
    pub fn time_in_state(&self) -> Option<Duration> {
        self.last_transition.map(|t| t.elapsed())
    }

    /// Set state change callback
    pub fn on_state_change<F>(&mut self, callback: F)
    where
        F: Fn(SessionState, SessionState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Box::new(callback));
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: SessionState, reason: Option<&str>) -> Result<(), String> {
        self.transition_with_error(new_state, reason, None)
    }

    /// Transition with error information.
    ///
    /// A transition to the current state is recorded in the history
    /// without changing anything else; failed handshakes use it.
    pub fn transition_with_error(
        &mut self,
        new_state: SessionState,
        reason: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), String> {
        if !self.is_valid_transition(new_state) {
            return Err(format!(
                "Invalid transition from {:?} to {:?}",
                self.state, new_state
            ));
        }

        self.history.push(StateTransition {
            from: self.state,
            to: new_state,
            timestamp: Local::now(),
            reason: reason.map(String::from),
            error: error.map(String::from),
        });
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        if new_state == self.state {
            return Ok(());
        }

        if let Some(last) = self.last_transition {
            *self.state_durations.entry(self.state).or_default() += last.elapsed();
        }

        self.previous_state = Some(self.state);
        let old_state = self.state;
        self.state = new_state;
        self.last_transition = Some(Instant::now());

        if let Some(ref callback) = self.on_state_change {
            callback(old_state, new_state);
        }

        Ok(())
    }

    /// Move to `Closed`, remembering why
    pub fn close(&mut self, reason: CloseReason, error: Option<&str>) -> Result<(), String> {
        let label = match reason {
            CloseReason::Shutdown => "shutdown",
            CloseReason::Dropped => "dropped",
        };
        self.transition_with_error(SessionState::Closed, Some(label), error)?;
        if self.close_reason.is_none() {
            self.close_reason = Some(reason);
        }
        Ok(())
    }

    fn is_valid_transition(&self, new_state: SessionState) -> bool {
        use SessionState::*;

        match (self.state, new_state) {
            (Idle, Active) => true,
            (Idle, Closed) => true,
            (Active, Closed) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }

    /// Get total time spent in a state
    pub fn total_time_in_state(&self, state: SessionState) -> Duration {
        let mut total = self.state_durations.get(&state).copied().unwrap_or_default();
        if state == self.state {
            total += self.time_in_state().unwrap_or_default();
        }
        total
    }

    /// Get stats summary
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            current_state: self.state,
            total_transitions: self.history.len(),
            failed_attempts: self.history.iter().filter(|t| t.error.is_some()).count(),
            time_in_current_state: self.time_in_state(),
            close_reason: self.close_reason.clone(),
        }
    }
}

/// Session statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Current state
    pub current_state: SessionState,
    /// Recorded transitions
    pub total_transitions: usize,
    /// Transitions that carried an error
    pub failed_attempts: usize,
    /// Time in the current state
    pub time_in_current_state: Option<Duration>,
    /// Why the session closed, if it has
    pub close_reason: Option<CloseReason>,
}
