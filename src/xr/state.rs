//! Session lifecycle state and the transition policy.
//!
//! The policy is a pure table, `transition(running, incoming)`, so it can be
//! checked without a runtime. `SessionStateMachine` applies the table and
//! performs the resulting action through `SessionOps`.
//!
//! | incoming                        | action                          | frame cycle |
//! |---------------------------------|---------------------------------|-------------|
//! | READY (not running)             | begin session                   | enabled     |
//! | READY (running)                 | none                            | enabled     |
//! | SYNCHRONIZED / VISIBLE / FOCUSED| none                            | enabled     |
//! | IDLE                            | none                            | disabled    |
//! | STOPPING                        | end session if running          | disabled    |
//! | EXITING / LOSS_PENDING          | destroy session resources, quit | disabled    |
//! | UNKNOWN                         | none                            | disabled    |

use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    Exiting,
    LossPending,
}

impl SessionState {
    /// States in which the frame cycle runs.
    pub fn is_renderable(self) -> bool {
        matches!(
            self,
            SessionState::Ready
                | SessionState::Synchronized
                | SessionState::Visible
                | SessionState::Focused
        )
    }

    /// Absorbing states: the session is over.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Exiting | SessionState::LossPending)
    }
}

/// Event drained from the compositor runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    InstanceLossPending { loss_time: i64 },
    InteractionProfileChanged,
    /// Any event type the session does not act on, by its raw type code.
    Unhandled(u32),
}

/// Side effect requested by a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionAction {
    None,
    BeginSession,
    EndSession,
    DestroySession,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub action: TransitionAction,
    pub frame_cycle_enabled: bool,
    pub quit: bool,
}

/// Transition policy for an incoming state, given whether the session is running.
pub fn transition(running: bool, incoming: SessionState) -> Transition {
    let action = match incoming {
        SessionState::Ready if !running => TransitionAction::BeginSession,
        SessionState::Stopping if running => TransitionAction::EndSession,
        SessionState::Exiting | SessionState::LossPending => TransitionAction::DestroySession,
        _ => TransitionAction::None,
    };
    Transition {
        action,
        frame_cycle_enabled: incoming.is_renderable(),
        quit: incoming.is_terminal(),
    }
}

/// Session operations a transition can trigger.
pub trait SessionOps {
    fn begin_session(&mut self) -> Result<()>;
    fn end_session(&mut self) -> Result<()>;
    /// Release the session, everything that depends on it, and the instance.
    /// Idempotent.
    fn destroy_session(&mut self) -> Result<()>;
}

/// Lifecycle state of the compositor session.
///
/// Single writer: only the event dispatch thread calls `apply`.
#[derive(Debug, Default)]
pub struct SessionStateMachine {
    state: SessionState,
    running: bool,
    fatal: bool,
    quit: bool,
    transitions: u64,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session has been begun and not yet ended.
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn frame_cycle_enabled(&self) -> bool {
        !self.quit_requested() && self.state.is_renderable()
    }

    pub fn quit_requested(&self) -> bool {
        self.fatal || self.quit || self.state.is_terminal()
    }

    /// True when quitting because of an error rather than a clean exit.
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Quit without waiting for the runtime (no session to end).
    pub fn request_quit(&mut self) {
        self.quit = true;
    }

    /// Record a fatal error; the main loop stops at its next check.
    pub fn mark_fatal(&mut self) {
        self.fatal = true;
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Apply a state change reported by the runtime.
    ///
    /// Returns an error only for fatal outcomes (session-begin failure).
    /// Session-end failure is logged and the transition proceeds.
    pub fn apply(&mut self, incoming: SessionState, ops: &mut dyn SessionOps) -> Result<()> {
        let previous = self.state;
        if previous.is_terminal() {
            log::warn!(
                "ignoring session state {:?}: session already {:?}",
                incoming,
                previous
            );
            return Ok(());
        }
        let step = transition(self.running, incoming);
        self.state = incoming;
        self.transitions += 1;
        log::info!(
            "session state {:?} -> {:?} (running={})",
            previous,
            incoming,
            self.running
        );

        match step.action {
            TransitionAction::None => {}
            TransitionAction::BeginSession => {
                if let Err(err) = ops.begin_session() {
                    self.fatal = true;
                    return Err(anyhow!("failed to begin session: {:#}", err));
                }
                self.running = true;
                log::info!("session begun");
            }
            TransitionAction::EndSession => {
                if let Err(err) = ops.end_session() {
                    log::error!("failed to end session: {:#}", err);
                } else {
                    log::info!("session ended");
                }
                self.running = false;
            }
            TransitionAction::DestroySession => {
                log::info!("session exiting or lost; destroying session");
                if let Err(err) = ops.destroy_session() {
                    log::error!("failed to destroy session: {:#}", err);
                }
                self.running = false;
            }
        }

        if step.frame_cycle_enabled != previous.is_renderable() {
            log::info!(
                "frame cycle {}",
                if step.frame_cycle_enabled { "started" } else { "stopped" }
            );
        }
        Ok(())
    }
}
