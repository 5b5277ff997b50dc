//! Event dispatch: platform exit signals and compositor runtime events.
//!
//! One `pump` per main-loop tick:
//! - drain platform input; an exit signal asks the runtime to end the session
//!   (or quits directly when there is no session)
//! - drain runtime events until the runtime reports none available, routing
//!   state changes to `SessionStateMachine`
//!
//! Poll failure and instance loss are fatal.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use anyhow::{anyhow, Context, Result};

use crate::xr::resources::XrResources;
use crate::xr::runtime::{CompositorRuntime, ViewConfigurationType};
use crate::xr::state::{SessionEvent, SessionOps, SessionStateMachine};

// ----------------------------------------------------------------------------
// Platform input
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlatformSignal {
    WindowClose,
    ExitKey,
}

/// Source of window-close / exit-key signals. Never blocks.
pub trait PlatformInput {
    fn drain(&mut self) -> Vec<PlatformSignal>;
}

/// Channel-backed input for embedding and tests.
pub struct ChannelInput {
    rx: Receiver<PlatformSignal>,
}

impl ChannelInput {
    pub fn new() -> (Sender<PlatformSignal>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }
}

impl PlatformInput for ChannelInput {
    fn drain(&mut self) -> Vec<PlatformSignal> {
        let mut signals = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(signal) => signals.push(signal),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        signals
    }
}

/// Ctrl-C mapped to the exit key.
pub struct CtrlcInput {
    inner: ChannelInput,
}

impl CtrlcInput {
    /// Install the process-wide Ctrl-C handler. Can only succeed once per process.
    pub fn install() -> Result<Self> {
        let (tx, inner) = ChannelInput::new();
        ctrlc::set_handler(move || {
            let _ = tx.send(PlatformSignal::ExitKey);
        })
        .context("install Ctrl-C handler")?;
        Ok(Self { inner })
    }
}

impl PlatformInput for CtrlcInput {
    fn drain(&mut self) -> Vec<PlatformSignal> {
        self.inner.drain()
    }
}

// ----------------------------------------------------------------------------
// Session operations over the runtime
// ----------------------------------------------------------------------------

/// Binds state-machine actions to a runtime and the handles it owns.
pub struct RuntimeSessionOps<'a> {
    pub runtime: &'a mut dyn CompositorRuntime,
    pub resources: &'a mut XrResources,
    pub view_type: ViewConfigurationType,
}

impl SessionOps for RuntimeSessionOps<'_> {
    fn begin_session(&mut self) -> Result<()> {
        let session = self
            .resources
            .session
            .ok_or_else(|| anyhow!("no session to begin"))?;
        self.runtime.begin_session(session, self.view_type)?;
        Ok(())
    }

    fn end_session(&mut self) -> Result<()> {
        let session = self
            .resources
            .session
            .ok_or_else(|| anyhow!("no session to end"))?;
        self.runtime.end_session(session)?;
        Ok(())
    }

    fn destroy_session(&mut self) -> Result<()> {
        self.resources.teardown(self.runtime);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// EventDispatcher
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub events: u64,
    pub state_changes: u64,
    pub exit_signals: u64,
}

pub struct EventDispatcher {
    view_type: ViewConfigurationType,
    stats: DispatchStats,
}

impl EventDispatcher {
    pub fn new(view_type: ViewConfigurationType) -> Self {
        Self {
            view_type,
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Drain platform and runtime events once.
    ///
    /// Returns `Err` on fatal conditions; the state machine is marked fatal
    /// before returning so the main loop stops.
    pub fn pump(
        &mut self,
        runtime: &mut dyn CompositorRuntime,
        resources: &mut XrResources,
        machine: &mut SessionStateMachine,
        input: &mut dyn PlatformInput,
    ) -> Result<()> {
        for signal in input.drain() {
            self.stats.exit_signals += 1;
            self.handle_exit_signal(signal, runtime, resources, machine);
        }

        let Some(instance) = resources.instance else {
            return Ok(());
        };

        while !machine.state().is_terminal() {
            let event = match runtime.poll_event(instance) {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(err) => {
                    machine.mark_fatal();
                    return Err(anyhow::Error::new(err).context("poll compositor events"));
                }
            };
            self.stats.events += 1;

            match event {
                SessionEvent::StateChanged(state) => {
                    self.stats.state_changes += 1;
                    let mut ops = RuntimeSessionOps {
                        runtime: &mut *runtime,
                        resources: &mut *resources,
                        view_type: self.view_type,
                    };
                    machine.apply(state, &mut ops)?;
                }
                SessionEvent::InstanceLossPending { loss_time } => {
                    log::error!("compositor instance loss pending at {}", loss_time);
                    machine.mark_fatal();
                    return Err(anyhow!("compositor instance loss pending (time {})", loss_time));
                }
                SessionEvent::InteractionProfileChanged => {
                    log::info!("interaction profile changed");
                }
                SessionEvent::Unhandled(code) => {
                    log::debug!("ignoring compositor event type {}", code);
                }
            }
        }
        Ok(())
    }

    fn handle_exit_signal(
        &mut self,
        signal: PlatformSignal,
        runtime: &mut dyn CompositorRuntime,
        resources: &XrResources,
        machine: &mut SessionStateMachine,
    ) {
        log::info!("exit requested ({:?})", signal);
        match resources.session {
            Some(session) if !machine.state().is_terminal() => {
                if let Err(err) = runtime.request_exit_session(session) {
                    log::warn!("{}; quitting without a clean session exit", err);
                    machine.request_quit();
                }
            }
            _ => machine.request_quit(),
        }
    }
}
