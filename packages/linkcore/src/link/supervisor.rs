use core::fmt;

use embassy_sync::blocking_mutex::raw::RawMutex;
use log::{debug, info, warn};
use statig::blocking::IntoStateMachineExt as _;

use super::backoff::ReconnectPolicy;
use super::events::{disconnect_reason_label, LinkDirective, LinkEvent, LinkState, StepStatus};
use super::machine::{DispatchContext, GateCommand, LinkMachine};
use crate::gate::ReadinessGate;

/// Outcome of feeding one event to the supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkStep {
    pub before: LinkState,
    pub after: LinkState,
    pub directive: LinkDirective,
    pub status: StepStatus,
}

impl LinkStep {
    pub fn changed(self) -> bool {
        matches!(self.status, StepStatus::Applied)
    }

    /// The step dropped a usable link, even if it is already reconnecting.
    pub fn lost_link(self) -> bool {
        self.before.is_connected() && !self.after.is_connected()
    }
}

/// One applied transition as a single-line JSON object, for log scrapers.
#[derive(Clone, Copy, Debug)]
pub struct LinkEventRecord {
    pub event: LinkEvent,
    pub step: LinkStep,
    /// Milliseconds since the link pump started.
    pub at_ms: u64,
}

impl fmt::Display for LinkEventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{\"from\":\"{}\",\"to\":\"{}\",\"trigger\":\"{}\",\"directive\":\"{}\",\"at_ms\":{}}}",
            self.step.before.as_str(),
            self.step.after.as_str(),
            self.event.as_str(),
            self.step.directive.as_str(),
            self.at_ms
        )
    }
}

/// Owns the link state and the only write access to the readiness gate.
pub struct LinkSupervisor<'g, M: RawMutex> {
    machine: statig::blocking::StateMachine<LinkMachine>,
    gate: &'g ReadinessGate<M>,
}

impl<'g, M: RawMutex> LinkSupervisor<'g, M> {
    pub fn new(gate: &'g ReadinessGate<M>, policy: ReconnectPolicy) -> Self {
        gate.clear();
        Self {
            machine: LinkMachine::new(policy).state_machine(),
            gate,
        }
    }

    pub fn state(&self) -> LinkState {
        self.machine.inner().state
    }

    /// Consecutive reconnect attempts since the link was last usable.
    pub fn attempts(&self) -> u32 {
        self.machine.inner().attempts
    }

    /// Runs one transition. Never blocks; the gate is already updated when
    /// this returns, so a `Close` always lands before the reconnect directive
    /// reaches the caller.
    pub fn handle(&mut self, event: LinkEvent) -> LinkStep {
        let before = self.state();
        let mut context = DispatchContext::default();
        self.machine.handle_with_context(&event, &mut context);
        self.apply_gate(context.gate);

        let step = LinkStep {
            before,
            after: self.state(),
            directive: context.directive,
            status: context.status,
        };
        self.log_step(event, step);
        step
    }

    fn apply_gate(&self, command: GateCommand) {
        match command {
            GateCommand::Keep => {}
            GateCommand::Open(address) => {
                self.gate.record_address(address);
                self.gate.set();
            }
            GateCommand::Close => {
                self.gate.clear();
            }
        }
    }

    fn log_step(&self, event: LinkEvent, step: LinkStep) {
        if !step.changed() {
            debug!(
                "link: ignored event={} state={}",
                event.as_str(),
                step.before.as_str()
            );
            return;
        }

        if let LinkEvent::LinkLost { reason } = event {
            warn!(
                "link: lost from={} reason={} label={} attempt={}",
                step.before.as_str(),
                reason,
                disconnect_reason_label(reason),
                self.attempts()
            );
        }

        match (step.after, step.directive) {
            (LinkState::Connected(address), _) => info!(
                "link: {} -> connected event={} ip={}",
                step.before.as_str(),
                event.as_str(),
                address
            ),
            (after, LinkDirective::RetryAfter(delay)) => info!(
                "link: {} -> {} event={} retry_ms={}",
                step.before.as_str(),
                after.as_str(),
                event.as_str(),
                delay.as_millis()
            ),
            (after, directive) => info!(
                "link: {} -> {} event={} directive={}",
                step.before.as_str(),
                after.as_str(),
                event.as_str(),
                directive.as_str()
            ),
        }
    }
}
