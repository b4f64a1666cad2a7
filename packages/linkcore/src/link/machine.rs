use core::net::Ipv4Addr;

use statig::prelude::*;

use super::backoff::ReconnectPolicy;
use super::events::{LinkDirective, LinkEvent, LinkState, StepStatus};

#[derive(Clone, Copy, Debug)]
pub(super) struct LinkMachine {
    pub(super) state: LinkState,
    pub(super) policy: ReconnectPolicy,
    pub(super) attempts: u32,
}

/// Gate change requested by a step. Applied by the supervisor after dispatch,
/// before the directive is handed back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum GateCommand {
    Keep,
    Open(Ipv4Addr),
    Close,
}

#[derive(Clone, Copy, Debug)]
pub(super) struct DispatchContext {
    pub(super) status: StepStatus,
    pub(super) directive: LinkDirective,
    pub(super) gate: GateCommand,
}

impl Default for DispatchContext {
    fn default() -> Self {
        Self {
            status: StepStatus::Ignored,
            directive: LinkDirective::None,
            gate: GateCommand::Keep,
        }
    }
}

impl LinkMachine {
    pub(super) fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: LinkState::Idle,
            policy,
            attempts: 0,
        }
    }

    fn begin_connect(&mut self, context: &mut DispatchContext) -> Outcome<State> {
        self.state = LinkState::Connecting;
        context.status = StepStatus::Applied;
        context.directive = LinkDirective::Connect;
        Transition(State::connecting())
    }

    fn establish(&mut self, context: &mut DispatchContext, address: Ipv4Addr) -> Outcome<State> {
        self.state = LinkState::Connected(address);
        self.attempts = 0;
        context.status = StepStatus::Applied;
        context.gate = GateCommand::Open(address);
        Transition(State::connected())
    }

    fn schedule_reconnect(&mut self, context: &mut DispatchContext) -> Outcome<State> {
        let delay = self.policy.delay_for(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        context.gate = GateCommand::Close;
        match delay {
            None => self.begin_connect(context),
            Some(delay) => {
                self.state = LinkState::Disconnected;
                context.status = StepStatus::Applied;
                context.directive = LinkDirective::RetryAfter(delay);
                Transition(State::disconnected())
            }
        }
    }
}

#[state_machine(initial = "State::idle()")]
impl LinkMachine {
    #[state]
    fn idle(&mut self, context: &mut DispatchContext, event: &LinkEvent) -> Outcome<State> {
        match event {
            LinkEvent::StationStarted => self.begin_connect(context),
            _ => Handled,
        }
    }

    #[state]
    fn connecting(&mut self, context: &mut DispatchContext, event: &LinkEvent) -> Outcome<State> {
        match event {
            LinkEvent::AddressAcquired(address) => self.establish(context, *address),
            LinkEvent::LinkLost { .. } => self.schedule_reconnect(context),
            LinkEvent::StationStarted | LinkEvent::RetryDue => Handled,
        }
    }

    #[state]
    fn connected(&mut self, context: &mut DispatchContext, event: &LinkEvent) -> Outcome<State> {
        match event {
            LinkEvent::AddressAcquired(address) => {
                if self.state.address() != Some(*address) {
                    self.state = LinkState::Connected(*address);
                    context.status = StepStatus::Applied;
                    context.gate = GateCommand::Open(*address);
                }
                Handled
            }
            LinkEvent::LinkLost { .. } => self.schedule_reconnect(context),
            LinkEvent::StationStarted | LinkEvent::RetryDue => Handled,
        }
    }

    #[state]
    fn disconnected(
        &mut self,
        context: &mut DispatchContext,
        event: &LinkEvent,
    ) -> Outcome<State> {
        match event {
            LinkEvent::RetryDue => self.begin_connect(context),
            LinkEvent::AddressAcquired(address) => self.establish(context, *address),
            LinkEvent::StationStarted | LinkEvent::LinkLost { .. } => Handled,
        }
    }
}
