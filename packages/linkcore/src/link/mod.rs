//! Station link lifecycle: events in, state and reconnect directives out.

mod backoff;
mod events;
mod machine;
mod supervisor;

pub use backoff::ReconnectPolicy;
pub use events::{disconnect_reason_label, LinkDirective, LinkEvent, LinkState, StepStatus};
pub use supervisor::{LinkEventRecord, LinkStep, LinkSupervisor};
