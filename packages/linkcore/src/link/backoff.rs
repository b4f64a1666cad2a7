use embassy_time::Duration;

/// Doublings applied before the delay stops growing on its own.
const MAX_DOUBLINGS: u32 = 16;

/// How long the supervisor waits between a link loss and the next association
/// attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Reconnect inside the same step that saw the loss.
    Immediate,
    /// `initial * 2^attempt`, capped at `max`. Attempts reset once connected.
    CappedExponential { initial: Duration, max: Duration },
}

impl ReconnectPolicy {
    /// `None` means reconnect now.
    pub fn delay_for(self, attempt: u32) -> Option<Duration> {
        match self {
            Self::Immediate => None,
            Self::CappedExponential { initial, max } => {
                let factor = 1u64 << attempt.min(MAX_DOUBLINGS);
                let ticks = initial.as_ticks().saturating_mul(factor);
                Some(Duration::from_ticks(ticks.min(max.as_ticks())))
            }
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::CappedExponential { .. } => "capped_exponential",
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::CappedExponential {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(30),
        }
    }
}
