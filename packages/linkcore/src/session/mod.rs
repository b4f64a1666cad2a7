//! Socket sessions that run only while the station link is usable.
//!
//! Each role loop owns its receive buffer and talks to the IP stack through
//! the traits in [`transport`]. Loops return only when they give up for good.

use core::fmt;
use core::net::SocketAddrV4;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Duration;
use log::info;

use crate::gate::ReadinessGate;

mod tcp_client;
mod tcp_server;
pub mod transport;
mod udp;

pub use transport::{
    Clock, DatagramSocket, Elapsed, Inbox, Restart, SocketError, StreamAcceptor, StreamConn,
    StreamConnector,
};

/// Receive buffer size, one byte more than the largest delivered payload.
pub const RX_BUFFER_LEN: usize = 255;
pub const MAX_PAYLOAD_LEN: usize = RX_BUFFER_LEN - 1;
/// Pause after a per-connection accept failure.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// When a session consults the readiness gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDiscipline {
    /// Before every accept, receive or send cycle.
    EveryCycle,
    /// Once, before the first socket operation.
    StartupOnly,
}

impl GateDiscipline {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EveryCycle => "every_cycle",
            Self::StartupOnly => "startup_only",
        }
    }

    pub const fn to_persisted(self) -> u8 {
        match self {
            Self::EveryCycle => 0,
            Self::StartupOnly => 1,
        }
    }

    pub const fn from_persisted(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::EveryCycle),
            1 => Some(Self::StartupOnly),
            _ => None,
        }
    }
}

/// Optional deadlines for blocking socket operations. `None` waits forever.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionTimeouts {
    pub accept: Option<Duration>,
    pub connect: Option<Duration>,
    pub receive: Option<Duration>,
    pub send: Option<Duration>,
}

/// Why a role loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionExit {
    SetupFailed(SocketError),
    ConnectFailed(SocketError),
    SendFailed(SocketError),
    RestartRequested,
}

impl SessionExit {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SetupFailed(_) => "setup_failed",
            Self::ConnectFailed(_) => "connect_failed",
            Self::SendFailed(_) => "send_failed",
            Self::RestartRequested => "restart_requested",
        }
    }

    pub const fn error(self) -> Option<SocketError> {
        match self {
            Self::SetupFailed(err) | Self::ConnectFailed(err) | Self::SendFailed(err) => Some(err),
            Self::RestartRequested => None,
        }
    }
}

/// Per-task session state shared by all role loops.
pub struct SessionLoop<'a, M: RawMutex, C: Clock, I: Inbox> {
    gate: &'a ReadinessGate<M>,
    clock: C,
    inbox: I,
    discipline: GateDiscipline,
    timeouts: SessionTimeouts,
    buffer: [u8; RX_BUFFER_LEN],
    sent: u32,
}

impl<'a, M: RawMutex, C: Clock, I: Inbox> SessionLoop<'a, M, C, I> {
    pub fn new(gate: &'a ReadinessGate<M>, clock: C, inbox: I, discipline: GateDiscipline) -> Self {
        Self {
            gate,
            clock,
            inbox,
            discipline,
            timeouts: SessionTimeouts::default(),
            buffer: [0; RX_BUFFER_LEN],
            sent: 0,
        }
    }

    pub fn with_timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Payloads sent successfully since the loop was created.
    pub fn sent(&self) -> u32 {
        self.sent
    }

    /// The first cycle always waits; later ones only under `EveryCycle`.
    async fn await_gate(&self, first: bool) {
        if !first && self.discipline == GateDiscipline::StartupOnly {
            return;
        }
        if !self.gate.is_set() {
            info!(
                "session: waiting for link discipline={}",
                self.discipline.as_str()
            );
        }
        self.gate.wait().await;
    }

    fn deliver(&mut self, peer: Option<SocketAddrV4>, len: usize) {
        let payload = &self.buffer[..len];
        match core::str::from_utf8(payload) {
            Ok(text) => info!(
                "session: rx peer={} bytes={} text={:?}",
                PeerLabel(peer),
                len,
                text
            ),
            Err(_) => info!(
                "session: rx peer={} bytes={} hex={}",
                PeerLabel(peer),
                len,
                HexBytes(payload)
            ),
        }
        self.inbox.deliver(peer, payload);
    }
}

struct PeerLabel(Option<SocketAddrV4>);

impl fmt::Display for PeerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(peer) => write!(f, "{peer}"),
            None => f.write_str("-"),
        }
    }
}

struct HexBytes<'b>(&'b [u8]);

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
