//! Seams between the session loops and the concrete IP stack.

use core::fmt;
use core::future::Future;
use core::net::SocketAddrV4;

use embassy_time::Duration;

/// Socket failure kinds. The first three are setup failures that end the
/// session task; the rest belong to a single connection or datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketError {
    Create,
    Bind,
    Exhausted,
    Refused,
    Reset,
    NoRoute,
    TimedOut,
    Io,
}

impl SocketError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Bind => "bind",
            Self::Exhausted => "exhausted",
            Self::Refused => "refused",
            Self::Reset => "reset",
            Self::NoRoute => "no_route",
            Self::TimedOut => "timed_out",
            Self::Io => "io",
        }
    }

    pub const fn is_setup(self) -> bool {
        matches!(self, Self::Create | Self::Bind | Self::Exhausted)
    }
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deadline passed before the wrapped operation finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Elapsed;

/// One established stream connection.
pub trait StreamConn {
    /// `Ok(0)` means the peer closed its side.
    async fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, SocketError>;
    async fn send(&mut self, payload: &[u8]) -> Result<(), SocketError>;
    async fn close(self);
}

pub trait StreamAcceptor {
    type Conn<'a>: StreamConn
    where
        Self: 'a;

    async fn bind(&mut self, port: u16) -> Result<(), SocketError>;
    async fn accept(&mut self) -> Result<(Self::Conn<'_>, SocketAddrV4), SocketError>;
}

pub trait StreamConnector {
    type Conn<'a>: StreamConn
    where
        Self: 'a;

    async fn connect(&mut self, remote: SocketAddrV4) -> Result<Self::Conn<'_>, SocketError>;
}

pub trait DatagramSocket {
    /// Port `0` asks for an ephemeral local port.
    async fn bind(&mut self, port: u16) -> Result<(), SocketError>;
    async fn send_to(&mut self, remote: SocketAddrV4, payload: &[u8]) -> Result<(), SocketError>;
    async fn receive_from(
        &mut self,
        buffer: &mut [u8],
    ) -> Result<(usize, SocketAddrV4), SocketError>;
}

pub trait Clock {
    async fn sleep(&self, duration: Duration);
    /// Runs `future`, giving up after `limit` when one is set.
    async fn within<F: Future>(&self, limit: Option<Duration>, future: F)
        -> Result<F::Output, Elapsed>;
}

/// Consumer of every received payload, one call per receive.
pub trait Inbox {
    fn deliver(&mut self, peer: Option<SocketAddrV4>, payload: &[u8]);
}

pub trait Restart {
    fn restart(&mut self);
}

impl<C: Clock + ?Sized> Clock for &C {
    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await
    }

    async fn within<F: Future>(
        &self,
        limit: Option<Duration>,
        future: F,
    ) -> Result<F::Output, Elapsed> {
        (**self).within(limit, future).await
    }
}

impl<I: Inbox + ?Sized> Inbox for &mut I {
    fn deliver(&mut self, peer: Option<SocketAddrV4>, payload: &[u8]) {
        (**self).deliver(peer, payload)
    }
}

impl<R: Restart + ?Sized> Restart for &mut R {
    fn restart(&mut self) {
        (**self).restart()
    }
}

/// Applies an optional deadline to a socket operation.
pub(crate) async fn bounded<C, F, T>(
    clock: &C,
    limit: Option<Duration>,
    operation: F,
) -> Result<T, SocketError>
where
    C: Clock,
    F: Future<Output = Result<T, SocketError>>,
{
    match clock.within(limit, operation).await {
        Ok(result) => result,
        Err(Elapsed) => Err(SocketError::TimedOut),
    }
}
