use core::net::{Ipv4Addr, SocketAddrV4};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::{pending, Future};
use std::pin::pin;
use std::task::{Context, Poll, Waker};

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Duration;

use super::transport::bounded;
use super::*;

type Gate = ReadinessGate<CriticalSectionRawMutex>;

const PORT: u16 = 8888;
const PEER: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(192, 168, 4, 2), 50_123);
const REMOTE: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(192, 168, 4, 255), PORT);

fn open_gate() -> Gate {
    let gate = Gate::new();
    gate.set();
    gate
}

fn poll_once<F: Future>(future: F) -> Poll<F::Output> {
    let mut future = pin!(future);
    future.as_mut().poll(&mut Context::from_waker(Waker::noop()))
}

#[derive(Default)]
struct TestClock<'g> {
    sleeps: RefCell<Vec<Duration>>,
    /// Closed on the first sleep, simulating a link loss between cycles.
    close_on_sleep: Option<&'g Gate>,
}

impl Clock for TestClock<'_> {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        if let Some(gate) = self.close_on_sleep {
            gate.clear();
        }
    }

    async fn within<F: Future>(
        &self,
        limit: Option<Duration>,
        future: F,
    ) -> Result<F::Output, Elapsed> {
        let mut future = pin!(future);
        core::future::poll_fn(|cx| match future.as_mut().poll(cx) {
            Poll::Ready(output) => Poll::Ready(Ok(output)),
            Poll::Pending if limit.is_some() => Poll::Ready(Err(Elapsed)),
            Poll::Pending => Poll::Pending,
        })
        .await
    }
}

#[derive(Default)]
struct RecordingInbox {
    messages: Vec<(Option<SocketAddrV4>, Vec<u8>)>,
}

impl Inbox for RecordingInbox {
    fn deliver(&mut self, peer: Option<SocketAddrV4>, payload: &[u8]) {
        self.messages.push((peer, payload.to_vec()));
    }
}

#[derive(Default)]
struct CountingRestart(usize);

impl Restart for CountingRestart {
    fn restart(&mut self) {
        self.0 += 1;
    }
}

enum Rx {
    Data(Vec<u8>),
    Fail(SocketError),
    Hang,
}

fn data(bytes: &[u8]) -> Rx {
    Rx::Data(bytes.to_vec())
}

#[derive(Default)]
struct ConnStats {
    sends: Vec<Vec<u8>>,
    fail_send_at: Option<usize>,
    closed: usize,
}

struct FakeConn<'a> {
    rx: VecDeque<Rx>,
    stats: &'a mut ConnStats,
}

impl StreamConn for FakeConn<'_> {
    async fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, SocketError> {
        match self.rx.pop_front() {
            Some(Rx::Data(bytes)) => {
                let len = bytes.len().min(buffer.len());
                buffer[..len].copy_from_slice(&bytes[..len]);
                Ok(len)
            }
            Some(Rx::Fail(err)) => Err(err),
            Some(Rx::Hang) => pending().await,
            None => Ok(0),
        }
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), SocketError> {
        if self.stats.fail_send_at == Some(self.stats.sends.len()) {
            return Err(SocketError::Reset);
        }
        self.stats.sends.push(payload.to_vec());
        Ok(())
    }

    async fn close(self) {
        self.stats.closed += 1;
    }
}

/// Hands out scripted clients; once the script runs dry it reports
/// `Exhausted`, which ends the server loop.
#[derive(Default)]
struct FakeAcceptor {
    bind_error: Option<SocketError>,
    bound: Option<u16>,
    accepts: VecDeque<Result<Vec<Rx>, SocketError>>,
    accept_calls: usize,
    stats: ConnStats,
}

impl FakeAcceptor {
    fn scripted(accepts: Vec<Result<Vec<Rx>, SocketError>>) -> Self {
        Self {
            accepts: accepts.into(),
            ..Self::default()
        }
    }
}

impl StreamAcceptor for FakeAcceptor {
    type Conn<'a>
        = FakeConn<'a>
    where
        Self: 'a;

    async fn bind(&mut self, port: u16) -> Result<(), SocketError> {
        if let Some(err) = self.bind_error {
            return Err(err);
        }
        self.bound = Some(port);
        Ok(())
    }

    async fn accept(&mut self) -> Result<(FakeConn<'_>, SocketAddrV4), SocketError> {
        self.accept_calls += 1;
        match self.accepts.pop_front() {
            Some(Ok(rx)) => Ok((
                FakeConn {
                    rx: rx.into(),
                    stats: &mut self.stats,
                },
                PEER,
            )),
            Some(Err(err)) => Err(err),
            None => Err(SocketError::Exhausted),
        }
    }
}

#[derive(Default)]
struct FakeConnector {
    connect_error: Option<SocketError>,
    connected_to: Option<SocketAddrV4>,
    stats: ConnStats,
}

impl StreamConnector for FakeConnector {
    type Conn<'a>
        = FakeConn<'a>
    where
        Self: 'a;

    async fn connect(&mut self, remote: SocketAddrV4) -> Result<FakeConn<'_>, SocketError> {
        if let Some(err) = self.connect_error {
            return Err(err);
        }
        self.connected_to = Some(remote);
        Ok(FakeConn {
            rx: VecDeque::new(),
            stats: &mut self.stats,
        })
    }
}

#[derive(Default)]
struct FakeDatagram {
    bind_error: Option<SocketError>,
    bound: Option<u16>,
    sends: Vec<(SocketAddrV4, Vec<u8>)>,
    fail_send_at: Option<usize>,
    incoming: VecDeque<Result<(Vec<u8>, SocketAddrV4), SocketError>>,
    receive_calls: usize,
}

impl DatagramSocket for FakeDatagram {
    async fn bind(&mut self, port: u16) -> Result<(), SocketError> {
        if let Some(err) = self.bind_error {
            return Err(err);
        }
        self.bound = Some(port);
        Ok(())
    }

    async fn send_to(&mut self, remote: SocketAddrV4, payload: &[u8]) -> Result<(), SocketError> {
        if self.fail_send_at == Some(self.sends.len()) {
            return Err(SocketError::NoRoute);
        }
        self.sends.push((remote, payload.to_vec()));
        Ok(())
    }

    async fn receive_from(
        &mut self,
        buffer: &mut [u8],
    ) -> Result<(usize, SocketAddrV4), SocketError> {
        self.receive_calls += 1;
        match self.incoming.pop_front() {
            Some(Ok((bytes, peer))) => {
                let len = bytes.len().min(buffer.len());
                buffer[..len].copy_from_slice(&bytes[..len]);
                Ok((len, peer))
            }
            Some(Err(err)) => Err(err),
            None => Err(SocketError::Exhausted),
        }
    }
}

#[test]
fn tcp_server_delivers_ping_then_accepts_again() {
    let gate = open_gate();
    let clock = TestClock::default();
    let mut inbox = RecordingInbox::default();
    let mut acceptor = FakeAcceptor::scripted(vec![Ok(vec![data(b"ping")])]);

    let mut session = SessionLoop::new(&gate, &clock, &mut inbox, GateDiscipline::EveryCycle);
    let exit = block_on(session.run_tcp_server(&mut acceptor, PORT));

    assert_eq!(exit, SessionExit::SetupFailed(SocketError::Exhausted));
    assert_eq!(acceptor.bound, Some(PORT));
    assert_eq!(acceptor.accept_calls, 2);
    assert_eq!(acceptor.stats.closed, 1);
    assert_eq!(inbox.messages, vec![(Some(PEER), b"ping".to_vec())]);
}

#[test]
fn tcp_server_delivers_each_receive_separately() {
    let gate = open_gate();
    let clock = TestClock::default();
    let mut inbox = RecordingInbox::default();
    let mut acceptor = FakeAcceptor::scripted(vec![
        Ok(vec![data(b"one"), data(b"two")]),
        Ok(vec![data(b"three")]),
    ]);

    let mut session = SessionLoop::new(&gate, &clock, &mut inbox, GateDiscipline::EveryCycle);
    block_on(session.run_tcp_server(&mut acceptor, PORT));

    let payloads: Vec<&[u8]> = inbox.messages.iter().map(|(_, p)| p.as_slice()).collect();
    assert_eq!(payloads, vec![&b"one"[..], b"two", b"three"]);
    assert_eq!(acceptor.stats.closed, 2);
}

#[test]
fn tcp_server_retries_per_connection_accept_errors() {
    let gate = open_gate();
    let clock = TestClock::default();
    let mut inbox = RecordingInbox::default();
    let mut acceptor = FakeAcceptor::scripted(vec![
        Err(SocketError::Reset),
        Err(SocketError::Io),
        Ok(vec![data(b"late")]),
    ]);

    let mut session = SessionLoop::new(&gate, &clock, &mut inbox, GateDiscipline::EveryCycle);
    let exit = block_on(session.run_tcp_server(&mut acceptor, PORT));

    assert_eq!(exit, SessionExit::SetupFailed(SocketError::Exhausted));
    assert_eq!(acceptor.accept_calls, 4);
    assert_eq!(*clock.sleeps.borrow(), vec![ACCEPT_RETRY_DELAY; 2]);
    assert_eq!(inbox.messages.len(), 1);
}

#[test]
fn tcp_server_bind_failure_ends_the_task() {
    let gate = open_gate();
    let clock = TestClock::default();
    let mut inbox = RecordingInbox::default();
    let mut acceptor = FakeAcceptor {
        bind_error: Some(SocketError::Bind),
        ..FakeAcceptor::default()
    };

    let mut session = SessionLoop::new(&gate, &clock, &mut inbox, GateDiscipline::EveryCycle);
    let exit = block_on(session.run_tcp_server(&mut acceptor, PORT));

    assert_eq!(exit, SessionExit::SetupFailed(SocketError::Bind));
    assert_eq!(acceptor.accept_calls, 0);
}

#[test]
fn tcp_server_receive_error_closes_only_that_client() {
    let gate = open_gate();
    let clock = TestClock::default();
    let mut inbox = RecordingInbox::default();
    let mut acceptor = FakeAcceptor::scripted(vec![
        Ok(vec![data(b"x"), Rx::Fail(SocketError::Reset)]),
        Ok(vec![data(b"y")]),
    ]);

    let mut session = SessionLoop::new(&gate, &clock, &mut inbox, GateDiscipline::EveryCycle);
    block_on(session.run_tcp_server(&mut acceptor, PORT));

    assert_eq!(acceptor.stats.closed, 2);
    assert_eq!(inbox.messages.len(), 2);
}

#[test]
fn tcp_server_receives_are_capped_at_payload_limit() {
    let gate = open_gate();
    let clock = TestClock::default();
    let mut inbox = RecordingInbox::default();
    let mut acceptor = FakeAcceptor::scripted(vec![Ok(vec![Rx::Data(vec![b'a'; 300])])]);

    let mut session = SessionLoop::new(&gate, &clock, &mut inbox, GateDiscipline::EveryCycle);
    block_on(session.run_tcp_server(&mut acceptor, PORT));

    assert_eq!(inbox.messages[0].1.len(), MAX_PAYLOAD_LEN);
}

#[test]
fn tcp_server_does_not_accept_while_gate_is_closed() {
    let gate = Gate::new();
    let clock = TestClock::default();
    let mut inbox = RecordingInbox::default();
    let mut acceptor = FakeAcceptor::scripted(vec![Ok(vec![data(b"ping")])]);

    {
        let mut session =
            SessionLoop::new(&gate, &clock, &mut inbox, GateDiscipline::EveryCycle);
        assert!(poll_once(session.run_tcp_server(&mut acceptor, PORT)).is_pending());
    }
    assert_eq!(acceptor.bound, Some(PORT));
    assert_eq!(acceptor.accept_calls, 0);

    gate.set();
    let mut session = SessionLoop::new(&gate, &clock, &mut inbox, GateDiscipline::EveryCycle);
    block_on(session.run_tcp_server(&mut acceptor, PORT));
    assert_eq!(inbox.messages.len(), 1);
}

#[test]
fn receive_timeout_ends_the_connection() {
    let gate = open_gate();
    let clock = TestClock::default();
    let mut inbox = RecordingInbox::default();
    let mut acceptor = FakeAcceptor::scripted(vec![Ok(vec![data(b"hi"), Rx::Hang])]);

    let mut session = SessionLoop::new(&gate, &clock, &mut inbox, GateDiscipline::EveryCycle)
        .with_timeouts(SessionTimeouts {
            receive: Some(Duration::from_secs(5)),
            ..SessionTimeouts::default()
        });
    block_on(session.run_tcp_server(&mut acceptor, PORT));

    assert_eq!(inbox.messages.len(), 1);
    assert_eq!(acceptor.stats.closed, 1);
}

#[test]
fn bounded_operation_reports_timed_out() {
    let clock = TestClock::default();
    let result = block_on(bounded(
        &clock,
        Some(Duration::from_millis(10)),
        pending::<Result<(), SocketError>>(),
    ));
    assert_eq!(result, Err(SocketError::TimedOut));

    let ready = block_on(bounded(&clock, Some(Duration::from_millis(10)), async {
        Ok::<_, SocketError>(7)
    }));
    assert_eq!(ready, Ok(7));
}

#[test]
fn tcp_client_sends_every_interval_until_failure() {
    let gate = open_gate();
    let clock = TestClock::default();
    let mut inbox = RecordingInbox::default();
    let mut connector = FakeConnector::default();
    connector.stats.fail_send_at = Some(3);
    let interval = Duration::from_secs(2);

    let mut session = SessionLoop::new(&gate, &clock, &mut inbox, GateDiscipline::StartupOnly);
    let exit = block_on(session.run_tcp_client(&mut connector, REMOTE, b"Hello", interval));

    assert_eq!(exit, SessionExit::SendFailed(SocketError::Reset));
    assert_eq!(session.sent(), 3);
    assert_eq!(connector.connected_to, Some(REMOTE));
    assert_eq!(connector.stats.sends, vec![b"Hello".to_vec(); 3]);
    assert_eq!(connector.stats.closed, 1);
    assert_eq!(*clock.sleeps.borrow(), vec![interval; 3]);
}

#[test]
fn tcp_client_connect_failure_terminates_without_sending() {
    let gate = open_gate();
    let clock = TestClock::default();
    let mut inbox = RecordingInbox::default();
    let mut connector = FakeConnector {
        connect_error: Some(SocketError::Refused),
        ..FakeConnector::default()
    };

    let mut session = SessionLoop::new(&gate, &clock, &mut inbox, GateDiscipline::StartupOnly);
    let exit = block_on(session.run_tcp_client(
        &mut connector,
        REMOTE,
        b"Hello",
        Duration::from_secs(2),
    ));

    assert_eq!(exit, SessionExit::ConnectFailed(SocketError::Refused));
    assert!(connector.stats.sends.is_empty());
}

#[test]
fn udp_sender_requests_exactly_one_restart() {
    let gate = open_gate();
    let clock = TestClock::default();
    let mut inbox = RecordingInbox::default();
    let mut restart = CountingRestart::default();
    let mut socket = FakeDatagram {
        fail_send_at: Some(5),
        ..FakeDatagram::default()
    };

    let mut session = SessionLoop::new(&gate, &clock, &mut inbox, GateDiscipline::StartupOnly);
    let exit = block_on(session.run_udp_sender(
        &mut socket,
        REMOTE,
        b"Hi",
        Duration::from_secs(1),
        &mut restart,
    ));

    assert_eq!(exit, SessionExit::RestartRequested);
    assert_eq!(restart.0, 1);
    assert_eq!(socket.bound, Some(0));
    assert_eq!(socket.sends.len(), 5);
    assert!(socket.sends.iter().all(|(remote, _)| *remote == REMOTE));
}

#[test]
fn startup_only_sender_keeps_going_after_gate_closes() {
    let gate = open_gate();
    let clock = TestClock {
        close_on_sleep: Some(&gate),
        ..TestClock::default()
    };
    let mut inbox = RecordingInbox::default();
    let mut restart = CountingRestart::default();
    let mut socket = FakeDatagram {
        fail_send_at: Some(3),
        ..FakeDatagram::default()
    };

    let mut session = SessionLoop::new(&gate, &clock, &mut inbox, GateDiscipline::StartupOnly);
    let exit = block_on(session.run_udp_sender(
        &mut socket,
        REMOTE,
        b"Hi",
        Duration::from_secs(1),
        &mut restart,
    ));

    assert_eq!(exit, SessionExit::RestartRequested);
    assert_eq!(socket.sends.len(), 3);
    assert!(!gate.is_set());
}

#[test]
fn every_cycle_sender_parks_when_gate_closes() {
    let gate = open_gate();
    let clock = TestClock {
        close_on_sleep: Some(&gate),
        ..TestClock::default()
    };
    let mut inbox = RecordingInbox::default();
    let mut restart = CountingRestart::default();
    let mut socket = FakeDatagram::default();

    {
        let mut session =
            SessionLoop::new(&gate, &clock, &mut inbox, GateDiscipline::EveryCycle);
        let run = session.run_udp_sender(
            &mut socket,
            REMOTE,
            b"Hi",
            Duration::from_secs(1),
            &mut restart,
        );
        assert!(poll_once(run).is_pending());
    }
    assert_eq!(socket.sends.len(), 1);
    assert_eq!(restart.0, 0);
}

#[test]
fn udp_receiver_logs_errors_and_keeps_receiving() {
    let gate = open_gate();
    let clock = TestClock::default();
    let mut inbox = RecordingInbox::default();
    let mut socket = FakeDatagram {
        incoming: VecDeque::from(vec![
            Ok((b"hello".to_vec(), PEER)),
            Err(SocketError::Io),
            Ok((vec![0xff, 0x00], PEER)),
        ]),
        ..FakeDatagram::default()
    };
    let poll_delay = Duration::from_millis(100);

    let mut session = SessionLoop::new(&gate, &clock, &mut inbox, GateDiscipline::EveryCycle);
    let exit = block_on(session.run_udp_receiver(&mut socket, PORT, poll_delay));

    assert_eq!(exit, SessionExit::SetupFailed(SocketError::Exhausted));
    assert_eq!(socket.bound, Some(PORT));
    assert_eq!(socket.receive_calls, 4);
    assert_eq!(
        inbox.messages,
        vec![
            (Some(PEER), b"hello".to_vec()),
            (Some(PEER), vec![0xff, 0x00]),
        ]
    );
    assert_eq!(*clock.sleeps.borrow(), vec![poll_delay; 3]);
}

#[test]
fn udp_receiver_bind_failure_ends_the_task() {
    let gate = open_gate();
    let clock = TestClock::default();
    let mut inbox = RecordingInbox::default();
    let mut socket = FakeDatagram {
        bind_error: Some(SocketError::Bind),
        ..FakeDatagram::default()
    };

    let mut session = SessionLoop::new(&gate, &clock, &mut inbox, GateDiscipline::EveryCycle);
    let exit = block_on(session.run_udp_receiver(&mut socket, PORT, Duration::from_millis(100)));

    assert_eq!(exit, SessionExit::SetupFailed(SocketError::Bind));
    assert_eq!(socket.receive_calls, 0);
}

#[test]
fn setup_errors_are_the_fatal_class() {
    assert!(SocketError::Create.is_setup());
    assert!(SocketError::Bind.is_setup());
    assert!(SocketError::Exhausted.is_setup());
    assert!(!SocketError::Reset.is_setup());
    assert!(!SocketError::TimedOut.is_setup());
}
