use core::net::SocketAddrV4;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Duration;
use log::{debug, error, info, warn};

use super::transport::{bounded, Clock, DatagramSocket, Inbox, Restart};
use super::{SessionExit, SessionLoop, MAX_PAYLOAD_LEN};

impl<M: RawMutex, C: Clock, I: Inbox> SessionLoop<'_, M, C, I> {
    /// Sends `payload` to `remote` every `interval` from an ephemeral port.
    /// The first failed send asks for exactly one device restart.
    pub async fn run_udp_sender<S: DatagramSocket, R: Restart>(
        &mut self,
        socket: &mut S,
        remote: SocketAddrV4,
        payload: &[u8],
        interval: Duration,
        mut restart: R,
    ) -> SessionExit {
        if let Err(err) = socket.bind(0).await {
            error!("session: udp bind failed port=0 err={}", err);
            return SessionExit::SetupFailed(err);
        }
        info!("session: udp sending remote={}", remote);

        let mut first = true;
        loop {
            self.await_gate(first).await;
            first = false;

            let sent = bounded(
                &self.clock,
                self.timeouts.send,
                socket.send_to(remote, payload),
            )
            .await;
            if let Err(err) = sent {
                error!(
                    "session: udp send failed remote={} err={} sent={} action=restart",
                    remote, err, self.sent
                );
                restart.restart();
                return SessionExit::RestartRequested;
            }
            self.sent = self.sent.wrapping_add(1);
            debug!("session: udp sent remote={} bytes={}", remote, payload.len());
            self.clock.sleep(interval).await;
        }
    }

    /// Receives datagrams on `port` and delivers each one, pausing
    /// `poll_delay` between cycles. Receive errors are logged and skipped.
    pub async fn run_udp_receiver<S: DatagramSocket>(
        &mut self,
        socket: &mut S,
        port: u16,
        poll_delay: Duration,
    ) -> SessionExit {
        if let Err(err) = socket.bind(port).await {
            error!("session: udp bind failed port={} err={}", port, err);
            return SessionExit::SetupFailed(err);
        }
        info!("session: udp listening port={}", port);

        let mut first = true;
        loop {
            self.await_gate(first).await;
            first = false;

            let received = bounded(
                &self.clock,
                self.timeouts.receive,
                socket.receive_from(&mut self.buffer[..MAX_PAYLOAD_LEN]),
            )
            .await;
            match received {
                Ok((0, peer)) => debug!("session: empty datagram peer={}", peer),
                Ok((len, peer)) => self.deliver(Some(peer), len),
                Err(err) if err.is_setup() => {
                    error!("session: udp receive failed err={} fatal=true", err);
                    return SessionExit::SetupFailed(err);
                }
                Err(err) => warn!("session: udp receive failed err={}", err),
            }
            self.clock.sleep(poll_delay).await;
        }
    }
}
