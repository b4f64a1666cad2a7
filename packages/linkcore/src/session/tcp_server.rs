use core::net::SocketAddrV4;

use embassy_sync::blocking_mutex::raw::RawMutex;
use log::{debug, error, info, warn};

use super::transport::{bounded, Clock, Inbox, SocketError, StreamAcceptor, StreamConn};
use super::{SessionExit, SessionLoop, ACCEPT_RETRY_DELAY, MAX_PAYLOAD_LEN};

impl<M: RawMutex, C: Clock, I: Inbox> SessionLoop<'_, M, C, I> {
    /// Accepts one client at a time and delivers everything it sends until it
    /// closes. Only a setup failure ends the loop.
    pub async fn run_tcp_server<A: StreamAcceptor>(
        &mut self,
        acceptor: &mut A,
        port: u16,
    ) -> SessionExit {
        if let Err(err) = acceptor.bind(port).await {
            error!("session: tcp bind failed port={} err={}", port, err);
            return SessionExit::SetupFailed(err);
        }
        info!("session: tcp listening port={}", port);

        let mut first = true;
        loop {
            self.await_gate(first).await;
            first = false;

            let (mut conn, peer) =
                match bounded(&self.clock, self.timeouts.accept, acceptor.accept()).await {
                    Ok(accepted) => accepted,
                    Err(err) if err.is_setup() => {
                        error!("session: accept failed err={} fatal=true", err);
                        return SessionExit::SetupFailed(err);
                    }
                    Err(err) => {
                        warn!(
                            "session: accept failed err={} retry_ms={}",
                            err,
                            ACCEPT_RETRY_DELAY.as_millis()
                        );
                        self.clock.sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                };

            info!("session: client connected peer={}", peer);
            let total = self.drain_stream(&mut conn, peer).await;
            conn.close().await;
            info!("session: client closed peer={} bytes={}", peer, total);
        }
    }

    async fn drain_stream<S: StreamConn>(&mut self, conn: &mut S, peer: SocketAddrV4) -> usize {
        let mut total = 0;
        loop {
            let received = bounded(
                &self.clock,
                self.timeouts.receive,
                conn.receive(&mut self.buffer[..MAX_PAYLOAD_LEN]),
            )
            .await;
            match received {
                Ok(0) => {
                    debug!("session: peer finished peer={}", peer);
                    return total;
                }
                Ok(len) => {
                    total += len;
                    self.deliver(Some(peer), len);
                }
                Err(SocketError::TimedOut) => {
                    warn!("session: receive timed out peer={}", peer);
                    return total;
                }
                Err(err) => {
                    warn!("session: receive failed peer={} err={}", peer, err);
                    return total;
                }
            }
        }
    }
}
