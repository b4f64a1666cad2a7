use core::net::SocketAddrV4;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Duration;
use log::{debug, error, info};

use super::transport::{bounded, Clock, Inbox, StreamConn, StreamConnector};
use super::{SessionExit, SessionLoop};

impl<M: RawMutex, C: Clock, I: Inbox> SessionLoop<'_, M, C, I> {
    /// Connects once and sends `payload` every `interval`. There is no
    /// reconnect: the first failure closes the stream and ends the loop.
    pub async fn run_tcp_client<T: StreamConnector>(
        &mut self,
        connector: &mut T,
        remote: SocketAddrV4,
        payload: &[u8],
        interval: Duration,
    ) -> SessionExit {
        self.await_gate(true).await;

        let mut conn =
            match bounded(&self.clock, self.timeouts.connect, connector.connect(remote)).await {
                Ok(conn) => conn,
                Err(err) => {
                    error!("session: tcp connect failed remote={} err={}", remote, err);
                    return SessionExit::ConnectFailed(err);
                }
            };
        info!("session: tcp connected remote={}", remote);

        loop {
            self.await_gate(false).await;
            if let Err(err) = bounded(&self.clock, self.timeouts.send, conn.send(payload)).await {
                error!(
                    "session: tcp send failed remote={} err={} sent={}",
                    remote, err, self.sent
                );
                conn.close().await;
                return SessionExit::SendFailed(err);
            }
            self.sent = self.sent.wrapping_add(1);
            debug!("session: tcp sent remote={} bytes={}", remote, payload.len());
            self.clock.sleep(interval).await;
        }
    }
}
