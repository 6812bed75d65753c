// ABOUTME: Background keepalive ticker: periodic liveness pings that transition a dead Conn to Closing
// ABOUTME: Adapted from the teacher's KeepAliveManager (client/keepalive.rs), rebuilt as a lightweight tokio task

use crate::client::conn::Conn;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Heartbeat cadence and failure threshold for one `Conn`'s keepaliver.
#[derive(Debug, Clone, Copy)]
pub struct KeepaliveParams {
    pub interval: Duration,
    pub ping_timeout: Duration,
    /// Consecutive ping failures before the connection is torn down.
    /// Defaults to 1: spec.md section 4.4 states a keepalive failure
    /// transitions the connection to `Closing` outright, with no grace
    /// threshold. The field stays configurable, grounded in the teacher's
    /// `KeepAliveManager` threshold design, for an embedder that wants to
    /// tolerate a flaky link rather than the spec's default strictness
    /// (see DESIGN.md).
    pub max_failures: u32,
}

impl Default for KeepaliveParams {
    fn default() -> Self {
        KeepaliveParams {
            interval: Duration::from_secs(60),
            ping_timeout: Duration::from_secs(60),
            max_failures: 1,
        }
    }
}

/// Spawns the keepaliver task. The task exits on its own once `conn` is
/// no longer open, or once `cancel` fires — whichever comes first.
pub fn spawn(conn: Conn, params: KeepaliveParams, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut consecutive_failures = 0u32;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(params.interval) => {}
            }

            if !conn.is_open() {
                break;
            }

            match conn.ping(params.ping_timeout).await {
                Ok(()) => {
                    consecutive_failures = 0;
                    debug!("keepalive ping ok");
                }
                Err(error) => {
                    consecutive_failures += 1;
                    warn!(%error, consecutive_failures, "keepalive ping failed");
                    if consecutive_failures >= params.max_failures {
                        warn!("keepalive failure threshold reached, closing connection");
                        conn.close();
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::conn::ConnOptions;
    use crate::pool::BufferPool;
    use crate::transport::Transport;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr);
        let ((server, _addr), client) = tokio::try_join!(listener.accept(), client).unwrap();
        (server, client)
    }

    #[tokio::test(start_paused = true)]
    async fn keepaliver_closes_conn_after_peer_vanishes() {
        // Exercises KeepaliveParams::default() itself (60s interval, 60s
        // ping timeout, single-failure threshold) rather than a sped-up
        // stand-in, using a paused clock so the test doesn't take two
        // real-world minutes.
        let (client_sock, server_sock) = loopback_pair().await;
        drop(server_sock);

        let pool = BufferPool::new();
        let conn = Conn::spawn(Transport::Tcp(client_sock), pool, ConnOptions::default());
        let params = KeepaliveParams::default();
        let cancel = CancellationToken::new();
        let handle = spawn(conn.clone(), params, cancel.clone());

        // The paused clock auto-advances to each timer's deadline once the
        // runtime has nothing else to do, so this resolves as soon as the
        // keepaliver's interval sleep and ping timeout have both elapsed,
        // without the test actually waiting two real-world minutes.
        tokio::time::timeout(Duration::from_secs(600), handle).await.unwrap().unwrap();
        assert!(!conn.is_open());
    }
}
