// ABOUTME: Server: accept loop spawning one dispatcher task per connection
// ABOUTME: Adapted from examples/original_source/server.go's Server.ListenAndServe

pub mod dispatcher;

pub use dispatcher::ServerOptions;

use crate::pool::BufferPool;
use crate::transport::Transport;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Accepts TCP connections on `listener` and spawns one dispatcher task
/// per connection, until `cancel` fires. Mirrors the original source's
/// `ListenAndServe`: a single accept failure is logged and retried rather
/// than torn down (transient accept errors must not kill the server).
pub async fn listen(listener: TcpListener, options: ServerOptions, cancel: CancellationToken) {
    let pool = BufferPool::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("server shutting down");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        info!(%peer, "accepted connection");
                        let options = options.clone();
                        let pool = pool.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(dispatcher::serve(Transport::Tcp(socket), pool, options, cancel));
                    }
                    Err(error) => {
                        warn!(%error, "accept failed");
                    }
                }
            }
        }
    }
}

/// The QUIC-like counterpart of [`listen`]: accepts connections on a
/// `quinn::Endpoint` and, for each, opens the single bidirectional stream
/// the dialer is expected to open (spec.md section 6 "one stream per
/// Conn"), then dispatches it exactly like a TCP connection.
pub async fn listen_quic(endpoint: quinn::Endpoint, options: ServerOptions, cancel: CancellationToken) {
    let pool = BufferPool::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("quic server shutting down");
                return;
            }
            incoming = endpoint.accept() => {
                let Some(incoming) = incoming else { return };
                let options = options.clone();
                let pool = pool.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let connection = match incoming.await {
                        Ok(connection) => connection,
                        Err(error) => {
                            warn!(%error, "quic handshake failed");
                            return;
                        }
                    };
                    let (send, recv) = match connection.accept_bi().await {
                        Ok(stream) => stream,
                        Err(error) => {
                            warn!(%error, "quic stream accept failed");
                            return;
                        }
                    };
                    let transport = Transport::Quic(crate::transport::QuicStream::new(send, recv));
                    dispatcher::serve(transport, pool, options, cancel).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Handler, HandlerFuture, Payload, ServiceDescriptor};
    use crate::frame::{read_frame, write_frame, CONTROL_CMD};
    use crate::pool::BufferPool;
    use std::sync::Arc;
    use tokio::net::TcpStream;

    fn echo_handler() -> Handler {
        Arc::new(|_ctx, payload: Payload| -> HandlerFuture { Box::pin(async move { Ok(payload) }) })
    }

    #[tokio::test]
    async fn accept_loop_serves_multiple_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = ServiceDescriptor::builder().method("Echo", echo_handler()).build();
        let options = ServerOptions::new(service);
        let cancel = CancellationToken::new();
        tokio::spawn(listen(listener, options, cancel.clone()));

        for i in 0..3u16 {
            let mut client = TcpStream::connect(addr).await.unwrap();
            let pool = BufferPool::new();
            write_frame(&mut client, &pool, i, CONTROL_CMD, b"").await.unwrap();
            let reply = read_frame(&mut client, 65535).await.unwrap().unwrap();
            assert_eq!(reply.seq, i);
        }
        cancel.cancel();
    }
}
