// ABOUTME: Dial/listen factory: opens one Conn per instance and bootstraps it before handing back a facade
// ABOUTME: Adapted from examples/original_source/dial.go's network switch and synchronous ping-on-connect

use crate::client::conn::{Conn, ConnOptions};
use crate::client::keepalive::{self, KeepaliveParams};
use crate::discovery::{DiscoveryResult, Instance};
use crate::error::RpcError;
use crate::facade::ClientFacade;
use crate::pool::BufferPool;
use crate::transport::{Network, QuicStream, Transport};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Options governing how [`dial`] opens and bootstraps each `Conn`.
#[derive(Debug, Clone)]
pub struct DialOptions {
    pub conn: ConnOptions,
    pub keepalive: KeepaliveParams,
    pub bootstrap_timeout: Duration,
    /// When set, every dialed instance's describe reply must match this
    /// exact method set, or the dial fails (spec.md section 8, scenario
    /// "method-ordinal drift").
    pub expected_methods: Option<Vec<String>>,
}

impl Default for DialOptions {
    fn default() -> Self {
        DialOptions {
            conn: ConnOptions::default(),
            keepalive: KeepaliveParams::default(),
            bootstrap_timeout: Duration::from_secs(5),
            expected_methods: None,
        }
    }
}

/// Dials every instance in `instances`, bootstraps each `Conn`
/// synchronously, and returns a [`ClientFacade`] that routes calls across
/// them by `route_index`.
///
/// Invariant D1: instances are dialed in `route_index` order so the
/// resulting facade's connection vector lines up positionally
/// (spec.md section 4.8). A single instance's dial or bootstrap failure
/// fails the whole call — partial facades are not returned.
pub async fn dial(instances: Vec<Instance>, options: DialOptions) -> Result<ClientFacade, RpcError> {
    let mut ordered = instances.clone();
    ordered.sort_by_key(|i| i.route_index);

    let mut connections = Vec::with_capacity(ordered.len());
    let pool = BufferPool::new();
    let cancel = CancellationToken::new();

    for instance in &ordered {
        let network: Network = instance
            .network
            .parse()
            .map_err(|_| RpcError::Decode(format!("unrecognized network {:?}", instance.network)))?;

        let transport = open_transport(network, &instance.address()).await?;
        let conn = Conn::spawn(transport, pool.clone(), options.conn.clone());
        conn.bootstrap(options.bootstrap_timeout, options.expected_methods.as_deref())
            .await?;
        info!(address = %instance.address(), "dialed and bootstrapped connection");

        keepalive::spawn(conn.clone(), options.keepalive, cancel.clone());
        connections.push(conn);
    }

    let result = DiscoveryResult::new(ordered);
    Ok(ClientFacade::new(connections, result))
}

async fn open_transport(network: Network, address: &str) -> Result<Transport, RpcError> {
    match network {
        Network::Tcp | Network::Tcp4 => {
            let socket = tokio::net::TcpStream::connect(address).await?;
            Ok(Transport::Tcp(socket))
        }
        Network::Udp => open_quic_transport(address).await,
    }
}

async fn open_quic_transport(address: &str) -> Result<Transport, RpcError> {
    let client_config = crate::transport::quic_client_config()
        .map_err(|e| RpcError::Io(std::io::Error::other(e.to_string())))?;

    let socket_addr: std::net::SocketAddr = address
        .parse()
        .map_err(|e| RpcError::Decode(format!("invalid quic address {address:?}: {e}")))?;

    let mut endpoint = quinn::Endpoint::client("0.0.0.0:0".parse().unwrap())
        .map_err(|e| RpcError::Io(std::io::Error::other(e.to_string())))?;
    endpoint.set_default_client_config(client_config);

    let connecting = endpoint
        .connect(socket_addr, "localhost")
        .map_err(|e| RpcError::Io(std::io::Error::other(e.to_string())))?;
    let connection = connecting.await.map_err(|e| RpcError::Io(std::io::Error::other(e.to_string())))?;
    let (send, recv) = connection
        .open_bi()
        .await
        .map_err(|e| RpcError::Io(std::io::Error::other(e.to_string())))?;
    Ok(Transport::Quic(QuicStream::new(send, recv)))
}

/// Binds a TCP listener on `address` and returns it ready for
/// [`crate::server::listen`]. The QUIC-like counterpart lives in
/// [`crate::transport::quic_server_config`] plus `quinn::Endpoint::server`.
pub async fn listen_tcp(address: &str) -> std::io::Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(address).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Handler, HandlerFuture, Payload, ServiceDescriptor};
    use crate::server::{self, ServerOptions};
    use bytes::Bytes;

    fn echo_handler() -> Handler {
        std::sync::Arc::new(|_ctx, payload: Payload| -> HandlerFuture { Box::pin(async move { Ok(payload) }) })
    }

    #[tokio::test]
    async fn dial_bootstraps_and_invokes_over_tcp() {
        let listener = listen_tcp("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = ServiceDescriptor::builder().method("Echo", echo_handler()).build();
        let options = ServerOptions::new(service);
        tokio::spawn(server::listen(listener, options, CancellationToken::new()));

        let instance = Instance::new("tcp", addr.ip().to_string(), addr.port(), 0);
        let facade = dial(vec![instance], DialOptions::default()).await.unwrap();
        assert_eq!(facade.instance_count(), 1);

        let reply = facade
            .invoke("Echo", Bytes::from_static(b"hello"), crate::client::CallOptions::default())
            .await
            .unwrap();
        assert_eq!(&reply[..], b"hello");
    }

    #[tokio::test]
    async fn dial_rejects_unrecognized_network() {
        let instance = Instance::new("sctp", "127.0.0.1", 9999, 0);
        let err = dial(vec![instance], DialOptions::default()).await.unwrap_err();
        assert!(matches!(err, RpcError::Decode(_)));
    }
}
