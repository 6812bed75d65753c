// ABOUTME: Client facade: routes a call through a balancer-picked instance to its backing Conn
// ABOUTME: Adapted from examples/original_source/client.go's ClientConn, grounded on its invoke/re-pick retry loop

use crate::balance::{Balancer, RandomBalancer};
use crate::client::{CallOptions, Conn};
use crate::discovery::DiscoveryResult;
use crate::error::RpcError;
use bytes::Bytes;
use std::sync::Arc;

/// Maximum number of times [`ClientFacade::invoke`] will re-pick an
/// instance and retry after a retryable `Conn`-level failure (spec.md
/// section 4.7).
const DEFAULT_MAX_RETRY: usize = 2;

/// Routes calls across every instance a resolver returned, one [`Conn`]
/// per instance, indexed by `Instance::route_index` (spec.md section 9
/// REDESIGN FLAG on the original's misnamed `weight` field).
pub struct ClientFacade {
    connections: Vec<Conn>,
    result: DiscoveryResult,
    balancer: Arc<dyn Balancer>,
    max_retry: usize,
}

impl std::fmt::Debug for ClientFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientFacade")
            .field("result", &self.result)
            .field("max_retry", &self.max_retry)
            .finish_non_exhaustive()
    }
}

impl ClientFacade {
    pub fn new(connections: Vec<Conn>, result: DiscoveryResult) -> Self {
        ClientFacade {
            connections,
            result,
            balancer: Arc::new(RandomBalancer),
            max_retry: DEFAULT_MAX_RETRY,
        }
    }

    pub fn with_balancer(mut self, balancer: Arc<dyn Balancer>) -> Self {
        self.balancer = balancer;
        self
    }

    pub fn with_max_retry(mut self, max_retry: usize) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn instance_count(&self) -> usize {
        self.connections.len()
    }

    /// Invokes `method`, failing fast with [`RpcError::NoInstance`] when
    /// there is nothing to route to (spec.md section 4.7, property
    /// "fail fast on empty instances").
    pub async fn invoke(&self, method: &str, request: Bytes, opts: CallOptions) -> Result<Bytes, RpcError> {
        if self.connections.is_empty() {
            return Err(RpcError::NoInstance);
        }

        let ctx = crate::descriptor::CallContext { trace: opts.trace };
        let mut attempt = 0usize;
        loop {
            let picker = self.balancer.get_picker(&self.result);
            let instance = picker.next(&ctx, &request);
            let conn = self
                .connections
                .get(instance.route_index)
                .ok_or(RpcError::NoInstance)?;

            match conn.invoke(method, request.clone(), opts.clone()).await {
                Ok(reply) => return Ok(reply),
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.max_retry {
                        return Err(err);
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Closes every underlying connection (spec.md section 4.5).
    pub fn close(&self) {
        for conn in &self.connections {
            conn.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ConnOptions;
    use crate::descriptor::{Handler, HandlerFuture, Payload, ServiceDescriptor};
    use crate::discovery::Instance;
    use crate::pool::BufferPool;
    use crate::server::{self, ServerOptions};
    use crate::transport::Transport;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::sync::CancellationToken;

    fn echo_handler() -> Handler {
        Arc::new(|_ctx, payload: Payload| -> HandlerFuture { Box::pin(async move { Ok(payload) }) })
    }

    async fn spawn_echo_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = ServiceDescriptor::builder().method("Echo", echo_handler()).build();
        let options = ServerOptions::new(service);
        tokio::spawn(server::listen(listener, options, CancellationToken::new()));
        addr
    }

    async fn dial_bootstrapped(addr: std::net::SocketAddr) -> Conn {
        let socket = TcpStream::connect(addr).await.unwrap();
        let pool = BufferPool::new();
        let conn = Conn::spawn(Transport::Tcp(socket), pool, ConnOptions::default());
        conn.bootstrap(std::time::Duration::from_secs(2), None).await.unwrap();
        conn
    }

    #[tokio::test]
    async fn empty_facade_fails_fast() {
        let facade = ClientFacade::new(Vec::new(), DiscoveryResult::default());
        let err = facade.invoke("Echo", Bytes::new(), CallOptions::default()).await.unwrap_err();
        assert!(matches!(err, RpcError::NoInstance));
    }

    #[tokio::test]
    async fn invoke_routes_through_the_matching_connection() {
        let addr = spawn_echo_server().await;
        let conn = dial_bootstrapped(addr).await;
        let instance = Instance::new("tcp", addr.ip().to_string(), addr.port(), 0);
        let result = DiscoveryResult::new(vec![instance]);
        let facade = ClientFacade::new(vec![conn], result);

        let reply = facade
            .invoke("Echo", Bytes::from_static(b"hi"), CallOptions::default())
            .await
            .unwrap();
        assert_eq!(&reply[..], b"hi");
    }
}
