// ABOUTME: Per-connection dispatch loop: read a frame, resolve a method or describe, reply
// ABOUTME: Adapted from examples/original_source/server.go's Server.serve/Handler.Handle loop

use crate::connection::Connection;
use crate::descriptor::{CallContext, ServiceDescriptor, UnaryInterceptor};
use crate::frame::{CONTROL_CMD, ERROR_CMD};
use crate::pool::BufferPool;
use crate::transport::Transport;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tuning knobs for one accepted connection's dispatch loop.
#[derive(Clone)]
pub struct ServerOptions {
    pub service: Arc<ServiceDescriptor>,
    pub interceptor: Option<UnaryInterceptor>,
    pub read_buffer_size: usize,
    /// Idle timeout: how long the connection may sit without a single
    /// frame arriving before it is torn down (spec.md section 4.3).
    pub timeout: Duration,
}

impl ServerOptions {
    pub fn new(service: ServiceDescriptor) -> Self {
        ServerOptions {
            service: Arc::new(service),
            interceptor: None,
            read_buffer_size: 32 * 1024,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_interceptor(mut self, interceptor: UnaryInterceptor) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Runs the dispatch loop for one accepted connection until the peer
/// disconnects, a frame error occurs, or `cancel` fires. Unlike the
/// original source, a handler error never tears down the connection: it
/// is reported back to the caller as an `ERROR_CMD` frame on the same
/// `seq` (spec.md section 9 REDESIGN FLAG, recorded in DESIGN.md).
pub async fn serve(transport: Transport, pool: BufferPool, options: ServerOptions, cancel: CancellationToken) {
    let mut connection = Connection::new(transport, options.read_buffer_size, pool);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("dispatcher cancelled");
                break;
            }
            result = connection.read_frame(options.timeout) => result,
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("peer closed connection");
                break;
            }
            Err(error) => {
                warn!(%error, "dispatcher read failed");
                break;
            }
        };

        let reply = if frame.cmd as usize >= options.service.len() {
            let names = options.service.names();
            match serde_json::to_vec(&names) {
                Ok(body) => (frame.cmd, body),
                Err(error) => {
                    warn!(%error, "failed to encode describe reply");
                    break;
                }
            }
        } else {
            match options.service.by_ordinal(frame.cmd) {
                None => {
                    let message = format!("unknown method ordinal {}", frame.cmd);
                    (ERROR_CMD, message.into_bytes())
                }
                Some(method) => {
                    let ctx = CallContext::default();
                    let payload = Bytes::copy_from_slice(&frame.body);
                    let result = invoke(method.handler.clone(), options.interceptor.clone(), ctx, payload).await;
                    match result {
                        Ok(reply) => (frame.cmd, reply.to_vec()),
                        Err(error) => {
                            info!(method = method.name, %error, "handler returned an error");
                            (ERROR_CMD, error.to_string().into_bytes())
                        }
                    }
                }
            }
        };

        if let Err(error) = connection
            .write_frame(options.timeout, frame.seq, reply.0, &reply.1)
            .await
        {
            warn!(%error, "dispatcher write failed");
            break;
        }
    }
}

async fn invoke(
    handler: crate::descriptor::Handler,
    interceptor: Option<UnaryInterceptor>,
    ctx: CallContext,
    payload: Bytes,
) -> Result<Bytes, crate::error::RpcError> {
    match interceptor {
        None => handler(ctx, payload).await,
        Some(interceptor) => interceptor(ctx, payload, handler).await,
    }
}
