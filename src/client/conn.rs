// ABOUTME: The client-side multiplexed connection: sender/receiver tasks sharing a pending-call table
// ABOUTME: Adapted from examples/original_source/conn.go's invoke/do/serve loops, split across cooperative tasks

use crate::client::pending::{PendingMap, PendingOutcome};
use crate::connection::{Connection, ConnReader, ConnWriter};
use crate::descriptor::resolve_ordinal;
use crate::error::RpcError;
use crate::frame::{CONTROL_CMD, ERROR_CMD};
use crate::pool::BufferPool;
use crate::transport::Transport;
use bytes::Bytes;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Tuning knobs for one [`Conn`]. Defaults mirror spec.md section 4's
/// option table: a 65,535-entry send queue, a 120s idle I/O deadline, a
/// 5-attempt retry ceiling, and linear retry backoff (`retry_sleep x
/// attempt_index`) applied only to retryable errors.
#[derive(Debug, Clone)]
pub struct ConnOptions {
    pub read_buffer_size: usize,
    pub io_deadline: Duration,
    pub call_timeout: Duration,
    pub send_queue_capacity: usize,
    pub retry_max: usize,
    pub retry_backoff: Duration,
}

impl Default for ConnOptions {
    fn default() -> Self {
        ConnOptions {
            read_buffer_size: 32 * 1024,
            io_deadline: Duration::from_secs(120),
            call_timeout: Duration::from_secs(30),
            send_queue_capacity: 65_535,
            retry_max: 5,
            retry_backoff: Duration::from_secs(10),
        }
    }
}

/// Per-call overrides; absent fields fall back to the `Conn`'s defaults.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub deadline: Option<Duration>,
    pub trace: Option<crate::descriptor::TraceContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closing,
    Closed,
}

impl From<u8> for State {
    fn from(v: u8) -> Self {
        match v {
            0 => State::Open,
            1 => State::Closing,
            _ => State::Closed,
        }
    }
}

struct OutgoingFrame {
    seq: u16,
    cmd: u16,
    body: Bytes,
}

struct Shared {
    pending: PendingMap,
    methods: OnceLock<Vec<String>>,
    state: AtomicU8,
    cancel: CancellationToken,
    options: ConnOptions,
}

/// A single multiplexed connection to one server instance.
///
/// Three cooperative tasks share a [`PendingMap`] under `shared`: a sender
/// draining the outgoing queue, a receiver demultiplexing inbound frames by
/// `seq`, and (spawned separately by the dialer) a keepaliver. None of them
/// hold a lock across an I/O operation (spec.md section 4.4 concurrency
/// invariants C3-C4); the pending map's critical sections are pure
/// bookkeeping.
#[derive(Clone)]
pub struct Conn {
    shared: Arc<Shared>,
    send_tx: mpsc::Sender<OutgoingFrame>,
}

impl Conn {
    /// Wraps an already-established transport and spawns its sender and
    /// receiver tasks. The returned `Conn` is not yet usable for
    /// application calls until [`Conn::bootstrap`] completes.
    pub fn spawn(transport: Transport, pool: BufferPool, options: ConnOptions) -> Conn {
        let (send_tx, send_rx) = mpsc::channel(options.send_queue_capacity);
        let shared = Arc::new(Shared {
            pending: PendingMap::new(),
            methods: OnceLock::new(),
            state: AtomicU8::new(State::Open as u8),
            cancel: CancellationToken::new(),
            options,
        });

        let (read_half, write_half) = Connection::split(transport, shared.options.read_buffer_size, pool);

        tokio::spawn(sender_loop(shared.clone(), write_half, send_rx));
        tokio::spawn(receiver_loop(shared.clone(), read_half));

        Conn { shared, send_tx }
    }

    /// Performs the synchronous control-frame round trip every dial
    /// completes before handing a `Conn` back to the caller (spec.md
    /// section 4.3 "bootstrap"). The reply body is parsed as a UTF-8 JSON
    /// array of method names; when `expected` is supplied, a mismatching
    /// set is rejected with `UnknownMethod` (spec.md section 8, scenario
    /// "method-ordinal drift").
    pub async fn bootstrap(&self, timeout: Duration, expected: Option<&[String]>) -> Result<(), RpcError> {
        let deadline = Instant::now() + timeout;
        let (seq, generation, rx) = self.shared.pending.allocate(deadline)?;
        self.send_tx
            .send(OutgoingFrame {
                seq,
                cmd: CONTROL_CMD,
                body: Bytes::new(),
            })
            .await
            .map_err(|_| RpcError::Shutdown)?;

        let outcome = tokio::time::timeout(timeout, rx).await.map_err(|_| {
            self.shared.pending.abandon(seq, generation);
            RpcError::Timeout
        })?;
        let frame = match outcome.map_err(|_| RpcError::Shutdown)? {
            PendingOutcome::Response(frame) => frame,
            PendingOutcome::Shutdown => return Err(RpcError::Shutdown),
        };

        let names: Vec<String> = serde_json::from_slice(&frame.body)
            .map_err(|e| RpcError::Decode(format!("describe reply: {e}")))?;

        if let Some(expected) = expected {
            let mut have: Vec<&str> = names.iter().map(String::as_str).collect();
            let mut want: Vec<&str> = expected.iter().map(String::as_str).collect();
            have.sort_unstable();
            want.sort_unstable();
            if have != want {
                return Err(RpcError::UnknownMethod(format!(
                    "peer method set {names:?} does not match expected {expected:?}"
                )));
            }
        }

        let _ = self.shared.methods.set(names);
        Ok(())
    }

    /// Sends a heartbeat control frame and waits for the peer's reply,
    /// used by the keepaliver task to detect a silently dead peer (spec.md
    /// section 4.3 "liveness"). Does not touch the method table.
    pub async fn ping(&self, timeout: Duration) -> Result<(), RpcError> {
        let deadline = Instant::now() + timeout;
        let (seq, generation, rx) = self.shared.pending.allocate(deadline)?;
        if self
            .send_tx
            .try_send(OutgoingFrame {
                seq,
                cmd: CONTROL_CMD,
                body: Bytes::new(),
            })
            .is_err()
        {
            self.shared.pending.abandon(seq, generation);
            return Err(RpcError::Overloaded);
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(PendingOutcome::Response(_))) => Ok(()),
            Ok(Ok(PendingOutcome::Shutdown)) => Err(RpcError::Shutdown),
            Ok(Err(_)) => Err(RpcError::Shutdown),
            Err(_) => {
                self.shared.pending.abandon(seq, generation);
                Err(RpcError::Timeout)
            }
        }
    }

    /// Invokes a remote method, retrying retryable failures with linear
    /// backoff up to `retry_max` times (spec.md section 4.4 "Retries").
    pub async fn invoke(&self, method: &str, request: Bytes, opts: CallOptions) -> Result<Bytes, RpcError> {
        let names = self.shared.methods.get().ok_or(RpcError::Shutdown)?;
        let ordinal = resolve_ordinal(names, method).ok_or_else(|| RpcError::UnknownMethod(method.to_string()))?;
        let call_timeout = opts.deadline.unwrap_or(self.shared.options.call_timeout);

        let mut attempt = 0usize;
        loop {
            if State::from(self.shared.state.load(Ordering::Acquire)) != State::Open {
                return Err(RpcError::Shutdown);
            }

            match self.try_once(ordinal, request.clone(), call_timeout).await {
                Ok(reply) => return Ok(reply),
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.shared.options.retry_max {
                        return Err(err);
                    }
                    attempt += 1;
                    warn!(method, attempt, error = %err, "retrying rpc call");
                    tokio::time::sleep(self.shared.options.retry_backoff * attempt as u32).await;
                }
            }
        }
    }

    async fn try_once(&self, ordinal: u16, request: Bytes, call_timeout: Duration) -> Result<Bytes, RpcError> {
        let deadline = Instant::now() + call_timeout;
        let (seq, generation, rx) = self.shared.pending.allocate(deadline)?;

        match self.send_tx.try_send(OutgoingFrame { seq, cmd: ordinal, body: request }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.shared.pending.abandon(seq, generation);
                return Err(RpcError::Overloaded);
            }
            Err(TrySendError::Closed(_)) => {
                self.shared.pending.abandon(seq, generation);
                return Err(RpcError::Shutdown);
            }
        }

        tokio::select! {
            _ = self.shared.cancel.cancelled() => {
                self.shared.pending.abandon(seq, generation);
                Err(RpcError::Shutdown)
            }
            outcome = tokio::time::timeout(call_timeout, rx) => {
                match outcome {
                    Ok(Ok(PendingOutcome::Response(frame))) => {
                        if frame.cmd == ERROR_CMD {
                            Err(RpcError::Application(String::from_utf8_lossy(&frame.body).into_owned()))
                        } else {
                            Ok(frame.body.freeze())
                        }
                    }
                    Ok(Ok(PendingOutcome::Shutdown)) => Err(RpcError::Shutdown),
                    Ok(Err(_recv_error)) => Err(RpcError::Shutdown),
                    Err(_elapsed) => {
                        self.shared.pending.abandon(seq, generation);
                        Err(RpcError::Timeout)
                    }
                }
            }
        }
    }

    /// Idempotent transition to `Closing`: cancels background tasks and
    /// wakes every parked caller with `Shutdown` (spec.md section 4.5
    /// "Open -> Closing -> Closed").
    pub fn close(&self) {
        if self
            .shared
            .state
            .compare_exchange(State::Open as u8, State::Closing as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("conn closing");
            self.shared.cancel.cancel();
            self.shared.pending.shutdown_all();
        }
    }

    pub fn is_open(&self) -> bool {
        State::from(self.shared.state.load(Ordering::Acquire)) == State::Open
    }
}

async fn sender_loop(shared: Arc<Shared>, mut write_half: ConnWriter, mut send_rx: mpsc::Receiver<OutgoingFrame>) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            frame = send_rx.recv() => {
                let Some(frame) = frame else { break };
                let result = write_half.write_frame(shared.options.io_deadline, frame.seq, frame.cmd, &frame.body).await;
                if let Err(error) = result {
                    warn!(%error, "write failed, closing connection");
                    shared.cancel.cancel();
                    shared.pending.shutdown_all();
                    shared.state.store(State::Closing as u8, Ordering::Release);
                    break;
                }
            }
        }
    }
    let _ = write_half.shutdown().await;
    shared.state.store(State::Closed as u8, Ordering::Release);
}

async fn receiver_loop(shared: Arc<Shared>, mut read_half: ConnReader) {
    loop {
        let frame = {
            tokio::select! {
                _ = shared.cancel.cancelled() => break,
                result = read_half.read_frame(shared.options.io_deadline) => result,
            }
        };

        match frame {
            Ok(Some(frame)) => {
                debug!(seq = frame.seq, cmd = frame.cmd, "frame received");
                shared.pending.deliver(frame.seq, frame);
            }
            Ok(None) => {
                debug!("peer closed connection");
                break;
            }
            Err(error) => {
                warn!(%error, "read failed, closing connection");
                break;
            }
        }
    }
    shared.cancel.cancel();
    shared.pending.shutdown_all();
    shared.state.store(State::Closing as u8, Ordering::Release);
}
