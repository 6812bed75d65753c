// ABOUTME: Service descriptor: the method table shared by server dispatch and client bootstrap
// ABOUTME: Grounded on grpc.ServiceDesc / grpc.MethodDesc from examples/original_source/server.go

use crate::error::RpcError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Opaque, boxed request/reply bytes handed to and returned from a method
/// handler. The payload schema codec (encode/decode) is an external
/// collaborator per spec.md section 1; this crate only ever sees bytes.
pub type Payload = bytes::Bytes;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Payload, RpcError>> + Send>>;

/// A method's handler trampoline: given the raw request body and a call
/// context, decode, invoke the user implementation (possibly through an
/// interceptor chain), and return the encoded reply bytes.
///
/// Generated service code supplies one of these per RPC method; this
/// crate never sees the generated request/response types directly.
pub type Handler = Arc<dyn Fn(CallContext, Payload) -> HandlerFuture + Send + Sync>;

/// Per-call context threaded through a handler invocation.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub trace: Option<TraceContext>,
}

/// Propagated trace identifiers (spec.md section 1: "only the propagation
/// of trace identifiers through the frame is in scope").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraceContext {
    pub trace_id: u128,
    pub span_id: u64,
}

/// One entry in a [`ServiceDescriptor`]'s method table.
#[derive(Clone)]
pub struct Method {
    pub name: &'static str,
    pub handler: Handler,
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method").field("name", &self.name).finish()
    }
}

/// Middleware wrapping every unary call a server dispatches.
///
/// Mirrors `UnaryServerInterceptor` from the original source
/// (`driver.go`): `interceptor(ctx, req, info, next) -> reply`.
pub type Next = Arc<dyn Fn(CallContext, Payload) -> HandlerFuture + Send + Sync>;
pub type UnaryInterceptor =
    Arc<dyn Fn(CallContext, Payload, Next) -> HandlerFuture + Send + Sync>;

/// Immutable table of methods, registered once at server construction and
/// once at client dial. Ordinals are the positional index into `methods`;
/// `0xFFFF` is reserved for control frames (spec.md section 3).
#[derive(Clone, Debug, Default)]
pub struct ServiceDescriptor {
    methods: Vec<Method>,
}

impl ServiceDescriptor {
    pub fn new(methods: Vec<Method>) -> Self {
        ServiceDescriptor { methods }
    }

    pub fn builder() -> ServiceDescriptorBuilder {
        ServiceDescriptorBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.methods.iter().map(|m| m.name.to_string()).collect()
    }

    /// Looks up a method by its ordinal (the server-side dispatch path).
    pub fn by_ordinal(&self, ordinal: u16) -> Option<&Method> {
        self.methods.get(ordinal as usize)
    }

    /// Resolves a method name to its ordinal using only the trailing
    /// "basename" after the last `/`, matching the original source's
    /// `filepath.Base(method)` comparison in `conn.go`/`sender.go`.
    pub fn ordinal_of(&self, method_name: &str) -> Option<u16> {
        let base = basename(method_name);
        self.methods
            .iter()
            .position(|m| basename(m.name) == base)
            .map(|i| i as u16)
    }
}

pub(crate) fn basename(method: &str) -> &str {
    method.rsplit('/').next().unwrap_or(method)
}

/// The client-side counterpart of [`ServiceDescriptor::ordinal_of`]: the
/// client only ever learns a flat list of names from the describe reply,
/// never the handlers, so it resolves against `&[String]` instead of a
/// full descriptor.
pub fn resolve_ordinal(names: &[String], method_name: &str) -> Option<u16> {
    let base = basename(method_name);
    names.iter().position(|n| basename(n) == base).map(|i| i as u16)
}

#[derive(Default)]
pub struct ServiceDescriptorBuilder {
    methods: Vec<Method>,
}

impl ServiceDescriptorBuilder {
    pub fn method(mut self, name: &'static str, handler: Handler) -> Self {
        self.methods.push(Method { name, handler });
        self
    }

    pub fn build(self) -> ServiceDescriptor {
        ServiceDescriptor::new(self.methods)
    }
}
