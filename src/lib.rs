//! A lightweight unary RPC multiplexer over a compact binary frame format.
//!
//! An application registers methods on a [`descriptor::ServiceDescriptor`],
//! serves them with [`server::listen`], and calls them from a
//! [`facade::ClientFacade`] obtained via [`dial::dial`] — all while
//! multiplexing many concurrent calls over a single connection per
//! instance (see [`client::conn::Conn`]).

pub mod balance;
pub mod client;
pub mod connection;
pub mod descriptor;
pub mod dial;
pub mod discovery;
pub mod error;
pub mod facade;
pub mod frame;
pub mod pool;
pub mod server;
pub mod transport;

pub use client::{CallOptions, Conn, ConnOptions};
pub use descriptor::{CallContext, Method, Payload, ServiceDescriptor, TraceContext};
pub use dial::{dial, DialOptions};
pub use discovery::{Change, DiscoveryResult, Instance, Resolver};
pub use error::{Result, RpcError};
pub use facade::ClientFacade;
pub use frame::Frame;
pub use server::ServerOptions;
