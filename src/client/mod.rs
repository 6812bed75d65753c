// ABOUTME: Client-side multiplexer: Conn, its pending-call table, and the keepalive task
// ABOUTME: Adapted from the teacher's client/ submodule layout (mod.rs, builder.rs, keepalive.rs)

pub mod conn;
pub mod keepalive;
pub mod pending;

pub use conn::{CallOptions, Conn, ConnOptions};
pub use keepalive::KeepaliveParams;
