//! Media-Stream Sessions
//!
//! - `transport`: a uniform duplex link over axum and tokio-tungstenite sockets.
//! - `agent`: opens the agent transport for a call.
//! - `session`: the per-call receive loop that drives the core state machine.

pub mod agent;
pub mod session;
pub mod transport;

pub use session::ws_handler;
