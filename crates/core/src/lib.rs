//! Voice Agent Core
//!
//! Pure, I/O-free building blocks for the telephony audio bridge: the agent
//! configuration record and the handshake built from it, the wire protocols of
//! both transports, the inbound audio framer, and the per-call session state
//! machine. The `voiceagent-bridge` service wires these to real sockets.

pub mod agent_config;
pub mod call_record;
pub mod framer;
pub mod protocol;
pub mod session;
pub mod settings;
pub mod store;

/// Frame size used by the telephony bridge: 20 packets of 160 bytes, or 0.4s
/// of 8kHz mono 8-bit audio.
pub const DEFAULT_FRAME_BYTES: usize = 20 * 160;
