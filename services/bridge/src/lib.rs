//! Voice Agent Bridge Library Crate
//!
//! Everything the bridge process needs: configuration, shared state, the
//! session registry, database-backed agent lookup, call-record delivery, the
//! REST handlers and the media-stream WebSocket sessions. The `bridge` binary
//! is a thin wrapper around this library.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod registry;
pub mod router;
pub mod state;
pub mod webhook;
pub mod ws;
