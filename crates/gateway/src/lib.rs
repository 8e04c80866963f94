//! Process orchestration: validate configuration, connect the bot, serve the
//! liveness probe and webhook receiver, and shut down cleanly.

pub mod server;
pub mod webhook;

pub use server::{AppState, build_app, relay_once, start_gateway};
