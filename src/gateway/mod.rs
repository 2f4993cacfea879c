//! The HTTP forward-proxy gateway
//!
//! Accepts plain-HTTP (absolute-form) and CONNECT requests, selects an
//! upstream through the rotation engine, detects anti-bot blocks, and
//! retries through different upstreams on failure.

pub mod block;
pub mod handler;
pub mod logger;
pub mod server;
pub mod tunnel;

pub use handler::{GatewayHandler, GatewayHandlerConfig};
pub use logger::RequestLogger;
pub use server::GatewayServer;
pub use tunnel::TunnelHandler;
