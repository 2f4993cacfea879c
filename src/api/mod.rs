//! Control API
//!
//! REST endpoints over the pool, rotation config, and request ring, plus the
//! WebSocket live feed. All non-health endpoints require the bearer secret.

pub mod auth;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::{ApiServer, AppState};
