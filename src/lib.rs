//! Haze - Rotating Proxy Gateway
//!
//! A self-hosted rotating HTTP forward proxy that hides a pool of free
//! upstream proxies behind one stable endpoint.
//!
//! ## Features
//!
//! - Five rotation strategies (per-request, per-session, time-based,
//!   on-block, round-robin) with per-domain overrides
//! - HTTP forwarding and CONNECT tunneling with block detection and
//!   transparent retries
//! - A self-maintaining pool: source scraping, dedup, bounded-concurrency
//!   health probing, scoring, and eviction
//! - REST control API with a WebSocket live traffic feed
//! - PostgreSQL-backed shared state

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod gateway;
pub mod maintainer;
pub mod models;
pub mod repository;
pub mod rotation;

pub use config::Config;
pub use database::Database;
pub use error::{HazeError, Result};
