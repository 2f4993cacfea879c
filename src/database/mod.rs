//! The shared store: PostgreSQL connection pool and embedded migrations.

pub mod migrations;
pub mod pool;

pub use pool::Database;
