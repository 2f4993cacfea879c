//! WebSocket endpoints

pub mod live;

/// Per-client buffer between the broadcast channel and the socket
pub const WS_BUFFER_SIZE: usize = 100;
