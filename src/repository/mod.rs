pub mod proxy;
pub mod request_log;
pub mod rotation;

pub use proxy::ProxyRepository;
pub use request_log::RequestLogRepository;
pub use rotation::RotationRepository;
