pub mod proxy;
pub mod request;
pub mod rotation;

pub use proxy::*;
pub use request::*;
pub use rotation::*;
