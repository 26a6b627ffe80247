pub mod common;
pub mod service_binding;
pub mod traits;
