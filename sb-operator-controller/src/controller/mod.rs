pub mod context;
pub mod reconciler;
pub mod service_binding;
pub mod traits;
pub mod utils;
