pub mod common;
pub mod service_binding;
pub mod workload_resource_mapping;
