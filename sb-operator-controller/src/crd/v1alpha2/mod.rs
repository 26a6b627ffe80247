pub mod workload_resource_mapping;
