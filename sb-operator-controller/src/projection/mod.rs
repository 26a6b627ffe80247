//! The projection engine: where things live in a workload, what the
//! derived secret holds, which workloads and containers are targeted, how
//! they are patched and how the outcome is reported.

pub mod binding;
pub mod mapping;
pub mod path;
pub mod secret;
pub mod selector;
pub mod status;
