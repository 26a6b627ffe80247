pub mod hub;
pub mod utils;
pub mod v1alpha1;
pub mod v1alpha2;

use kube::{Resource, CustomResourceExt, core::object::{HasStatus, HasSpec}};
use k8s_openapi::NamespaceResourceScope;
use schemars::JsonSchema;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

pub trait NamespacedCustomResource:
    Clone
        + Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + CustomResourceExt
        + HasStatus
        + HasSpec
        + JsonSchema
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static
{}

impl<T> NamespacedCustomResource for T
where
    T: Clone
        + Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + CustomResourceExt
        + HasStatus
        + HasSpec
        + JsonSchema
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static
{}
