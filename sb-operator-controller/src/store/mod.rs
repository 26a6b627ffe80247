//! Access to the cluster objects a projection pass reads and writes.
//!
//! Projection logic only talks to [`ObjectStore`], so it runs unchanged
//! against the API server and against the in-memory store used in tests.

pub mod apiserver;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::core::Selector;
use kube::discovery::ApiResource;
use k8s_openapi::api::core::v1::Secret;
use std::collections::BTreeMap;

use crate::crd::v1alpha2::workload_resource_mapping::{
    ClusterApplicationResourceMapping, ClusterWorkloadResourceMapping, WorkloadResourceMapping,
};
use crate::error::Result;

pub use self::apiserver::KubeObjectStore;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Resolve the API resource serving `kind` at `api_version`
    async fn resolve_resource(&self, api_version: &str, kind: &str) -> Result<ApiResource>;

    async fn get_object(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<Option<DynamicObject>>;

    async fn list_objects(&self, resource: &ApiResource, namespace: &str, selector: &Selector) -> Result<Vec<DynamicObject>>;

    /// Replace an object as a whole. The object's `resourceVersion` must
    /// match the stored one, otherwise [`ControllerError::ConflictError`]
    /// is returned.
    ///
    /// [`ControllerError::ConflictError`]: crate::error::ControllerError::ConflictError
    async fn replace_object(&self, resource: &ApiResource, namespace: &str, object: &DynamicObject) -> Result<DynamicObject>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn list_secrets(&self, namespace: &str, selector: &Selector) -> Result<Vec<Secret>>;

    /// Create or update a secret owned by the operator
    async fn apply_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret>;

    /// Delete a secret, succeeding when it is already gone
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    async fn application_mappings(&self) -> Result<Vec<ClusterApplicationResourceMapping>>;

    async fn cluster_mappings(&self) -> Result<Vec<ClusterWorkloadResourceMapping>>;

    async fn namespaced_mappings(&self, namespace: &str) -> Result<Vec<WorkloadResourceMapping>>;
}

/// Decoded entries of a secret. The API server folds `stringData` into
/// `data`, so only `data` is read.
pub fn secret_entries(secret: &Secret) -> BTreeMap<String, String> {
    secret
        .data
        .iter()
        .flatten()
        .map(|(key, value)| (key.clone(), String::from_utf8_lossy(&value.0).into_owned()))
        .collect()
}

/// Split an `apiVersion` into its group and version
pub fn parse_api_version(api_version: &str) -> (&str, &str) {
    match api_version.rsplit_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    #[test]
    fn test_parse_api_version() {
        assert_eq!(parse_api_version("apps/v1"), ("apps", "v1"));
        assert_eq!(parse_api_version("v1"), ("", "v1"));
        assert_eq!(parse_api_version("serving.knative.dev/v1"), ("serving.knative.dev", "v1"));
    }

    #[test]
    fn test_secret_entries_decode_data() {
        let secret = Secret {
            data: Some(BTreeMap::from([
                ("host".to_string(), ByteString(b"db".to_vec())),
                ("blob".to_string(), ByteString(vec![0x66, 0xff])),
            ])),
            ..Default::default()
        };

        let entries = secret_entries(&secret);

        assert_eq!(entries["host"], "db");
        assert_eq!(entries["blob"], "f\u{fffd}");
    }
}
