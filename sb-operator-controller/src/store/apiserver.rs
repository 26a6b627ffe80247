use async_trait::async_trait;
use kube::{
    api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    core::{GroupVersionKind, Selector},
    discovery::{self, ApiResource},
    Client,
};
use k8s_openapi::api::core::v1::Secret;

use sb_operator_common::telemetry::debug;

use crate::crd::v1alpha2::workload_resource_mapping::{
    ClusterApplicationResourceMapping, ClusterWorkloadResourceMapping, WorkloadResourceMapping,
};
use crate::error::{ControllerError, Result};
use crate::store::{parse_api_version, ObjectStore};

/// [`ObjectStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
    field_manager: String,
}

impl KubeObjectStore {
    pub fn new(client: Client, field_manager: &str) -> Self {
        Self {
            client,
            field_manager: field_manager.to_string(),
        }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}

fn into_store_error(error: kube::Error, subject: &str) -> ControllerError {
    match error {
        kube::Error::Api(response) if response.code == 409 => ControllerError::ConflictError(subject.to_string()),
        other => ControllerError::from(other),
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn resolve_resource(&self, api_version: &str, kind: &str) -> Result<ApiResource> {
        let (group, version) = parse_api_version(api_version);
        let gvk = GroupVersionKind::gvk(group, version, kind);

        match discovery::pinned_kind(&self.client, &gvk).await {
            Ok((resource, _capabilities)) => Ok(resource),
            // Fall back to the conventional plural when discovery does not
            // know the kind, so the lookup itself reports the missing object
            Err(error) => {
                debug!(event = "DiscoveryFallback", api_version = api_version, kind = kind, error = %error);
                Ok(ApiResource::from_gvk(&gvk))
            }
        }
    }

    async fn get_object(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<Option<DynamicObject>> {
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, resource);

        match api.get(name).await {
            Ok(object) => Ok(Some(object)),
            Err(error) if not_found(&error) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn list_objects(&self, resource: &ApiResource, namespace: &str, selector: &Selector) -> Result<Vec<DynamicObject>> {
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, resource);

        match api.list(&ListParams::default().labels_from(selector)).await {
            Ok(list) => Ok(list.items),
            Err(error) if not_found(&error) => Ok(Vec::new()),
            Err(error) => Err(error.into()),
        }
    }

    async fn replace_object(&self, resource: &ApiResource, namespace: &str, object: &DynamicObject) -> Result<DynamicObject> {
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, resource);
        let name = object
            .metadata
            .name
            .as_deref()
            .ok_or(ControllerError::MissingObjectKeyError("metadata.name"))?;

        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };

        api.replace(name, &params, object)
            .await
            .map_err(|error| into_store_error(error, &format!("{}/{}", resource.kind, name)))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        match self.secrets(namespace).get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(error) if not_found(&error) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn list_secrets(&self, namespace: &str, selector: &Selector) -> Result<Vec<Secret>> {
        let list = self.secrets(namespace).list(&ListParams::default().labels_from(selector)).await?;
        Ok(list.items)
    }

    async fn apply_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let name = secret
            .metadata
            .name
            .as_deref()
            .ok_or(ControllerError::MissingObjectKeyError("metadata.name"))?;

        self.secrets(namespace)
            .patch(name, &PatchParams::apply(&self.field_manager).force(), &Patch::Apply(secret))
            .await
            .map_err(ControllerError::from)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        match self.secrets(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(error) if not_found(&error) => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn application_mappings(&self) -> Result<Vec<ClusterApplicationResourceMapping>> {
        let api = Api::<ClusterApplicationResourceMapping>::all(self.client.clone());

        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list.items),
            // The mapping CRDs are optional
            Err(error) if not_found(&error) => Ok(Vec::new()),
            Err(error) => Err(error.into()),
        }
    }

    async fn cluster_mappings(&self) -> Result<Vec<ClusterWorkloadResourceMapping>> {
        let api = Api::<ClusterWorkloadResourceMapping>::all(self.client.clone());

        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list.items),
            Err(error) if not_found(&error) => Ok(Vec::new()),
            Err(error) => Err(error.into()),
        }
    }

    async fn namespaced_mappings(&self, namespace: &str) -> Result<Vec<WorkloadResourceMapping>> {
        let api = Api::<WorkloadResourceMapping>::namespaced(self.client.clone(), namespace);

        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list.items),
            Err(error) if not_found(&error) => Ok(Vec::new()),
            Err(error) => Err(error.into()),
        }
    }
}
