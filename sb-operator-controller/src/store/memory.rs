//! In-memory [`ObjectStore`] with resourceVersion checks and injectable
//! write conflicts.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::DynamicObject;
use kube::core::{GroupVersionKind, Selector, SelectorExt};
use kube::discovery::ApiResource;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::crd::v1alpha2::workload_resource_mapping::{
    ClusterApplicationResourceMapping, ClusterWorkloadResourceMapping, WorkloadResourceMapping,
};
use crate::error::{ControllerError, Result};
use crate::store::{parse_api_version, ObjectStore};

type ObjectKey = (String, String, String, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    secrets: BTreeMap<(String, String), Secret>,
    application_mappings: Vec<ClusterApplicationResourceMapping>,
    cluster_mappings: Vec<ClusterWorkloadResourceMapping>,
    namespaced_mappings: Vec<WorkloadResourceMapping>,
    conflicts: BTreeMap<String, u32>,
    failing: BTreeMap<String, String>,
    replaces: u32,
    version: u64,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn object_key(api_version: &str, kind: &str, namespace: &str, name: &str) -> ObjectKey {
    (api_version.to_string(), kind.to_string(), namespace.to_string(), name.to_string())
}

fn labels_match(selector: &Selector, labels: &Option<BTreeMap<String, String>>) -> bool {
    selector.matches(labels.as_ref().unwrap_or(&BTreeMap::new()))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a workload given as JSON with `apiVersion`, `kind` and metadata
    pub fn insert_object(&self, value: Value) -> DynamicObject {
        let mut object: DynamicObject = serde_json::from_value(value).expect("valid object");
        let types = object.types.clone().expect("object carries apiVersion and kind");
        let namespace = object.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
        let name = object.metadata.name.clone().expect("object carries a name");

        let mut inner = self.inner.lock().unwrap();
        object.metadata.namespace = Some(namespace.clone());
        object.metadata.resource_version = Some(inner.next_version());
        inner
            .objects
            .insert(object_key(&types.api_version, &types.kind, &namespace, &name), object.clone());
        object
    }

    /// Stored object as JSON
    pub fn object(&self, api_version: &str, kind: &str, namespace: &str, name: &str) -> Option<Value> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(&object_key(api_version, kind, namespace, name))
            .map(|object| serde_json::to_value(object).expect("serializable object"))
    }

    pub fn insert_secret(&self, namespace: &str, name: &str, entries: &[(&str, &str)]) {
        let secret = Secret {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(
                entries
                    .iter()
                    .map(|(key, value)| (key.to_string(), ByteString(value.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        };

        let mut inner = self.inner.lock().unwrap();
        inner.secrets.insert((namespace.to_string(), name.to_string()), secret);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        let inner = self.inner.lock().unwrap();
        inner.secrets.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    pub fn secret_names(&self, namespace: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .secrets
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn add_application_mapping(&self, mapping: ClusterApplicationResourceMapping) {
        self.inner.lock().unwrap().application_mappings.push(mapping);
    }

    pub fn add_cluster_mapping(&self, mapping: ClusterWorkloadResourceMapping) {
        self.inner.lock().unwrap().cluster_mappings.push(mapping);
    }

    pub fn add_namespaced_mapping(&self, mapping: WorkloadResourceMapping) {
        self.inner.lock().unwrap().namespaced_mappings.push(mapping);
    }

    /// Make the next `count` replacements of the object named `name` fail
    /// with a conflict, as if another writer got there first
    pub fn inject_conflicts(&self, name: &str, count: u32) {
        self.inner.lock().unwrap().conflicts.insert(name.to_string(), count);
    }

    /// Make every replacement of the object named `name` fail with `message`
    pub fn fail_replace(&self, name: &str, message: &str) {
        self.inner.lock().unwrap().failing.insert(name.to_string(), message.to_string());
    }

    /// Number of successful object replacements
    pub fn replace_count(&self) -> u32 {
        self.inner.lock().unwrap().replaces
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn resolve_resource(&self, api_version: &str, kind: &str) -> Result<ApiResource> {
        let (group, version) = parse_api_version(api_version);
        Ok(ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind)))
    }

    async fn get_object(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<Option<DynamicObject>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .objects
            .get(&object_key(&resource.api_version, &resource.kind, namespace, name))
            .cloned())
    }

    async fn list_objects(&self, resource: &ApiResource, namespace: &str, selector: &Selector) -> Result<Vec<DynamicObject>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .objects
            .iter()
            .filter(|((api_version, kind, ns, _), object)| {
                *api_version == resource.api_version
                    && *kind == resource.kind
                    && ns == namespace
                    && labels_match(selector, &object.metadata.labels)
            })
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn replace_object(&self, resource: &ApiResource, namespace: &str, object: &DynamicObject) -> Result<DynamicObject> {
        let name = object
            .metadata
            .name
            .clone()
            .ok_or(ControllerError::MissingObjectKeyError("metadata.name"))?;
        let subject = format!("{}/{}", resource.kind, name);
        let key = object_key(&resource.api_version, &resource.kind, namespace, &name);

        let mut inner = self.inner.lock().unwrap();
        if let Some(message) = inner.failing.get(&name) {
            return Err(ControllerError::UnknownError(message.clone()));
        }
        if let Some(remaining) = inner.conflicts.get_mut(&name) {
            if *remaining > 0 {
                *remaining -= 1;
                // Another writer bumps the stored version
                let version = inner.next_version();
                if let Some(stored) = inner.objects.get_mut(&key) {
                    stored.metadata.resource_version = Some(version);
                }
                return Err(ControllerError::ConflictError(subject));
            }
        }

        let stored_version = inner
            .objects
            .get(&key)
            .ok_or_else(|| ControllerError::UnknownError(format!("{} not found", subject)))?
            .metadata
            .resource_version
            .clone();
        if stored_version != object.metadata.resource_version {
            return Err(ControllerError::ConflictError(subject));
        }

        let mut replaced = object.clone();
        replaced.metadata.resource_version = Some(inner.next_version());
        inner.objects.insert(key, replaced.clone());
        inner.replaces += 1;
        Ok(replaced)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.secret(namespace, name))
    }

    async fn list_secrets(&self, namespace: &str, selector: &Selector) -> Result<Vec<Secret>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .secrets
            .iter()
            .filter(|((ns, _), secret)| ns == namespace && labels_match(selector, &secret.metadata.labels))
            .map(|(_, secret)| secret.clone())
            .collect())
    }

    async fn apply_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let name = secret
            .metadata
            .name
            .clone()
            .ok_or(ControllerError::MissingObjectKeyError("metadata.name"))?;

        let mut inner = self.inner.lock().unwrap();
        let mut applied = secret.clone();
        applied.metadata.namespace = Some(namespace.to_string());
        applied.metadata.resource_version = Some(inner.next_version());
        inner.secrets.insert((namespace.to_string(), name), applied.clone());
        Ok(applied)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.secrets.remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn application_mappings(&self) -> Result<Vec<ClusterApplicationResourceMapping>> {
        Ok(self.inner.lock().unwrap().application_mappings.clone())
    }

    async fn cluster_mappings(&self) -> Result<Vec<ClusterWorkloadResourceMapping>> {
        Ok(self.inner.lock().unwrap().cluster_mappings.clone())
    }

    async fn namespaced_mappings(&self, namespace: &str) -> Result<Vec<WorkloadResourceMapping>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .namespaced_mappings
            .iter()
            .filter(|mapping| mapping.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }
}
