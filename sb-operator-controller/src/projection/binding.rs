//! Injection of a binding's volume, mounts and env vars into workloads.
//!
//! Every entry this module writes is keyed by a name derived from the
//! binding, so several bindings can share a container without touching
//! each other's entries. Bodies are computed in memory and committed as a
//! single full-object replace.

use serde_json::{json, Value};
use std::collections::BTreeSet;

use sb_operator_common::retry::{retry_with_backoff, RetryConfig};
use sb_operator_common::telemetry::{debug, info};
use sb_operator_common::utils::short_hash;

use kube::api::DynamicObject;
use kube::discovery::ApiResource;

use crate::crd::hub::common::ProjectionRecord;
use crate::crd::hub::service_binding::{ContainerSelector, EnvMapping};
use crate::error::{BindingError, ControllerError};
use crate::projection::mapping::{MappingRegistry, PathSet};
use crate::projection::path::FieldPath;
use crate::projection::secret::is_derived_secret;
use crate::projection::selector::{prepare, SelectedTarget, Target, TargetRef};
use crate::store::ObjectStore;

pub const VOLUME_PREFIX: &str = "servicebinding-";
const MAX_NAME_LENGTH: usize = 63;

/// Name of the volume and volume mounts carrying `binding`
pub fn volume_name(binding: &str) -> String {
    let name = format!("{}{}", VOLUME_PREFIX, binding);
    if name.len() > MAX_NAME_LENGTH {
        format!("{}{}", VOLUME_PREFIX, short_hash(binding, 16))
    } else {
        name
    }
}

/// What one binding writes into each of its targets
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Name of the ServiceBinding object, prefix of every secret it derives
    pub owner: String,
    pub volume: String,
    pub mount_path: String,
    pub secret: String,
    pub env: Vec<EnvMapping>,
}

impl Projection {
    pub fn new(owner: &str, directory: &str, binding_root: &str, secret: &str, env: Vec<EnvMapping>) -> Self {
        Projection {
            owner: owner.to_string(),
            volume: volume_name(owner),
            mount_path: format!("{}/{}", binding_root.trim_end_matches('/'), directory),
            secret: secret.to_string(),
            env,
        }
    }

    fn volume_entry(&self) -> Value {
        json!({"name": self.volume, "secret": {"secretName": self.secret}})
    }

    fn mount_entry(&self) -> Value {
        json!({"name": self.volume, "mountPath": self.mount_path, "readOnly": true})
    }

    fn env_entry(&self, env: &EnvMapping) -> Value {
        json!({"name": env.name, "valueFrom": {"secretKeyRef": {"name": self.secret, "key": env.key}}})
    }

    /// Write this projection into `body`.
    ///
    /// Selected containers get the mounts and the declared env vars, and lose
    /// env vars this binding set earlier but no longer declares. Unselected
    /// containers lose everything this binding set.
    pub fn inject(
        &self,
        body: &mut Value,
        paths: &PathSet,
        selected: &[FieldPath],
        unselected: &[FieldPath],
        target: &str,
    ) -> Result<(), BindingError> {
        let shape = |detail: String| BindingError::UnsupportedShape {
            target: target.to_string(),
            detail,
        };

        let volumes = paths
            .volumes
            .ensure_list(body)
            .ok_or_else(|| shape(format!("{} is not a list", paths.volumes)))?;
        upsert(volumes, self.volume_entry());

        let declared: BTreeSet<&str> = self.env.iter().map(|env| env.name.as_str()).collect();
        for container_path in selected {
            let container = container_path
                .get_mut(body)
                .ok_or_else(|| shape(format!("no container at {}", container_path)))?;

            for env_path in &paths.envs {
                prune_list(container, env_path, |entry| {
                    !owns_env(&self.owner, entry) || entry_name(entry).is_some_and(|name| declared.contains(name))
                });
                if self.env.is_empty() {
                    continue;
                }

                let list = env_path
                    .ensure_list(container)
                    .ok_or_else(|| shape(format!("{} is not a list", container_path.join(env_path))))?;
                for env in &self.env {
                    upsert(list, self.env_entry(env));
                }
            }

            for mount_path in &paths.volume_mounts {
                let list = mount_path
                    .ensure_list(container)
                    .ok_or_else(|| shape(format!("{} is not a list", container_path.join(mount_path))))?;
                upsert(list, self.mount_entry());
            }
        }

        for container_path in unselected {
            if let Some(container) = container_path.get_mut(body) {
                strip_container(container, paths, &self.owner, &self.volume);
            }
        }

        Ok(())
    }
}

/// Remove every entry `owner` projected into `body`
pub fn remove_binding(body: &mut Value, paths: &PathSet, owner: &str, volume: &str) {
    for container_path in paths.locate_containers(body) {
        if let Some(container) = container_path.get_mut(body) {
            strip_container(container, paths, owner, volume);
        }
    }
    prune_list(body, &paths.volumes, |entry| entry_name(entry) != Some(volume));
}

fn strip_container(container: &mut Value, paths: &PathSet, owner: &str, volume: &str) {
    for env_path in &paths.envs {
        prune_list(container, env_path, |entry| !owns_env(owner, entry));
    }
    for mount_path in &paths.volume_mounts {
        prune_list(container, mount_path, |entry| entry_name(entry) != Some(volume));
    }
}

fn entry_name(entry: &Value) -> Option<&str> {
    entry.get("name").and_then(Value::as_str)
}

/// An env var belongs to `owner` when it reads from a secret `owner` derived
fn owns_env(owner: &str, entry: &Value) -> bool {
    entry
        .pointer("/valueFrom/secretKeyRef/name")
        .and_then(Value::as_str)
        .is_some_and(|secret| is_derived_secret(owner, secret))
}

/// Make `desired` the only entry carrying its name. The first existing
/// entry is updated in place so unrelated entries keep their positions.
fn upsert(list: &mut Vec<Value>, desired: Value) {
    let name = entry_name(&desired).map(str::to_string);
    let mut seen = false;

    list.retain_mut(|entry| {
        if entry_name(entry) != name.as_deref() {
            return true;
        }
        if seen {
            return false;
        }
        seen = true;
        if *entry != desired {
            *entry = desired.clone();
        }
        true
    });

    if !seen {
        list.push(desired);
    }
}

/// Drop entries of the list at `path` that fail `keep`. The list itself is
/// left in place, even when emptied.
fn prune_list(root: &mut Value, path: &FieldPath, keep: impl Fn(&Value) -> bool) {
    if let Some(list) = path.get_mut(root).and_then(Value::as_array_mut) {
        list.retain(|entry| keep(entry));
    }
}

/// Result of projecting into, or cleaning, one target
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionOutcome {
    pub reference: TargetRef,
    pub containers: Vec<String>,
    pub env: Vec<String>,
    pub secret: String,
    pub result: Result<(), BindingError>,
    /// Whether the workload was written
    pub changed: bool,
}

impl ProjectionOutcome {
    fn new(reference: TargetRef) -> Self {
        ProjectionOutcome {
            reference,
            containers: Vec::new(),
            env: Vec::new(),
            secret: String::new(),
            result: Ok(()),
            changed: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn record(&self) -> ProjectionRecord {
        ProjectionRecord {
            api_version: self.reference.api_version.clone(),
            kind: self.reference.kind.clone(),
            name: self.reference.name.clone(),
            containers: self.containers.clone(),
            env: self.env.clone(),
            secret: self.secret.clone(),
        }
    }
}

fn outcome_error(error: ControllerError, reference: &TargetRef, retry: &RetryConfig) -> BindingError {
    if error.is_conflict() {
        BindingError::ConflictRetryExhausted {
            target: reference.to_string(),
            attempts: retry.max_attempts.max(1),
        }
    } else {
        BindingError::from(error)
    }
}

/// Replace the stored object with `updated` unless nothing changed
async fn commit(
    store: &dyn ObjectStore,
    resource: &ApiResource,
    namespace: &str,
    current: &Value,
    updated: Value,
) -> Result<bool, ControllerError> {
    if *current == updated {
        return Ok(false);
    }

    let object: DynamicObject = serde_json::from_value(updated).map_err(|e| ControllerError::UnknownError(e.to_string()))?;
    store.replace_object(resource, namespace, &object).await?;
    Ok(true)
}

async fn refetch(
    store: &dyn ObjectStore,
    registry: &MappingRegistry,
    namespace: &str,
    resource: &ApiResource,
    reference: &TargetRef,
    filters: &[ContainerSelector],
) -> Result<Target, ControllerError> {
    let object = store
        .get_object(resource, namespace, &reference.name)
        .await?
        .ok_or_else(|| BindingError::TargetNotFound(reference.to_string()))?;

    Ok(prepare(registry, resource, reference.clone(), object, filters)?)
}

/// Project into one selected target. Conflicting writes re-read the
/// workload and recompute the body before trying again.
pub async fn apply(
    store: &dyn ObjectStore,
    registry: &MappingRegistry,
    namespace: &str,
    selected: SelectedTarget,
    filters: &[ContainerSelector],
    projection: &Projection,
    retry: &RetryConfig,
) -> ProjectionOutcome {
    let reference = selected.reference;
    let mut outcome = ProjectionOutcome::new(reference.clone());
    outcome.env = projection.env.iter().map(|env| env.name.clone()).collect();
    outcome.secret = projection.secret.clone();

    let initial = match selected.result {
        Ok(target) => target,
        Err(error) => {
            outcome.result = Err(error);
            return outcome;
        }
    };
    outcome.containers = initial.containers.clone();

    let result = retry_with_backoff(retry, "project_binding", ControllerError::is_conflict, |attempt| {
        let initial = &initial;
        let reference = &reference;
        async move {
            let target = if attempt == 1 {
                initial.clone()
            } else {
                refetch(store, registry, namespace, &initial.resource, reference, filters).await?
            };

            let mut body = target.body.clone();
            projection.inject(&mut body, &target.paths, &target.selected, &target.unselected, &reference.to_string())?;
            let changed = commit(store, &target.resource, namespace, &target.body, body).await?;
            Ok::<_, ControllerError>((changed, target.containers))
        }
    })
    .await;

    match result {
        Ok((changed, containers)) => {
            outcome.changed = changed;
            outcome.containers = containers;
            if changed {
                info!(event = "ProjectedBinding", binding = projection.owner.as_str(), target = %reference);
            } else {
                debug!(event = "ProjectionUnchanged", binding = projection.owner.as_str(), target = %reference);
            }
        }
        Err(error) => outcome.result = Err(outcome_error(error, &reference, retry)),
    }
    outcome
}

async fn clean_once(
    store: &dyn ObjectStore,
    registry: &MappingRegistry,
    namespace: &str,
    reference: &TargetRef,
    owner: &str,
    volume: &str,
) -> Result<bool, ControllerError> {
    let resource = store.resolve_resource(&reference.api_version, &reference.kind).await?;
    let Some(object) = store.get_object(&resource, namespace, &reference.name).await? else {
        return Ok(false);
    };

    let paths = registry.resolve(&resource)?;
    let body = serde_json::to_value(&object).map_err(|e| ControllerError::UnknownError(e.to_string()))?;
    let mut updated = body.clone();
    remove_binding(&mut updated, &paths, owner, volume);
    commit(store, &resource, namespace, &body, updated).await
}

/// Remove everything `owner` projected into the workload `reference`.
/// A workload that no longer exists counts as cleaned.
pub async fn cleanup(
    store: &dyn ObjectStore,
    registry: &MappingRegistry,
    namespace: &str,
    reference: TargetRef,
    owner: &str,
    retry: &RetryConfig,
) -> ProjectionOutcome {
    let volume = volume_name(owner);
    let mut outcome = ProjectionOutcome::new(reference.clone());

    let result = retry_with_backoff(retry, "clean_binding", ControllerError::is_conflict, |_| {
        clean_once(store, registry, namespace, &reference, owner, &volume)
    })
    .await;

    match result {
        Ok(changed) => {
            outcome.changed = changed;
            if changed {
                info!(event = "RemovedBinding", binding = owner, target = %reference);
            }
        }
        Err(error) => outcome.result = Err(outcome_error(error, &reference, retry)),
    }
    outcome
}
