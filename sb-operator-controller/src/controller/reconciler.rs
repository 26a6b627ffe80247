//! One projection pass of a ServiceBinding against an [`ObjectStore`].

use futures::future::join_all;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::core::{Expression, Selector};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use sb_operator_common::config::ControllerConfig;
use sb_operator_common::constant::APP_NAME;
use sb_operator_common::telemetry::{info, warn};
use sb_operator_common::utils::short_hash;

use crate::controller::traits::{FromHub, ResourceDrift};
use crate::crd::hub::common::ProjectionRecord;
use crate::crd::hub::service_binding::{ServiceBinding, ServiceBindingStatus, ServiceReference};
use crate::error::{BindingError, ControllerError, Result};
use crate::projection::binding::{apply, cleanup, Projection, ProjectionOutcome};
use crate::projection::mapping::MappingRegistry;
use crate::projection::secret::{derived_secret_name, project};
use crate::projection::selector::{select, TargetRef};
use crate::projection::status::{failed, needs_retry, next_status, summarize};
use crate::store::{secret_entries, ObjectStore};

pub static BINDING_LABEL: &str = "servicebinding.io/binding";
pub static MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MAX_LABEL_VALUE_LENGTH: usize = 63;

/// Value of [`BINDING_LABEL`] for `binding`, hashed when the name does not
/// fit a label value
pub fn binding_label_value(binding: &str) -> String {
    if binding.len() <= MAX_LABEL_VALUE_LENGTH {
        binding.to_string()
    } else {
        short_hash(binding, 32)
    }
}

impl FromHub<ServiceBinding> for Secret {
    /// Create the derived Secret holding the final entries of a binding
    fn from_hub(binding: &ServiceBinding, name: &str, owner_ref: Option<OwnerReference>, entries: &BTreeMap<String, String>) -> Self {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: binding.namespace().map(str::to_string),
                labels: Some(BTreeMap::from([
                    (BINDING_LABEL.to_string(), binding_label_value(binding.name())),
                    (MANAGED_BY_LABEL.to_string(), APP_NAME.to_string()),
                ])),
                owner_references: owner_ref.map(|owner_ref| vec![owner_ref]),
                ..Default::default()
            },
            data: Some(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), ByteString(value.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }
}

impl ResourceDrift<ServiceBinding> for Secret {
    fn has_drifted(&self, other: &Self) -> bool {
        let labels = self.metadata.labels.clone().unwrap_or_default();
        let labels_missing = other
            .metadata
            .labels
            .iter()
            .flatten()
            .any(|(key, value)| labels.get(key) != Some(value));

        self.data != other.data || labels_missing
    }
}

/// Result of a projection pass
#[derive(Debug, Clone)]
pub struct Pass {
    pub status: ServiceBindingStatus,
    pub outcomes: Vec<ProjectionOutcome>,
    /// Whether the pass hit a transient failure
    pub retry: bool,
}

pub struct Reconciler<'a> {
    store: &'a dyn ObjectStore,
    config: &'a ControllerConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn ObjectStore, config: &'a ControllerConfig) -> Self {
        Self { store, config }
    }

    /// Project `binding` into its targets and compute the status to record.
    ///
    /// Binding-level failures become a failed Ready condition; only a binding
    /// that cannot be processed at all is an error.
    pub async fn project(&self, binding: &ServiceBinding, owner_ref: Option<OwnerReference>) -> Result<Pass> {
        let namespace = binding
            .namespace()
            .ok_or(ControllerError::MissingObjectKeyError("Expected ServiceBinding to be namespaced via metadata.namespace"))?;
        let previous = binding.status.as_ref();
        let generation = binding.metadata.generation;

        match self.project_in(binding, namespace, owner_ref).await {
            Ok((secret, outcomes, records)) => Ok(Pass {
                status: next_status(previous, summarize(&outcomes), generation, Some(secret), records),
                retry: needs_retry(&outcomes),
                outcomes,
            }),
            Err(error) => {
                warn!(
                    event = "ProjectionFailed",
                    binding = binding.name(),
                    reason = error.reason(),
                    error = %error
                );
                let secret = previous.and_then(|status| status.binding.as_ref()).map(|secret| secret.name.clone());

                Ok(Pass {
                    status: next_status(previous, failed(&error), generation, secret, binding.projections().to_vec()),
                    outcomes: Vec::new(),
                    retry: error.is_retryable(),
                })
            }
        }
    }

    async fn project_in(
        &self,
        binding: &ServiceBinding,
        namespace: &str,
        owner_ref: Option<OwnerReference>,
    ) -> std::result::Result<(String, Vec<ProjectionOutcome>, Vec<ProjectionRecord>), BindingError> {
        let registry = self.registry(namespace).await?;
        let raw = self.service_entries(namespace, &binding.spec.service).await?;
        let entries = derived_entries(binding, &raw)?;
        let secret_name = derived_secret_name(binding.name(), &entries)?;
        self.ensure_secret(binding, namespace, &secret_name, owner_ref, &entries).await?;

        let application = &binding.spec.application;
        let projection = Projection::new(
            binding.name(),
            binding.binding_name(),
            &self.config.binding_root,
            &secret_name,
            binding.spec.env.clone(),
        );
        let retry = self.config.conflict_retry();

        let selected = select(self.store, &registry, namespace, application).await?;
        let current: BTreeSet<TargetRef> = selected.iter().map(|target| target.reference.clone()).collect();

        let outcomes = join_all(
            selected
                .into_iter()
                .map(|target| apply(self.store, &registry, namespace, target, &application.containers, &projection, &retry)),
        )
        .await;

        let previous: BTreeMap<TargetRef, &ProjectionRecord> =
            binding.projections().iter().map(|record| (TargetRef::from(record), record)).collect();
        let retargeted: Vec<TargetRef> = previous.keys().filter(|reference| !current.contains(*reference)).cloned().collect();
        let cleaned = join_all(
            retargeted
                .into_iter()
                .map(|reference| cleanup(self.store, &registry, namespace, reference, binding.name(), &retry)),
        )
        .await;

        // Targets that failed this pass keep their last record so a later
        // pass can still clean them up
        let mut records = Vec::new();
        for outcome in &outcomes {
            if outcome.is_success() {
                records.push(outcome.record());
            } else if let Some(record) = previous.get(&outcome.reference) {
                records.push((*record).clone());
            }
        }

        let mut summary = outcomes;
        for outcome in cleaned.into_iter().filter(|outcome| !outcome.is_success()) {
            if let Some(record) = previous.get(&outcome.reference) {
                records.push((*record).clone());
            }
            summary.push(outcome);
        }

        if summary.iter().all(ProjectionOutcome::is_success) {
            if let Err(error) = self.prune_secrets(namespace, binding.name(), Some(&secret_name)).await {
                warn!(event = "SecretPruneFailed", binding = binding.name(), error = %error);
            }
        }

        Ok((secret_name, summary, records))
    }

    /// Remove everything `binding` projected, then its derived secrets.
    ///
    /// Workloads currently selected are cleaned as well as recorded ones, in
    /// case the status write of an earlier pass was lost.
    pub async fn cleanup(&self, binding: &ServiceBinding) -> Result<Vec<ProjectionOutcome>> {
        let namespace = binding
            .namespace()
            .ok_or(ControllerError::MissingObjectKeyError("Expected ServiceBinding to be namespaced via metadata.namespace"))?;
        let registry = self.registry(namespace).await?;
        let retry = self.config.conflict_retry();

        let mut references: BTreeSet<TargetRef> = binding.projections().iter().map(TargetRef::from).collect();
        if let Ok(selected) = select(self.store, &registry, namespace, &binding.spec.application).await {
            references.extend(selected.into_iter().map(|target| target.reference));
        }

        let outcomes = join_all(
            references
                .into_iter()
                .map(|reference| cleanup(self.store, &registry, namespace, reference, binding.name(), &retry)),
        )
        .await;

        if outcomes.iter().all(ProjectionOutcome::is_success) {
            self.prune_secrets(namespace, binding.name(), None).await?;
        }
        Ok(outcomes)
    }

    async fn registry(&self, namespace: &str) -> std::result::Result<MappingRegistry, BindingError> {
        let application = self.store.application_mappings().await?;
        let cluster = self.store.cluster_mappings().await?;
        let namespaced = self.store.namespaced_mappings(namespace).await?;
        Ok(MappingRegistry::from_mappings(application, cluster, namespaced))
    }

    /// Entries of the secret the provisioned service exposes
    async fn service_entries(
        &self,
        namespace: &str,
        service: &ServiceReference,
    ) -> std::result::Result<BTreeMap<String, String>, BindingError> {
        let secret_name = if service.is_secret() {
            service.name.clone()
        } else {
            let resource = self.store.resolve_resource(&service.api_version, &service.kind).await?;
            let object = self
                .store
                .get_object(&resource, namespace, &service.name)
                .await?
                .ok_or_else(|| BindingError::ServiceNotFound(service.to_string()))?;

            object
                .data
                .pointer("/status/binding/name")
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
                .ok_or_else(|| BindingError::ServiceNotReady(service.to_string()))?
                .to_string()
        };

        match self.store.get_secret(namespace, &secret_name).await? {
            Some(secret) => Ok(secret_entries(&secret)),
            None if service.is_secret() => Err(BindingError::ServiceNotFound(service.to_string())),
            None => Err(BindingError::SecretNotFound(secret_name)),
        }
    }

    async fn ensure_secret(
        &self,
        binding: &ServiceBinding,
        namespace: &str,
        name: &str,
        owner_ref: Option<OwnerReference>,
        entries: &BTreeMap<String, String>,
    ) -> Result<()> {
        let desired = Secret::from_hub(binding, name, owner_ref, entries);
        let existing = self.store.get_secret(namespace, name).await?;

        if existing
            .as_ref()
            .is_none_or(|existing| ResourceDrift::<ServiceBinding>::has_drifted(existing, &desired))
        {
            info!(event = "ApplyingSecret", binding = binding.name(), secret = name);
            self.store.apply_secret(namespace, &desired).await?;
        }
        Ok(())
    }

    /// Delete the derived secrets of `binding` other than `keep`
    async fn prune_secrets(&self, namespace: &str, binding: &str, keep: Option<&str>) -> Result<()> {
        let selector = Selector::from(Expression::Equal(BINDING_LABEL.to_string(), binding_label_value(binding)));

        for secret in self.store.list_secrets(namespace, &selector).await? {
            let Some(name) = secret.metadata.name.as_deref() else {
                continue;
            };
            if Some(name) != keep {
                info!(event = "DeletingSecret", binding = binding, secret = name);
                self.store.delete_secret(namespace, name).await?;
            }
        }
        Ok(())
    }
}

/// Final entries: the service's entries overlaid with the evaluated mappings
/// and the binding's `type` and `provider`. Every env var must name one.
pub fn derived_entries(
    binding: &ServiceBinding,
    raw: &BTreeMap<String, String>,
) -> std::result::Result<BTreeMap<String, String>, BindingError> {
    let mut entries = project(raw, &binding.spec.mappings)?;

    for (key, value) in [("type", &binding.spec.type_), ("provider", &binding.spec.provider)] {
        if let Some(value) = value.as_deref().filter(|value| !value.is_empty()) {
            entries.insert(key.to_string(), value.to_string());
        }
    }

    if let Some(env) = binding.spec.env.iter().find(|env| !entries.contains_key(&env.key)) {
        return Err(BindingError::MissingSecretKey {
            env: env.name.clone(),
            key: env.key.clone(),
        });
    }

    Ok(entries)
}
