use k8s_openapi::apimachinery::pkg::{
    apis::meta::v1::{LabelSelector, ObjectMeta},
    util::intstr::IntOrString,
};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::crd::{hub::traits::Hub, hub::common::{Condition, ProjectionRecord, SecretReference}, v1alpha1};

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ServiceBinding {
    pub metadata: ObjectMeta,
    pub spec: ServiceBindingSpec,
    pub status: Option<ServiceBindingStatus>,
}

impl Hub for ServiceBinding {}

impl From<v1alpha1::service_binding::ServiceBinding> for ServiceBinding {
    fn from(binding: v1alpha1::service_binding::ServiceBinding) -> Self {
        ServiceBinding {
            metadata: binding.metadata,
            spec: binding.spec.into(),
            status: binding.status.map(|status| status.into()),
        }
    }
}

impl ServiceBinding {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    /// Name of the directory the binding is projected into
    pub fn binding_name(&self) -> &str {
        self.spec.name.as_deref().filter(|name| !name.is_empty()).unwrap_or(self.name())
    }

    pub fn projections(&self) -> &[ProjectionRecord] {
        self.status.as_ref().map(|status| status.projections.as_slice()).unwrap_or_default()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ServiceBindingSpec {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub provider: Option<String>,
    pub application: ApplicationReference,
    pub service: ServiceReference,
    pub env: Vec<EnvMapping>,
    pub mappings: Vec<SecretMapping>,
}

impl From<v1alpha1::service_binding::ServiceBindingSpec> for ServiceBindingSpec {
    fn from(spec: v1alpha1::service_binding::ServiceBindingSpec) -> Self {
        ServiceBindingSpec {
            name: spec.name,
            type_: spec.type_,
            provider: spec.provider,
            application: spec.application.into(),
            service: spec.service.into(),
            env: spec.env.into_iter().map(|env| env.into()).collect(),
            mappings: spec.mappings.into_iter().map(|mapping| mapping.into()).collect(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationReference {
    pub api_version: String,
    pub kind: String,
    pub name: Option<String>,
    pub selector: Option<LabelSelector>,
    pub containers: Vec<ContainerSelector>,
}

impl From<v1alpha1::service_binding::ApplicationReference> for ApplicationReference {
    fn from(reference: v1alpha1::service_binding::ApplicationReference) -> Self {
        ApplicationReference {
            api_version: reference.api_version,
            kind: reference.kind,
            // An empty name is treated as unset so the selector applies
            name: reference.name.filter(|name| !name.is_empty()),
            selector: reference.selector,
            containers: reference.containers.into_iter().map(|container| container.into()).collect(),
        }
    }
}

/// A container filter entry: a container name or a position in the
/// workload's container list.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum ContainerSelector {
    Index(i32),
    Name(String),
}

impl From<IntOrString> for ContainerSelector {
    fn from(value: IntOrString) -> Self {
        match value {
            IntOrString::Int(index) => ContainerSelector::Index(index),
            IntOrString::String(name) => ContainerSelector::Name(name),
        }
    }
}

impl Display for ContainerSelector {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ContainerSelector::Index(index) => write!(f, "#{}", index),
            ContainerSelector::Name(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

impl ServiceReference {
    /// Whether the reference points straight at a core Secret
    pub fn is_secret(&self) -> bool {
        self.api_version == "v1" && self.kind == "Secret"
    }
}

impl Display for ServiceReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl From<v1alpha1::service_binding::ServiceReference> for ServiceReference {
    fn from(reference: v1alpha1::service_binding::ServiceReference) -> Self {
        ServiceReference {
            api_version: reference.api_version,
            kind: reference.kind,
            name: reference.name,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct EnvMapping {
    pub name: String,
    pub key: String,
}

impl From<v1alpha1::service_binding::EnvMapping> for EnvMapping {
    fn from(env: v1alpha1::service_binding::EnvMapping) -> Self {
        EnvMapping { name: env.name, key: env.key }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SecretMapping {
    pub name: String,
    pub value: String,
}

impl From<v1alpha1::service_binding::SecretMapping> for SecretMapping {
    fn from(mapping: v1alpha1::service_binding::SecretMapping) -> Self {
        SecretMapping { name: mapping.name, value: mapping.value }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBindingStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<SecretReference>,
    #[serde(default)]
    pub projections: Vec<ProjectionRecord>,
}

impl From<v1alpha1::service_binding::ServiceBindingStatus> for ServiceBindingStatus {
    fn from(status: v1alpha1::service_binding::ServiceBindingStatus) -> Self {
        ServiceBindingStatus {
            observed_generation: status.observed_generation,
            conditions: status.conditions.into_iter().map(|condition| condition.into()).collect(),
            binding: status.binding.map(|binding| binding.into()),
            projections: status.projections.into_iter().map(|record| record.into()).collect(),
        }
    }
}
