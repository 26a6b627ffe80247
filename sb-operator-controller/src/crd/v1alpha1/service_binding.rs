use kube::CustomResource;
use k8s_openapi::apimachinery::pkg::{apis::meta::v1::LabelSelector, util::intstr::IntOrString};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::v1alpha1::common::{Condition, ProjectionRecord, SecretReference};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    kind = "ServiceBinding",
    group = "servicebinding.io",
    version = "v1alpha1",
    status = "ServiceBindingStatus",
    doc = "ServiceBinding projects the credentials of a provisioned service into application workloads.",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Ready", "type":"string", "description":"Whether the binding is projected", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "description":"Reason for the Ready condition", "jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBindingSpec {
    /// Name of the service as projected into the application container.
    /// Defaults to `.metadata.name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Type of the service as projected into the application container
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Provider of the service as projected into the application container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Reference to the workload(s) that fulfill the PodSpec duck type
    pub application: ApplicationReference,
    /// Reference to an object that fulfills the ProvisionedService duck type
    pub service: ServiceReference,
    /// Mappings from Secret entries to environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvMapping>,
    /// Mappings from existing Secret entries to new Secret entries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mappings: Vec<SecretMapping>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationReference {
    /// API version of the workload
    pub api_version: String,
    /// Kind of the workload
    pub kind: String,
    /// Name of the workload, takes precedence over `selector`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Query selecting the workloads to bind the service to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
    /// Names or indices of the containers to bind, all containers when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<IntOrString>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceReference {
    /// API version of the provisioned service
    pub api_version: String,
    /// Kind of the provisioned service
    pub kind: String,
    /// Name of the provisioned service, in the binding's namespace
    pub name: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, JsonSchema)]
pub struct EnvMapping {
    /// Name of the environment variable
    pub name: String,
    /// Key in the Secret that will be exposed
    pub key: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, JsonSchema)]
pub struct SecretMapping {
    /// Name of the mapped Secret entry
    pub name: String,
    /// Value of the new entry, `{key}` refers to another entry by name
    pub value: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBindingStatus {
    /// Generation of the ServiceBinding last processed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Secret holding the projected entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<SecretReference>,
    /// Workloads the binding was last projected into
    #[serde(default)]
    pub projections: Vec<ProjectionRecord>,
}
