use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster-wide description of where containers, env, volume mounts and
/// volumes live inside a workload resource. Named `<plural>.<group>` after
/// the resource it describes.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    kind = "ClusterWorkloadResourceMapping",
    group = "servicebinding.io",
    version = "v1alpha1",
    doc = "ClusterWorkloadResourceMapping describes the shape of a workload resource for each of its versions.",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct ClusterWorkloadResourceMappingSpec {
    /// Mappings for each version of the workload resource
    #[serde(default)]
    pub versions: Vec<WorkloadResourceMappingVersion>,
}

/// Namespaced variant of [`ClusterWorkloadResourceMapping`], taking
/// precedence for bindings in its namespace.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    kind = "WorkloadResourceMapping",
    group = "servicebinding.io",
    version = "v1alpha1",
    doc = "WorkloadResourceMapping describes the shape of a workload resource within a namespace.",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    namespaced
)]
pub struct WorkloadResourceMappingSpec {
    /// Mappings for each version of the workload resource
    #[serde(default)]
    pub versions: Vec<WorkloadResourceMappingVersion>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadResourceMappingVersion {
    /// Version of the workload resource this mapping applies to
    pub version: String,
    /// JSONPaths selecting container objects
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<String>,
    /// JSONPaths, relative to a container, of env lists
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<String>,
    /// JSONPaths, relative to a container, of volume mount lists
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<String>,
    /// JSONPath of the volume list
    pub volumes: String,
}
