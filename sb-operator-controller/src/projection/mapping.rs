//! Resolution of where containers, env, volume mounts and volumes live
//! inside an arbitrary workload resource.

use kube::discovery::ApiResource;
use kube::ResourceExt;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::crd::v1alpha2::workload_resource_mapping::{
    ClusterApplicationResourceMapping, ClusterWorkloadResourceMapping, WorkloadResourceMapping,
    WorkloadResourceMappingVersion,
};
use crate::error::BindingError;
use crate::projection::path::FieldPath;

pub const DEFAULT_CONTAINERS_PATH: &str = ".spec.template.spec.containers[*]";
pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_VOLUME_MOUNTS_PATH: &str = ".volumeMounts";
pub const DEFAULT_VOLUMES_PATH: &str = ".spec.template.spec.volumes";

/// Parsed locations for one workload version. `envs` and `volume_mounts`
/// are relative to each container selected by `containers`.
#[derive(Debug, Clone, PartialEq)]
pub struct PathSet {
    pub containers: Vec<FieldPath>,
    pub envs: Vec<FieldPath>,
    pub volume_mounts: Vec<FieldPath>,
    pub volumes: FieldPath,
}

impl PathSet {
    /// The shape of a standard pod-template workload
    pub fn pod_template() -> Self {
        PathSet {
            containers: vec![default_path(DEFAULT_CONTAINERS_PATH)],
            envs: vec![default_path(DEFAULT_ENV_PATH)],
            volume_mounts: vec![default_path(DEFAULT_VOLUME_MOUNTS_PATH)],
            volumes: default_path(DEFAULT_VOLUMES_PATH),
        }
    }

    pub fn from_version(version: &WorkloadResourceMappingVersion) -> Result<Self, BindingError> {
        let parse_all = |paths: &[String]| paths.iter().map(|path| FieldPath::parse(path)).collect::<Result<Vec<_>, _>>();

        Ok(PathSet {
            containers: parse_all(&version.containers)?,
            envs: parse_all(&version.envs)?,
            volume_mounts: parse_all(&version.volume_mounts)?,
            volumes: FieldPath::parse(&version.volumes)?,
        })
    }

    /// Concrete paths of every container object present in `workload`
    pub fn locate_containers(&self, workload: &Value) -> Vec<FieldPath> {
        self.containers.iter().flat_map(|path| path.expand(workload)).collect()
    }
}

fn default_path(raw: &str) -> FieldPath {
    // The defaults are constants covered by tests
    FieldPath::parse(raw).unwrap_or_else(|_| unreachable!("invalid built-in path {raw}"))
}

/// Registry of workload resource mappings, keyed by `<plural>.<group>`.
#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    entries: BTreeMap<String, Vec<WorkloadResourceMappingVersion>>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from every mapping visible to a namespace. For a
    /// given name, namespaced mappings shadow cluster workload mappings,
    /// which in turn shadow cluster application mappings.
    pub fn from_mappings(
        application: Vec<ClusterApplicationResourceMapping>,
        cluster: Vec<ClusterWorkloadResourceMapping>,
        namespaced: Vec<WorkloadResourceMapping>,
    ) -> Self {
        let mut registry = Self::new();
        for mapping in application {
            registry.register(&mapping.name_any(), mapping.spec.versions);
        }
        for mapping in cluster {
            registry.register(&mapping.name_any(), mapping.spec.versions);
        }
        for mapping in namespaced {
            registry.register(&mapping.name_any(), mapping.spec.versions);
        }
        registry
    }

    pub fn register(&mut self, name: &str, versions: Vec<WorkloadResourceMappingVersion>) {
        self.entries.insert(name.to_string(), versions);
    }

    /// Name a mapping must carry to describe `resource`
    pub fn mapping_name(resource: &ApiResource) -> String {
        if resource.group.is_empty() {
            resource.plural.clone()
        } else {
            format!("{}.{}", resource.plural, resource.group)
        }
    }

    /// Paths for `resource`: the registered mapping whose version string is
    /// exactly `resource.version`, else the pod-template default.
    pub fn resolve(&self, resource: &ApiResource) -> Result<PathSet, BindingError> {
        let name = Self::mapping_name(resource);
        let Some(versions) = self.entries.get(&name) else {
            return Ok(PathSet::pod_template());
        };

        let mut matching = versions.iter().filter(|version| version.version == resource.version);
        match (matching.next(), matching.next()) {
            (None, _) => Ok(PathSet::pod_template()),
            (Some(version), None) => PathSet::from_version(version),
            (Some(_), Some(_)) => Err(BindingError::InvalidMapping {
                path: name,
                detail: format!("version {} is mapped more than once", resource.version),
            }),
        }
    }

    /// Resolve the paths for a concrete workload and locate its containers,
    /// failing when the workload exposes none at the resolved locations.
    pub fn resolve_for(&self, resource: &ApiResource, target: &str, workload: &Value) -> Result<(PathSet, Vec<FieldPath>), BindingError> {
        let paths = self.resolve(resource)?;
        let containers = paths.locate_containers(workload);

        if containers.is_empty() {
            let searched: Vec<String> = paths.containers.iter().map(|path| path.to_string()).collect();
            return Err(BindingError::UnsupportedShape {
                target: target.to_string(),
                detail: if searched.is_empty() {
                    "the mapping declares no container paths".to_string()
                } else {
                    format!("no containers found at {}", searched.join(", "))
                },
            });
        }

        Ok((paths, containers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::GroupVersionKind;
    use serde_json::json;

    use crate::crd::v1alpha2::workload_resource_mapping::{
        ClusterApplicationResourceMappingSpec, ClusterWorkloadResourceMappingSpec, WorkloadResourceMappingSpec,
    };

    fn resource(group: &str, version: &str, kind: &str) -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind))
    }

    fn custom_version(version: &str) -> WorkloadResourceMappingVersion {
        WorkloadResourceMappingVersion {
            version: version.to_string(),
            containers: vec![".spec.runtime.containers[*]".to_string()],
            envs: vec![".environment".to_string()],
            volume_mounts: vec![".mounts".to_string()],
            volumes: ".spec.runtime.volumes".to_string(),
        }
    }

    #[test]
    fn test_builtin_paths_parse() {
        let paths = PathSet::pod_template();

        assert_eq!(paths.containers[0].to_string(), DEFAULT_CONTAINERS_PATH);
        assert_eq!(paths.envs[0].to_string(), DEFAULT_ENV_PATH);
        assert_eq!(paths.volume_mounts[0].to_string(), DEFAULT_VOLUME_MOUNTS_PATH);
        assert_eq!(paths.volumes.to_string(), DEFAULT_VOLUMES_PATH);
    }

    #[test]
    fn test_mapping_name_includes_group() {
        assert_eq!(MappingRegistry::mapping_name(&resource("apps", "v1", "Deployment")), "deployments.apps");
        assert_eq!(MappingRegistry::mapping_name(&resource("", "v1", "Pod")), "pods");
    }

    #[test]
    fn test_unregistered_resource_uses_default() {
        let registry = MappingRegistry::new();

        assert_eq!(registry.resolve(&resource("apps", "v1", "Deployment")).unwrap(), PathSet::pod_template());
    }

    #[test]
    fn test_registered_version_uses_mapping() {
        let mut registry = MappingRegistry::new();
        registry.register("runtimes.example.com", vec![custom_version("v2")]);

        let paths = registry.resolve(&resource("example.com", "v2", "Runtime")).unwrap();

        assert_eq!(paths.containers[0].to_string(), ".spec.runtime.containers[*]");
        assert_eq!(paths.envs[0].to_string(), ".environment");
        assert_eq!(paths.volumes.to_string(), ".spec.runtime.volumes");
    }

    #[test]
    fn test_version_match_is_exact() {
        let mut registry = MappingRegistry::new();
        registry.register("runtimes.example.com", vec![custom_version("v2")]);

        assert_eq!(registry.resolve(&resource("example.com", "v2beta1", "Runtime")).unwrap(), PathSet::pod_template());
    }

    #[test]
    fn test_duplicate_version_is_rejected() {
        let mut registry = MappingRegistry::new();
        registry.register("runtimes.example.com", vec![custom_version("v2"), custom_version("v2")]);

        let error = registry.resolve(&resource("example.com", "v2", "Runtime")).unwrap_err();
        assert_eq!(error.reason(), "InvalidMapping");
    }

    #[test]
    fn test_invalid_path_in_mapping() {
        let mut registry = MappingRegistry::new();
        let mut version = custom_version("v1");
        version.volumes = ".spec..volumes".to_string();
        registry.register("runtimes.example.com", vec![version]);

        let error = registry.resolve(&resource("example.com", "v1", "Runtime")).unwrap_err();
        assert_eq!(error.reason(), "InvalidMapping");
    }

    #[test]
    fn test_namespaced_mapping_shadows_cluster_mapping() {
        let cluster = ClusterWorkloadResourceMapping::new("runtimes.example.com", ClusterWorkloadResourceMappingSpec {
            versions: vec![custom_version("v1")],
        });
        let mut local_version = custom_version("v1");
        local_version.containers = vec![".spec.local.containers[*]".to_string()];
        let namespaced = WorkloadResourceMapping::new("runtimes.example.com", WorkloadResourceMappingSpec {
            versions: vec![local_version],
        });

        let registry = MappingRegistry::from_mappings(vec![], vec![cluster], vec![namespaced]);
        let paths = registry.resolve(&resource("example.com", "v1", "Runtime")).unwrap();

        assert_eq!(paths.containers[0].to_string(), ".spec.local.containers[*]");
    }

    #[test]
    fn test_application_mapping_is_the_last_resort() {
        let mut legacy_version = custom_version("v1");
        legacy_version.containers = vec![".spec.legacy.containers[*]".to_string()];
        let application = vec![
            ClusterApplicationResourceMapping::new("runtimes.example.com", ClusterApplicationResourceMappingSpec {
                versions: vec![legacy_version.clone()],
            }),
            ClusterApplicationResourceMapping::new("jobs.example.com", ClusterApplicationResourceMappingSpec {
                versions: vec![legacy_version],
            }),
        ];
        let cluster = ClusterWorkloadResourceMapping::new("runtimes.example.com", ClusterWorkloadResourceMappingSpec {
            versions: vec![custom_version("v1")],
        });

        let registry = MappingRegistry::from_mappings(application, vec![cluster], vec![]);

        let runtime = registry.resolve(&resource("example.com", "v1", "Runtime")).unwrap();
        assert_eq!(runtime.containers[0].to_string(), ".spec.runtime.containers[*]");
        let job = registry.resolve(&resource("example.com", "v1", "Job")).unwrap();
        assert_eq!(job.containers[0].to_string(), ".spec.legacy.containers[*]");
    }

    #[test]
    fn test_unsupported_shape_without_containers() {
        let registry = MappingRegistry::new();
        let workload = json!({"spec": {"schedule": "* * * * *"}});

        let error = registry.resolve_for(&resource("batch", "v1", "CronJob"), "CronJob/nightly", &workload).unwrap_err();

        assert_eq!(error.reason(), "UnsupportedShape");
        assert!(error.to_string().contains(DEFAULT_CONTAINERS_PATH));
    }

    #[test]
    fn test_resolve_for_locates_containers() {
        let registry = MappingRegistry::new();
        let workload = json!({"spec": {"template": {"spec": {"containers": [{"name": "web"}, {"name": "worker"}]}}}});

        let (_, containers) = registry.resolve_for(&resource("apps", "v1", "Deployment"), "Deployment/web", &workload).unwrap();

        assert_eq!(containers.len(), 2);
    }
}
