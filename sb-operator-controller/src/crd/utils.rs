use kube::CustomResourceExt;
use kube::core::crd::merge_crds;

use crate::crd::v1alpha1::service_binding::ServiceBinding as V1Alpha1ServiceBinding;
use crate::crd::v1alpha1::workload_resource_mapping::{
    ClusterWorkloadResourceMapping as V1Alpha1ClusterWorkloadResourceMapping,
    WorkloadResourceMapping as V1Alpha1WorkloadResourceMapping,
};
use crate::crd::v1alpha2::workload_resource_mapping::{
    ClusterApplicationResourceMapping as V1Alpha2ClusterApplicationResourceMapping,
    ClusterWorkloadResourceMapping as V1Alpha2ClusterWorkloadResourceMapping,
    WorkloadResourceMapping as V1Alpha2WorkloadResourceMapping,
};
use crate::error::{ControllerError, Result};


/// Generate the CRDs for the operator as a multi-document YAML stream
pub fn generate_crds() -> Result<String> {
    let crds = vec![
        merge_crds(vec![V1Alpha1ServiceBinding::crd()], "v1alpha1"),
        merge_crds(
            vec![V1Alpha1ClusterWorkloadResourceMapping::crd(), V1Alpha2ClusterWorkloadResourceMapping::crd()],
            "v1alpha2",
        ),
        merge_crds(
            vec![V1Alpha1WorkloadResourceMapping::crd(), V1Alpha2WorkloadResourceMapping::crd()],
            "v1alpha2",
        ),
        merge_crds(vec![V1Alpha2ClusterApplicationResourceMapping::crd()], "v1alpha2"),
    ];

    let mut output = String::new();
    for crd in crds {
        let crd = crd.map_err(|e| ControllerError::UnknownError(format!("failed to merge CRDs: {}", e)))?;
        output.push_str("---\n");
        output.push_str(&serde_norway::to_string(&crd).map_err(|e| ControllerError::UnknownError(e.to_string()))?);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_every_crd() {
        let output = generate_crds().unwrap();

        assert_eq!(output.matches("---\n").count(), 4);
        assert!(output.contains("name: servicebindings.servicebinding.io"));
        assert!(output.contains("name: clusterworkloadresourcemappings.servicebinding.io"));
        assert!(output.contains("name: workloadresourcemappings.servicebinding.io"));
        assert!(output.contains("name: clusterapplicationresourcemappings.servicebinding.io"));
        assert!(output.contains("scope: Cluster"));
    }

    #[test]
    fn test_mappings_are_stored_as_v1alpha2() {
        let crd = merge_crds(
            vec![V1Alpha1ClusterWorkloadResourceMapping::crd(), V1Alpha2ClusterWorkloadResourceMapping::crd()],
            "v1alpha2",
        )
        .unwrap();

        let versions: Vec<(&str, bool, bool)> = crd
            .spec
            .versions
            .iter()
            .map(|version| (version.name.as_str(), version.served, version.storage))
            .collect();
        assert_eq!(versions, vec![("v1alpha1", true, false), ("v1alpha2", true, true)]);
    }
}
