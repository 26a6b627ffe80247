//! Resolution of the workloads a binding targets and of the containers to
//! mutate inside each of them.

use kube::api::DynamicObject;
use kube::core::Selector;
use kube::discovery::ApiResource;
use kube::ResourceExt;
use serde_json::Value;
use std::fmt::{Display, Formatter, Result as FmtResult};

use sb_operator_common::telemetry::info;

use crate::crd::hub::common::ProjectionRecord;
use crate::crd::hub::service_binding::{ApplicationReference, ContainerSelector};
use crate::error::BindingError;
use crate::projection::mapping::{MappingRegistry, PathSet};
use crate::projection::path::FieldPath;
use crate::store::ObjectStore;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TargetRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

impl TargetRef {
    pub fn new(api_version: &str, kind: &str, name: &str) -> Self {
        TargetRef {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }
}

impl Display for TargetRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl From<&ProjectionRecord> for TargetRef {
    fn from(record: &ProjectionRecord) -> Self {
        TargetRef::new(&record.api_version, &record.kind, &record.name)
    }
}

/// A workload ready to be projected into
#[derive(Debug, Clone)]
pub struct Target {
    pub reference: TargetRef,
    pub resource: ApiResource,
    pub body: Value,
    pub paths: PathSet,
    /// Concrete paths of the containers to project into
    pub selected: Vec<FieldPath>,
    /// Concrete paths of every other container
    pub unselected: Vec<FieldPath>,
    /// Names of the selected containers, `#N` for unnamed ones
    pub containers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SelectedTarget {
    pub reference: TargetRef,
    pub result: Result<Target, BindingError>,
}

/// Resolve the workloads named or matched by `application` in `namespace`.
///
/// A missing named workload yields a failed entry rather than an error, so
/// the caller reports it per target. Failures that concern every target,
/// such as an unreachable store, are returned as `Err`.
pub async fn select(
    store: &dyn ObjectStore,
    registry: &MappingRegistry,
    namespace: &str,
    application: &ApplicationReference,
) -> Result<Vec<SelectedTarget>, BindingError> {
    let resource = store.resolve_resource(&application.api_version, &application.kind).await?;

    if let Some(name) = &application.name {
        let reference = TargetRef::new(&application.api_version, &application.kind, name);
        let result = match store.get_object(&resource, namespace, name).await? {
            Some(object) => prepare(registry, &resource, reference.clone(), object, &application.containers),
            None => Err(BindingError::TargetNotFound(reference.to_string())),
        };
        return Ok(vec![SelectedTarget { reference, result }]);
    }

    let Some(label_selector) = &application.selector else {
        return Ok(Vec::new());
    };
    let selector = Selector::try_from(label_selector.clone()).map_err(|e| BindingError::InvalidMapping {
        path: "application.selector".to_string(),
        detail: e.to_string(),
    })?;

    let mut objects = store.list_objects(&resource, namespace, &selector).await?;
    objects.sort_by_key(|object| object.name_any());

    if objects.is_empty() {
        info!(
            event = "NoTargetsSelected",
            kind = application.kind.as_str(),
            namespace = namespace,
            selector = %selector
        );
    }

    Ok(objects
        .into_iter()
        .map(|object| {
            let reference = TargetRef::new(&application.api_version, &application.kind, &object.name_any());
            let result = prepare(registry, &resource, reference.clone(), object, &application.containers);
            SelectedTarget { reference, result }
        })
        .collect())
}

/// Resolve paths for `object` and apply the container filters
pub fn prepare(
    registry: &MappingRegistry,
    resource: &ApiResource,
    reference: TargetRef,
    object: DynamicObject,
    filters: &[ContainerSelector],
) -> Result<Target, BindingError> {
    let body = serde_json::to_value(&object).map_err(|e| BindingError::ObjectStore(e.to_string()))?;
    let target = reference.to_string();
    let (paths, containers) = registry.resolve_for(resource, &target, &body)?;
    let (selected, unselected) = select_containers(&body, &containers, filters, &target)?;
    let names = selected.iter().map(|path| container_name(&body, path, &containers)).collect();

    Ok(Target {
        reference,
        resource: resource.clone(),
        body,
        paths,
        selected,
        unselected,
        containers: names,
    })
}

/// Split `containers` into the ones `filters` select and the rest.
///
/// Indices count positions across every container path of the mapping.
/// An empty filter list selects every container. Selected paths keep
/// document order and appear once even when matched by several filters.
pub fn select_containers(
    body: &Value,
    containers: &[FieldPath],
    filters: &[ContainerSelector],
    target: &str,
) -> Result<(Vec<FieldPath>, Vec<FieldPath>), BindingError> {
    if filters.is_empty() {
        return Ok((containers.to_vec(), Vec::new()));
    }

    let mut chosen = vec![false; containers.len()];
    for filter in filters {
        let position = match filter {
            ContainerSelector::Index(index) => usize::try_from(*index).ok().filter(|&index| index < containers.len()),
            ContainerSelector::Name(name) => containers
                .iter()
                .position(|path| path.get(body).and_then(|c| c.get("name")).and_then(Value::as_str) == Some(name)),
        };

        match position {
            Some(position) => chosen[position] = true,
            None => {
                return Err(BindingError::ContainerNotFound {
                    target: target.to_string(),
                    container: filter.to_string(),
                })
            }
        }
    }

    let (selected, unselected): (Vec<_>, Vec<_>) = containers.iter().cloned().zip(chosen).partition(|(_, chosen)| *chosen);
    Ok((
        selected.into_iter().map(|(path, _)| path).collect(),
        unselected.into_iter().map(|(path, _)| path).collect(),
    ))
}

fn container_name(body: &Value, path: &FieldPath, containers: &[FieldPath]) -> String {
    path.get(body)
        .and_then(|container| container.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            let index = containers.iter().position(|candidate| candidate == path).unwrap_or_default();
            format!("#{}", index)
        })
}
