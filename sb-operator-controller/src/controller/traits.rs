use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::BTreeMap;

use crate::crd::hub::traits::Hub;

// Trait to build a child Resource of a Hub CustomResourceDefinition from
// the entries computed for it
pub trait FromHub<T>
where
    T: Hub,
{
    fn from_hub(hub: &T, name: &str, owner_ref: Option<OwnerReference>, entries: &BTreeMap<String, String>) -> Self;
}

// Trait to detect if a child Resource has drifted from another instance
// of the same Resource, where Resource has implemented the FromHub trait
pub trait ResourceDrift<T>
where
    T: Hub,
{
    fn has_drifted(&self, other: &Self) -> bool;
}
