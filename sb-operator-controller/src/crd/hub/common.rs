use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crd::v1alpha1;


#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<v1alpha1::common::ConditionStatus> for ConditionStatus {
    fn from(status: v1alpha1::common::ConditionStatus) -> Self {
        match status {
            v1alpha1::common::ConditionStatus::True => ConditionStatus::True,
            v1alpha1::common::ConditionStatus::False => ConditionStatus::False,
            v1alpha1::common::ConditionStatus::Unknown => ConditionStatus::Unknown,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    /// Create a condition stamped with the current time
    pub fn new(type_: &str, status: ConditionStatus, reason: &str, message: impl Into<String>) -> Self {
        let message = message.into();

        Condition {
            type_: type_.to_string(),
            status,
            last_transition_time: Some(Utc::now()),
            reason: Some(reason.to_string()),
            message: (!message.is_empty()).then_some(message),
        }
    }
}

impl From<v1alpha1::common::Condition> for Condition {
    fn from(condition: v1alpha1::common::Condition) -> Self {
        Condition {
            type_: condition.type_,
            status: condition.status.into(),
            last_transition_time: condition.last_transition_time,
            reason: condition.reason,
            message: condition.message,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SecretReference {
    pub name: String,
}

impl From<v1alpha1::common::SecretReference> for SecretReference {
    fn from(reference: v1alpha1::common::SecretReference) -> Self {
        SecretReference { name: reference.name }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionRecord {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    pub secret: String,
}

impl From<v1alpha1::common::ProjectionRecord> for ProjectionRecord {
    fn from(record: v1alpha1::common::ProjectionRecord) -> Self {
        ProjectionRecord {
            api_version: record.api_version,
            kind: record.kind,
            name: record.name,
            containers: record.containers,
            env: record.env,
            secret: record.secret,
        }
    }
}
