use kube::{
    api::{Api, Patch, PatchParams},
    runtime::controller::Action,
    Client,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use std::sync::Arc;

use sb_operator_common::telemetry::error;

use crate::controller::context::Context;
use crate::error::{ControllerError, Result};

/// Create a new kube client by inferring the kubeconfig from the environment
/// or the default service account
///
/// # Returns
/// A Result containing the kube Client or an error
pub async fn create_k8s_client() -> Result<Client> {
    Client::try_default().await.map_err(ControllerError::from)
}

/// Error policy to log the error and requeue the object after the configured
/// retry interval
///
/// # Arguments
/// * `_object`: The object that caused the error
/// * `error`: The error that occurred
/// * `ctx`: The context of the controller
///
/// # Returns
/// An Action to requeue the object
pub fn error_policy<T>(_object: Arc<T>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    error!(
        event = "Error",
        error = %error,
    );
    Action::requeue(ctx.state.config.controller.retry_interval())
}

/// Merge `status` into the status subresource of a Resource
///
/// # Arguments
/// * `api`: The API client for the resource type
/// * `name`: The name of the object
/// * `status`: The status to write
/// * `field_manager`: The field manager recorded for the write
///
/// # Returns
/// A Result indicating success or an error
pub async fn patch_status<T, S>(api: &Api<T>, name: &str, status: &S, field_manager: &str) -> Result<()>
where
    T: Clone + Debug + Serialize + DeserializeOwned,
    S: Serialize,
{
    api.patch_status(
        name,
        &PatchParams::apply(field_manager),
        &Patch::Merge(json!({ "status": status })),
    )
    .await?;

    Ok(())
}
