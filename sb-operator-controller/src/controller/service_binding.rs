use kube::{
    api::{Api, ResourceExt},
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as Finalizer},
        watcher,
    },
};
use k8s_openapi::api::core::v1::Secret;
use std::sync::Arc;

use sb_operator_common::telemetry::info;

use crate::controller::{context::Context, reconciler::Reconciler, utils::patch_status};
use crate::crd::{NamespacedCustomResource, hub::service_binding::ServiceBinding};
use crate::error::{ControllerError, Result};


pub static FINALIZER: &str = "servicebindings.finalizers.servicebinding.io";

pub struct ServiceBindingController;

impl ServiceBindingController {
    /// Create a new controller for the ServiceBinding resource
    ///
    /// The derived Secrets are owned by their binding, so a change to one
    /// triggers a reconciliation of the binding.
    ///
    /// # Arguments
    /// * `ctx` - The controller context
    ///
    /// # Returns
    /// The controller for the ServiceBinding resource
    pub async fn create_controller<T>(ctx: Arc<Context>) -> Controller<T>
    where
        T: NamespacedCustomResource
    {
        let client = ctx.client.clone();
        let binding = Api::<T>::all(client.clone());
        let secret = Api::<Secret>::all(client.clone());

        Controller::new(binding, watcher::Config::default())
            .owns(secret, watcher::Config::default())
    }

    /// Reconcile the ServiceBinding resource
    ///
    /// # Arguments
    /// * `binding` - The ServiceBinding resource to reconcile
    /// * `ctx` - The controller context
    ///
    /// # Returns
    /// An action to take after reconciling the ServiceBinding resource
    pub async fn reconcile<T>(binding: Arc<T>, ctx: Arc<Context>) -> Result<Action>
    where
        T: NamespacedCustomResource,
        ServiceBinding: From<T>,
    {
        let client = ctx.client.clone();

        // The ServiceBinding resource is namespaced, so we need to verify that it is specified
        let namespace = match binding.namespace() {
            Some(namespace) => namespace,
            None => return Err(
                ControllerError::MissingObjectKeyError(
                    "Expected ServiceBinding to be namespaced via metadata.namespace"
                )
            )
        };
        let api = Api::<T>::namespaced(client.clone(), &namespace);

        finalizer(&api, FINALIZER, binding, |event| async {
            match event {
                Finalizer::Apply(binding) => reconcile_binding(binding.as_ref(), &ctx, &api).await,
                Finalizer::Cleanup(binding) => cleanup_binding(binding.as_ref(), &ctx).await,
            }
        })
        .await
        .map_err(|e| ControllerError::FinalizerError(e.to_string()))
    }
}

/// Reconcile the ServiceBinding resource
///
/// Projects the binding into its targets and records the outcome in the
/// status subresource when it changed.
///
/// # Arguments
/// * `binding` - The ServiceBinding resource to reconcile
/// * `ctx` - The controller context
/// * `api` - The API client for the ServiceBinding resource
///
/// # Returns
/// An action to take after reconciling the ServiceBinding resource
async fn reconcile_binding<T>(binding: &T, ctx: &Context, api: &Api<T>) -> Result<Action>
where
    T: NamespacedCustomResource,
    ServiceBinding: From<T>,
{
    let config = &ctx.state.config.controller;
    let owner_ref = binding.controller_owner_ref(&());
    let hub = ServiceBinding::from(binding.clone());

    let pass = Reconciler::new(ctx.store.as_ref(), config).project(&hub, owner_ref).await?;

    if hub.status.as_ref() != Some(&pass.status) {
        info!(
            event = "UpdatingServiceBindingStatus",
            binding = hub.name(),
            reason = pass.status.conditions.first().and_then(|c| c.reason.as_deref()).unwrap_or_default()
        );
        patch_status(api, hub.name(), &pass.status, &config.field_manager).await?;
    }

    Ok(Action::requeue(if pass.retry {
        config.retry_interval()
    } else {
        config.resync_interval()
    }))
}

/// Clean up the ServiceBinding resource
///
/// Removes every entry the binding projected before the finalizer is
/// released. Any target that could not be cleaned keeps the finalizer.
///
/// # Arguments
/// * `binding` - The ServiceBinding resource to clean up
/// * `ctx` - The controller context
///
/// # Returns
/// An action to take after cleaning up the ServiceBinding resource
async fn cleanup_binding<T>(binding: &T, ctx: &Context) -> Result<Action>
where
    T: NamespacedCustomResource,
    ServiceBinding: From<T>,
{
    let hub = ServiceBinding::from(binding.clone());

    info!(
        event = "CleaningUpServiceBinding",
        binding = hub.name()
    );

    let outcomes = Reconciler::new(ctx.store.as_ref(), &ctx.state.config.controller)
        .cleanup(&hub)
        .await?;

    if let Some(error) = outcomes.into_iter().find_map(|outcome| outcome.result.err()) {
        return Err(error.into());
    }

    Ok(Action::await_change())
}
