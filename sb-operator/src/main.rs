// SPDX-FileCopyrightText: 2025 Timothy Pogue
//
// SPDX-License-Identifier: ISC

mod cli;

use std::sync::Arc;
use futures::StreamExt;
use std::process;
use clap::Parser;
use clap::CommandFactory;
use rustls::crypto::aws_lc_rs;

use sb_operator_common::config::AppConfigBuilder;
use sb_operator_common::state::State;
use sb_operator_common::telemetry::{error, info, setup_logging};
use sb_operator_controller::controller::{context::Context, utils::{error_policy, create_k8s_client}, service_binding::ServiceBindingController};
use sb_operator_controller::crd::{v1alpha1::service_binding::ServiceBinding as V1Alpha1ServiceBinding, utils as crd_utils};

use crate::cli::{CliArgs, Commands};

#[tokio::main]
async fn main() {
    // Install the default aws_lc_rs crypto provider
    let _ = aws_lc_rs::default_provider().install_default();

    let args = CliArgs::parse();

    setup_logging();

    match &args.cmd {
        Some(Commands::Crds) => match crd_utils::generate_crds() {
            Ok(crds) => print!("{}", crds),
            Err(e) => {
                error!(
                    event = "Error",
                    error = %e,
                );
                process::exit(1);
            }
        },
        Some(Commands::Controller { config, binding_root }) => {
            info!(
                event = "Starting",
                version = env!("CARGO_PKG_VERSION"),
            );

            // Load configuration
            let mut builder = AppConfigBuilder::default();
            if let Some(path) = config {
                builder.with_file(path);
            }
            let config = builder
                .with_env()
                .with_override_option("controller.binding_root", binding_root.as_deref())
                .build()
                .unwrap_or_else(|e| {
                    error!(
                        event = "Error",
                        error = %e,
                    );
                    process::exit(1);
                });

            // Create necessary resources
            let state = Arc::new(State { config });
            let client = create_k8s_client().await.unwrap_or_else(|e| {
                error!(
                    event = "Error",
                    error = %e,
                );
                process::exit(1);
            });
            let controller_ctx = Arc::new(Context::new(client, state.clone()));

            // Create CRD controllers
            let v1alpha1_binding_controller = ServiceBindingController::create_controller::<V1Alpha1ServiceBinding>(controller_ctx.clone()).await;

            // Run CRD controllers until a termination signal arrives
            info!(event = "ControllerStarted", kind = "ServiceBinding", version = "v1alpha1");
            let v1alpha1_binding_handle = tokio::spawn(async move {
                v1alpha1_binding_controller
                    .shutdown_on_signal()
                    .run(
                        ServiceBindingController::reconcile::<V1Alpha1ServiceBinding>,
                        error_policy::<V1Alpha1ServiceBinding>,
                        controller_ctx.clone(),
                    )
                    .for_each(|r| async move {
                        match r {
                            Ok(_) => info!(event = "Reconciled", kind = "ServiceBinding", version = "v1alpha1"),
                            Err(e) => error!(event = "ReconcileError", error = %e),
                        }
                    })
                    .await
            });

            // Wait for all controllers to finish
            match tokio::try_join!(v1alpha1_binding_handle) {
                Ok(_) => info!(event = "Stopped"),
                Err(e) => error!(event = "Error", error = %e),
            }
        },
        None => {
            let mut cmd = CliArgs::command();
            let _ = cmd.print_help();
            process::exit(1);
        },
    }
}
