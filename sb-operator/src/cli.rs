// SPDX-FileCopyrightText: 2025 Timothy Pogue
//
// SPDX-License-Identifier: ISC

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[
    clap(
        name = "service-binding-operator",
        version,
        author,
        about = "Operator projecting provisioned service credentials into application workloads"
    )
]
pub struct CliArgs {
    #[clap(subcommand)]
    pub cmd: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[
        clap(
            name = "crds",
            about = "Generate Custom Resource Definitions (CRDs) for the operator"
        )
    ]
    Crds,
    #[
        clap(
            name = "controller",
            about = "Run the controller"
        )
    ]
    Controller {
        /// Configuration file (JSON, YAML or TOML)
        #[clap(long, env = "SB_OPERATOR_CONFIG")]
        config: Option<String>,
        /// Directory inside workload containers under which bindings are mounted
        #[clap(long)]
        binding_root: Option<String>,
    },
}
