// SPDX-FileCopyrightText: 2025 Timothy Pogue
//
// SPDX-License-Identifier: ISC

use std::path::Path;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use figment::{Figment, Error, providers::{Format, Json, Toml, Yaml, Env, Serialized}};

use crate::constant::ENV_PREFIX;
use crate::retry::RetryConfig;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[allow(unused)]
#[derive(Default)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
}


#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ControllerConfig {
    /// Directory inside workload containers under which bindings are mounted
    pub binding_root: String,
    /// Attempts made to write a workload before giving up on conflicts
    pub conflict_retries: u32,
    /// Requeue interval after a settled reconciliation
    pub resync_seconds: u64,
    /// Requeue interval after a transient failure
    pub retry_seconds: u64,
    pub field_manager: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            binding_root: "/bindings".to_string(),
            conflict_retries: 5,
            resync_seconds: 300,
            retry_seconds: 15,
            field_manager: "servicebinding.io".to_string(),
        }
    }
}

impl ControllerConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_seconds)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_seconds)
    }

    /// Backoff used when a workload write loses an optimistic concurrency race
    pub fn conflict_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.conflict_retries.max(1),
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

pub struct AppConfigBuilder {
    figment: Figment,
}

impl AppConfigBuilder {
    pub fn with_file(&mut self, path: &str) -> &mut Self {
        let extension = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();

        self.figment = match extension {
            "json" => self.figment.clone().merge(Json::file(path).nested()),
            "yaml" | "yml" => self.figment.clone().merge(Yaml::file(path).nested()),
            "toml" => self.figment.clone().merge(Toml::file(path).nested()),
            _ => self.figment.clone(),
        };
        self
    }

    pub fn with_env(&mut self) -> &mut Self {
        self.figment = self.figment.clone().merge(Env::prefixed(&format!("{}__", ENV_PREFIX)).split("__"));
        self
    }

    pub fn with_override_option(&mut self, key: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value {
            self.figment = self.figment.clone().merge(Serialized::default(key, value));
        }
        self
    }

    pub fn build(&self) -> Result<AppConfig, Error> {
        self.figment.extract()
    }
}

impl Default for AppConfigBuilder {
    fn default() -> Self {
        AppConfigBuilder {
            figment: Figment::from(Serialized::defaults(AppConfig::default()))
        }
    }
}
