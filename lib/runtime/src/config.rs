// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use derive_builder::Builder;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use validator::Validate;

pub mod environment_names;

use environment_names::tune as env_tune;

/// Default stack size of compute threads (2 MiB)
const DEFAULT_COMPUTE_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Default thread name prefix of the compute pool
const DEFAULT_COMPUTE_THREAD_PREFIX: &str = "tessera-compute";

/// Tiles holding more elements than this are copied column-parallel
const DEFAULT_COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// Process-wide tuning parameters.
///
/// Read once before the first [`crate::Runtime`] is built and immutable
/// afterwards; the runtime keeps them behind an `Arc` and hands out shared
/// references to the components that need them.
#[derive(Serialize, Deserialize, Validate, Debug, Builder, Clone, PartialEq)]
#[builder(build_fn(private, name = "build_internal"), derive(Debug, Serialize))]
pub struct TuneParameters {
    /// Number of threads of the compute pool.
    /// If not set, defaults to half the cores, between 2 and 16.
    /// Set this at runtime with environment variable TESSERA_COMPUTE_THREADS
    #[validate(range(min = 1))]
    #[builder(default = "None")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub compute_threads: Option<usize>,

    /// Stack size for compute threads in bytes
    /// Set this at runtime with environment variable TESSERA_COMPUTE_STACK_SIZE
    #[validate(range(min = 131072))]
    #[builder(default = "Some(DEFAULT_COMPUTE_STACK_SIZE)")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub compute_stack_size: Option<usize>,

    /// Thread name prefix for compute pool threads
    /// Set this at runtime with environment variable TESSERA_COMPUTE_THREAD_PREFIX
    #[validate(length(min = 1))]
    #[builder(default = "DEFAULT_COMPUTE_THREAD_PREFIX.to_string()")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub compute_thread_prefix: String,

    /// Threads reserved for high priority CPU work
    #[validate(range(min = 1))]
    #[builder(default = "1")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub high_priority_threads: usize,

    /// Normal priority streams per GPU
    #[validate(range(min = 1))]
    #[builder(default = "4")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub num_gpu_streams: usize,

    /// High priority streams per GPU
    #[validate(range(min = 1))]
    #[builder(default = "2")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub num_gpu_high_priority_streams: usize,

    /// Element count above which host tile copies are split across the compute pool
    #[validate(range(min = 1))]
    #[builder(default = "DEFAULT_COPY_CHUNK_SIZE")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub copy_chunk_size: usize,

    /// Interval between completion queries of outstanding device events and
    /// transport requests, in microseconds
    #[validate(range(min = 1))]
    #[builder(default = "100")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub polling_interval_us: u64,

    /// Allocate CPU staging tiles in page-locked memory (requires `cuda`)
    #[builder(default = "false")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub pinned_host_memory: bool,
}

impl fmt::Display for TuneParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.compute_threads {
            Some(val) => write!(f, "compute_threads={val}, ")?,
            None => write!(f, "compute_threads=default (num_cores / 2), ")?,
        }
        write!(f, "high_priority_threads={}, ", self.high_priority_threads)?;
        write!(f, "num_gpu_streams={}, ", self.num_gpu_streams)?;
        write!(
            f,
            "num_gpu_high_priority_streams={}, ",
            self.num_gpu_high_priority_streams
        )?;
        write!(f, "copy_chunk_size={}, ", self.copy_chunk_size)?;
        write!(f, "polling_interval_us={}, ", self.polling_interval_us)?;
        write!(f, "pinned_host_memory={}", self.pinned_host_memory)
    }
}

impl TuneParameters {
    pub fn builder() -> TuneParametersBuilder {
        TuneParametersBuilder::default()
    }

    pub(crate) fn figment() -> Figment {
        let config_path = std::env::var(env_tune::TESSERA_CONFIG_PATH).unwrap_or_default();
        Figment::new()
            .merge(Serialized::defaults(TuneParameters::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(env_tune::PREFIX).filter_map(|k| {
                let full_key = format!("{}{}", env_tune::PREFIX, k.as_str());
                // filters out empty environment variables
                match std::env::var(&full_key) {
                    Ok(v) if !v.is_empty() => Some(k.into()),
                    _ => None,
                }
            }))
    }

    /// Load the tuning parameters from the environment and configuration files
    /// Configuration is prioritized in the following order, where the last has the lowest priority:
    /// 1. Environment variables prefixed with `TESSERA_`
    /// 2. The TOML file named by `TESSERA_CONFIG_PATH`, if any
    /// 3. Built-in defaults
    pub fn from_settings() -> Result<TuneParameters> {
        let config: TuneParameters = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parameters suited to unit tests: two compute threads, one stream per
    /// priority and a tight polling interval.
    pub fn for_testing() -> Self {
        TuneParameters {
            compute_threads: Some(2),
            num_gpu_streams: 1,
            num_gpu_high_priority_streams: 1,
            polling_interval_us: 10,
            ..Default::default()
        }
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_micros(self.polling_interval_us)
    }
}

impl Default for TuneParameters {
    fn default() -> Self {
        Self {
            compute_threads: None,
            compute_stack_size: Some(DEFAULT_COMPUTE_STACK_SIZE),
            compute_thread_prefix: DEFAULT_COMPUTE_THREAD_PREFIX.to_string(),
            high_priority_threads: 1,
            num_gpu_streams: 4,
            num_gpu_high_priority_streams: 2,
            copy_chunk_size: DEFAULT_COPY_CHUNK_SIZE,
            polling_interval_us: 100,
            pinned_host_memory: false,
        }
    }
}

impl TuneParametersBuilder {
    /// Build and validate the tuning parameters
    pub fn build(&self) -> Result<TuneParameters> {
        let config = self.build_internal()?;
        config.validate()?;
        Ok(config)
    }
}

/// Check if a string is truthy
/// This will be used to evaluate environment variables or any other subjective
/// configuration parameters that can be set by the user that should be evaluated
/// as a boolean value.
pub fn is_truthy(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "1" | "true" | "on" | "yes")
}

/// Check if an environment variable is truthy
pub fn env_is_truthy(env: &str) -> bool {
    match std::env::var(env) {
        Ok(val) => is_truthy(val.as_str()),
        Err(_) => false,
    }
}

/// Check whether JSONL logging enabled
/// Set the `TESSERA_LOGGING_JSONL` environment variable a [`is_truthy`] value
pub fn jsonl_logging_enabled() -> bool {
    env_is_truthy(environment_names::logging::TESSERA_LOGGING_JSONL)
}

/// Check whether logging with ANSI terminal escape codes and colors is disabled.
/// Set the `TESSERA_DISABLE_ANSI_LOGGING` environment variable a [`is_truthy`] value
pub fn disable_ansi_logging() -> bool {
    env_is_truthy(environment_names::logging::TESSERA_DISABLE_ANSI_LOGGING)
}

/// Check whether to use local timezone for logging timestamps (default is UTC)
pub fn use_local_timezone() -> bool {
    env_is_truthy(environment_names::logging::TESSERA_LOG_USE_LOCAL_TZ)
}
