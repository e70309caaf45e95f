// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Environment variable name constants.
//!
//! Variables are grouped by functional area:
//! - **Logging**: log level, configuration file and output format
//! - **Tune**: the process-wide tuning parameters read by [`super::TuneParameters`]

/// Logging environment variables
pub mod logging {
    /// Log filter directives (e.g., "info", "tessera_runtime::pipeline=trace")
    pub const TESSERA_LOG: &str = "TESSERA_LOG";

    /// Path to logging configuration file
    pub const TESSERA_LOGGING_CONFIG_PATH: &str = "TESSERA_LOGGING_CONFIG_PATH";

    /// Enable JSONL logging format
    pub const TESSERA_LOGGING_JSONL: &str = "TESSERA_LOGGING_JSONL";

    /// Disable ANSI terminal colors in logs
    pub const TESSERA_DISABLE_ANSI_LOGGING: &str = "TESSERA_DISABLE_ANSI_LOGGING";

    /// Use local timezone for logging timestamps (default is UTC)
    pub const TESSERA_LOG_USE_LOCAL_TZ: &str = "TESSERA_LOG_USE_LOCAL_TZ";
}

/// Tuning parameter environment variables
///
/// Every field of `TuneParameters` can be overridden with `TESSERA_<FIELD>`.
pub mod tune {
    /// Prefix shared by every tuning variable
    pub const PREFIX: &str = "TESSERA_";

    /// Optional TOML file with tuning parameters
    pub const TESSERA_CONFIG_PATH: &str = "TESSERA_CONFIG_PATH";

    pub const TESSERA_COMPUTE_THREADS: &str = "TESSERA_COMPUTE_THREADS";
    pub const TESSERA_COMPUTE_STACK_SIZE: &str = "TESSERA_COMPUTE_STACK_SIZE";
    pub const TESSERA_COMPUTE_THREAD_PREFIX: &str = "TESSERA_COMPUTE_THREAD_PREFIX";
    pub const TESSERA_HIGH_PRIORITY_THREADS: &str = "TESSERA_HIGH_PRIORITY_THREADS";
    pub const TESSERA_NUM_GPU_STREAMS: &str = "TESSERA_NUM_GPU_STREAMS";
    pub const TESSERA_NUM_GPU_HIGH_PRIORITY_STREAMS: &str =
        "TESSERA_NUM_GPU_HIGH_PRIORITY_STREAMS";
    pub const TESSERA_COPY_CHUNK_SIZE: &str = "TESSERA_COPY_CHUNK_SIZE";
    pub const TESSERA_POLLING_INTERVAL_US: &str = "TESSERA_POLLING_INTERVAL_US";
    pub const TESSERA_PINNED_HOST_MEMORY: &str = "TESSERA_PINNED_HOST_MEMORY";
}
