// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tessera logging.
//!
//! - Configuration loaded from:
//!   1. Environment variables (highest priority).
//!   2. Optional TOML file pointed to by the `TESSERA_LOGGING_CONFIG_PATH` environment variable.
//!
//! Logging can take two forms: `READABLE` or `JSONL`. The default is `READABLE`. `JSONL`
//! can be enabled by setting the `TESSERA_LOGGING_JSONL` environment variable to `1`.
//!
//! Filters can be configured using the `TESSERA_LOG` environment variable or by setting the
//! `log_filters` key in the TOML configuration file. Filters are comma-separated key-value pairs
//! where the key is the crate or module name and the value is the log level. The default log
//! level is `info`.
//!
//! Example:
//! ```toml
//! log_level = "warn"
//!
//! [log_filters]
//! "tessera_runtime::pipeline" = "trace"
//! ```

use std::collections::HashMap;
use std::sync::Once;

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter::Directive, fmt};

use crate::config::environment_names::logging as env_logging;
use crate::config::{disable_ansi_logging, jsonl_logging_enabled};

/// Default log level
const DEFAULT_FILTER_LEVEL: &str = "info";

/// Once instance to ensure the logger is only initialized once
static INIT: Once = Once::new();

#[derive(Serialize, Deserialize, Debug)]
struct LoggingConfig {
    log_level: String,
    log_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: DEFAULT_FILTER_LEVEL.to_string(),
            log_filters: HashMap::from([("rayon_core".to_string(), "error".to_string())]),
        }
    }
}

/// Initialize the logger. Later calls are no-ops.
pub fn init() {
    INIT.call_once(|| {
        if let Err(e) = setup_logging() {
            eprintln!("Failed to initialize logging: {}", e);
        }
    });
}

fn setup_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = filters(load_config()?);

    if jsonl_logging_enabled() {
        let l = fmt::layer()
            .json()
            .with_ansi(false)
            .with_timer(TimeFormatter::new())
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .with_filter(filter);
        tracing_subscriber::registry().with(l).try_init()?;
    } else {
        let l = fmt::layer()
            .with_ansi(!disable_ansi_logging())
            .event_format(fmt::format().compact().with_timer(TimeFormatter::new()))
            .with_writer(std::io::stderr)
            .with_filter(filter);
        tracing_subscriber::registry().with(l).try_init()?;
    }

    Ok(())
}

fn filters(config: LoggingConfig) -> EnvFilter {
    let default_directive = config
        .log_level
        .parse::<Directive>()
        .unwrap_or_else(|_| tracing::level_filters::LevelFilter::INFO.into());
    let mut filter_layer = EnvFilter::builder()
        .with_default_directive(default_directive)
        .with_env_var(env_logging::TESSERA_LOG)
        .from_env_lossy();

    for (module, level) in config.log_filters {
        match format!("{module}={level}").parse::<Directive>() {
            Ok(d) => {
                filter_layer = filter_layer.add_directive(d);
            }
            Err(e) => {
                eprintln!("Failed parsing filter '{level}' for module '{module}': {e}");
            }
        }
    }
    filter_layer
}

fn load_config() -> Result<LoggingConfig, figment::Error> {
    let config_path = std::env::var(env_logging::TESSERA_LOGGING_CONFIG_PATH).unwrap_or_default();
    Figment::new()
        .merge(Serialized::defaults(LoggingConfig::default()))
        .merge(Toml::file(config_path))
        .extract()
}

struct TimeFormatter {
    use_local_tz: bool,
}

impl TimeFormatter {
    fn new() -> Self {
        Self {
            use_local_tz: crate::config::use_local_timezone(),
        }
    }

    fn format_now(&self) -> String {
        if self.use_local_tz {
            chrono::Local::now()
                .format("%Y-%m-%dT%H:%M:%S%.6f%:z")
                .to_string()
        } else {
            chrono::Utc::now()
                .format("%Y-%m-%dT%H:%M:%S%.6fZ")
                .to_string()
        }
    }
}

impl FormatTime for TimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", self.format_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_filters() {
        let filter = filters(LoggingConfig::default());
        let rendered = filter.to_string();
        assert!(rendered.contains("rayon_core=error"), "{rendered}");
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = std::env::temp_dir().join(format!("tessera-log-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("logging.toml");
        std::fs::write(
            &path,
            "log_level = \"warn\"\n[log_filters]\n\"tessera_runtime::pipeline\" = \"trace\"\n",
        )
        .unwrap();

        temp_env::with_var(
            env_logging::TESSERA_LOGGING_CONFIG_PATH,
            Some(path.to_str().unwrap()),
            || {
                let config = load_config().unwrap();
                assert_eq!(config.log_level, "warn");
                assert_eq!(
                    config.log_filters.get("tessera_runtime::pipeline").map(String::as_str),
                    Some("trace")
                );
            },
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        tracing::debug!("logging initialized twice without panicking");
    }
}
