// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! CPU backend: Rayon thread pools bridged into Tokio.
//!
//! Work dispatched with the `Mc` backend runs on a [`ComputePool`]. The
//! runtime owns two of them: the main pool and a small pool reserved for
//! high priority work, so that latency-critical tasks are not queued behind
//! bulk computation.

use anyhow::Result;
use rayon::ThreadPoolBuilder;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::TuneParameters;

pub mod metrics;
pub mod pool;

pub use metrics::ComputeMetrics;
pub use pool::ComputePool;

/// Configuration for one compute thread pool
#[derive(Debug, Clone)]
pub struct ComputeConfig {
    /// Number of threads in the Rayon pool (defaults to num_cpus / 2)
    pub num_threads: Option<usize>,

    /// Stack size for compute threads
    pub stack_size: Option<usize>,

    /// Thread name prefix
    pub thread_prefix: String,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        TuneParameters::default().into()
    }
}

impl From<&TuneParameters> for ComputeConfig {
    fn from(tune: &TuneParameters) -> Self {
        Self {
            num_threads: tune.compute_threads,
            stack_size: tune.compute_stack_size,
            thread_prefix: tune.compute_thread_prefix.clone(),
        }
    }
}

impl From<TuneParameters> for ComputeConfig {
    fn from(tune: TuneParameters) -> Self {
        (&tune).into()
    }
}

impl ComputeConfig {
    /// Configuration of the pool reserved for high priority work.
    pub fn high_priority(tune: &TuneParameters) -> Self {
        Self {
            num_threads: Some(tune.high_priority_threads),
            stack_size: tune.compute_stack_size,
            thread_prefix: format!("{}-hp", tune.compute_thread_prefix),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_threads == Some(0) {
            anyhow::bail!("number of compute threads cannot be 0");
        }

        if let Some(stack_size) = self.stack_size
            && stack_size < 128 * 1024
        {
            anyhow::bail!(
                "stack size too small: {}KB. Minimum recommended: 128KB",
                stack_size / 1024
            );
        }

        Ok(())
    }

    /// Number of threads the pool will be built with.
    pub fn resolved_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| (n.get() / 2).clamp(2, 16))
                .unwrap_or(2)
        })
    }

    pub(crate) fn build_pool(&self) -> Result<rayon::ThreadPool> {
        self.validate()?;

        let mut builder = ThreadPoolBuilder::new().num_threads(self.resolved_threads());

        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let prefix = self.thread_prefix.clone();
        let thread_counter = Arc::new(AtomicU64::new(0));
        builder = builder.thread_name(move |_| {
            let id = thread_counter.fetch_add(1, Ordering::SeqCst);
            format!("{}-{}", prefix, id)
        });

        builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create Rayon thread pool: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_config_from_tune() {
        let config = ComputeConfig::default();
        assert_eq!(config.thread_prefix, "tessera-compute");
        assert_eq!(config.stack_size, Some(2 * 1024 * 1024));
        assert!((2..=16).contains(&config.resolved_threads()));

        let tune = TuneParameters {
            high_priority_threads: 3,
            ..Default::default()
        };
        let hp = ComputeConfig::high_priority(&tune);
        assert_eq!(hp.num_threads, Some(3));
        assert_eq!(hp.thread_prefix, "tessera-compute-hp");
    }

    #[test]
    fn test_build_pool() {
        let config = ComputeConfig {
            num_threads: Some(2),
            ..Default::default()
        };

        let pool = config.build_pool().unwrap();
        assert_eq!(pool.current_num_threads(), 2);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let zero = ComputeConfig {
            num_threads: Some(0),
            ..Default::default()
        };
        assert!(zero.build_pool().is_err());

        let tiny_stack = ComputeConfig {
            stack_size: Some(1024),
            ..Default::default()
        };
        assert!(tiny_stack.validate().is_err());
    }
}
