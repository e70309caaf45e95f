// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Compute pool implementation with tokio-rayon integration
//!
//! Multiple async tasks may submit work to the same pool concurrently; Rayon's
//! work stealing distributes it over the pool threads. A panic inside a task
//! is caught on the pool thread and reported as [`Error::Panicked`] instead of
//! being resumed on the awaiting task.

use super::{ComputeConfig, ComputeMetrics};
use crate::{Error, Result};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// A compute pool that manages CPU-intensive operations
#[derive(Clone)]
pub struct ComputePool {
    pool: Arc<rayon::ThreadPool>,
    metrics: Arc<ComputeMetrics>,
    config: ComputeConfig,
}

impl std::fmt::Debug for ComputePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePool")
            .field("num_threads", &self.pool.current_num_threads())
            .field("metrics", &self.metrics)
            .field("config", &self.config)
            .finish()
    }
}

impl ComputePool {
    pub fn new(config: ComputeConfig) -> Result<Self> {
        let pool = config.build_pool()?;
        tracing::debug!(
            prefix = %config.thread_prefix,
            threads = pool.current_num_threads(),
            "compute pool started"
        );

        Ok(Self {
            pool: Arc::new(pool),
            metrics: Arc::new(ComputeMetrics::new()),
            config,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(ComputeConfig::default())
    }

    /// Execute a synchronous computation on the thread pool, blocking the
    /// calling thread until it returns.
    ///
    /// Called from a pool thread this runs `f` inline, so nested use inside a
    /// task already executing on the pool does not deadlock.
    pub fn execute_sync<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(f)
    }

    /// Execute a task on the pool and await its result.
    pub async fn execute<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let pool = self.pool.clone();
        let metrics = self.metrics.clone();

        tokio_rayon::spawn(move || {
            let _timer = metrics.start_task();
            std::panic::catch_unwind(AssertUnwindSafe(|| pool.install(f))).map_err(|payload| {
                metrics.record_panic();
                Error::from_panic(payload)
            })
        })
        .await
    }

    pub fn metrics(&self) -> &ComputeMetrics {
        &self.metrics
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}
