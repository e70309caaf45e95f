// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Metrics for monitoring compute pool operations

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Tasks running longer than this are counted as slow
const SLOW_TASK_THRESHOLD: Duration = Duration::from_millis(100);

/// Metrics for one compute pool
#[derive(Debug, Default)]
pub struct ComputeMetrics {
    tasks_total: AtomicU64,
    tasks_active: AtomicUsize,
    tasks_panicked: AtomicU64,
    /// Total time spent in tasks (microseconds)
    total_compute_time_us: AtomicU64,
    /// Maximum task duration seen (microseconds)
    max_task_duration_us: AtomicU64,
    slow_tasks: AtomicU64,
}

impl ComputeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing a task; the task is recorded as complete when the
    /// returned timer is dropped, including during unwinding.
    pub fn start_task(&self) -> TaskTimer<'_> {
        self.tasks_active.fetch_add(1, Ordering::Relaxed);
        TaskTimer {
            metrics: self,
            start: Instant::now(),
        }
    }

    pub(crate) fn record_panic(&self) {
        self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
    }

    fn record_task_completion(&self, duration: Duration) {
        self.tasks_active.fetch_sub(1, Ordering::Relaxed);
        self.tasks_total.fetch_add(1, Ordering::Relaxed);

        let duration_us = duration.as_micros().min(u64::MAX as u128) as u64;
        self.total_compute_time_us
            .fetch_add(duration_us, Ordering::Relaxed);
        self.max_task_duration_us
            .fetch_max(duration_us, Ordering::Relaxed);

        if duration > SLOW_TASK_THRESHOLD {
            self.slow_tasks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn tasks_total(&self) -> u64 {
        self.tasks_total.load(Ordering::Relaxed)
    }

    pub fn tasks_active(&self) -> usize {
        self.tasks_active.load(Ordering::Relaxed)
    }

    pub fn tasks_panicked(&self) -> u64 {
        self.tasks_panicked.load(Ordering::Relaxed)
    }

    /// Average task duration in microseconds
    pub fn avg_task_duration_us(&self) -> f64 {
        let total = self.tasks_total();
        if total == 0 {
            return 0.0;
        }
        self.total_compute_time_us.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub fn max_task_duration_us(&self) -> u64 {
        self.max_task_duration_us.load(Ordering::Relaxed)
    }

    pub fn slow_tasks(&self) -> u64 {
        self.slow_tasks.load(Ordering::Relaxed)
    }
}

impl std::fmt::Display for ComputeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ComputeMetrics {{ tasks_total: {}, tasks_active: {}, tasks_panicked: {}, avg_duration_ms: {:.2}, max_duration_ms: {:.2}, slow_tasks: {} }}",
            self.tasks_total(),
            self.tasks_active(),
            self.tasks_panicked(),
            self.avg_task_duration_us() / 1000.0,
            self.max_task_duration_us() as f64 / 1000.0,
            self.slow_tasks(),
        )
    }
}

/// Guard returned by [`ComputeMetrics::start_task`].
pub struct TaskTimer<'a> {
    metrics: &'a ComputeMetrics,
    start: Instant,
}

impl Drop for TaskTimer<'_> {
    fn drop(&mut self) {
        self.metrics.record_task_completion(self.start.elapsed());
    }
}
