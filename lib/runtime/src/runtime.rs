// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The [Runtime] is the process-scoped context every operation runs in.
//!
//! It owns the tuning parameters, the compute pools, the GPU stream pool,
//! the tile allocator and the completion-notification task. It is built once
//! from a [`TuneParameters`] before any work is issued and is cheap to clone;
//! drop the last clone only after every outstanding completion resolved.

use std::sync::Arc;

use crate::compute::{ComputeConfig, ComputePool};
use crate::config::TuneParameters;
use crate::dispatch::Dispatcher;
use crate::matrix::{DefaultAllocator, TileAllocator};
use crate::notifications::NotificationHandle;
use crate::stream::StreamPool;
use crate::{Error, Result};

/// Types of Tokio runtimes a [Runtime] can be attached to.
#[derive(Clone, Debug)]
enum RuntimeType {
    Shared(Arc<tokio::runtime::Runtime>),
    External(tokio::runtime::Handle),
}

impl RuntimeType {
    fn handle(&self) -> tokio::runtime::Handle {
        match self {
            RuntimeType::External(rt) => rt.clone(),
            RuntimeType::Shared(rt) => rt.handle().clone(),
        }
    }
}

#[derive(Clone, Debug)]
struct RuntimeInner {
    tune: Arc<TuneParameters>,
    tokio: RuntimeType,
    compute: ComputePool,
    high_priority: ComputePool,
    streams: Arc<StreamPool>,
    allocator: Arc<dyn TileAllocator>,
    notifications: NotificationHandle,
}

#[derive(Clone, Debug)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    fn new(tokio: RuntimeType, tune: TuneParameters) -> Result<Runtime> {
        let handle = tokio.handle();

        let compute = ComputePool::new(ComputeConfig::from(&tune))?;
        let high_priority = ComputePool::new(ComputeConfig::high_priority(&tune))?;
        let streams = Arc::new(StreamPool::new(handle.clone(), &tune));
        let notifications = NotificationHandle::spawn(&handle, tune.polling_interval());
        let allocator: Arc<dyn TileAllocator> =
            Arc::new(DefaultAllocator::new(tune.pinned_host_memory));

        tracing::debug!(%tune, "runtime initialized");

        Ok(Runtime {
            inner: Arc::new(RuntimeInner {
                tune: Arc::new(tune),
                tokio,
                compute,
                high_priority,
                streams,
                allocator,
                notifications,
            }),
        })
    }

    /// Attach to the Tokio runtime of the calling task.
    pub fn from_current(tune: TuneParameters) -> Result<Runtime> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Config(anyhow::anyhow!("no Tokio runtime: {e}")))?;
        Runtime::from_handle(handle, tune)
    }

    pub fn from_handle(handle: tokio::runtime::Handle, tune: TuneParameters) -> Result<Runtime> {
        Runtime::new(RuntimeType::External(handle), tune)
    }

    /// Load [`TuneParameters::from_settings`] and start an owned
    /// multi-threaded Tokio runtime.
    ///
    /// Must be called outside of any Tokio runtime.
    pub fn from_settings() -> Result<Runtime> {
        let tune = TuneParameters::from_settings()?;
        let tokio = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Config(e.into()))?;
        Runtime::new(RuntimeType::Shared(Arc::new(tokio)), tune)
    }

    /// Replace the tile allocator, e.g. to observe allocations.
    pub fn with_allocator(self, allocator: Arc<dyn TileAllocator>) -> Runtime {
        let mut inner = (*self.inner).clone();
        inner.allocator = allocator;
        Runtime {
            inner: Arc::new(inner),
        }
    }

    pub fn tune(&self) -> &TuneParameters {
        &self.inner.tune
    }

    /// Handle of the Tokio runtime completions are spawned on.
    pub fn handle(&self) -> tokio::runtime::Handle {
        self.inner.tokio.handle()
    }

    pub fn compute(&self) -> &ComputePool {
        &self.inner.compute
    }

    pub fn high_priority_compute(&self) -> &ComputePool {
        &self.inner.high_priority
    }

    pub fn streams(&self) -> &StreamPool {
        &self.inner.streams
    }

    pub fn allocator(&self) -> &dyn TileAllocator {
        self.inner.allocator.as_ref()
    }

    pub fn notifications(&self) -> &NotificationHandle {
        &self.inner.notifications
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.clone())
    }

    /// Block on `future` with the owned Tokio runtime, or through the
    /// attached handle.
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        match &self.inner.tokio {
            RuntimeType::Shared(rt) => rt.block_on(future),
            RuntimeType::External(handle) => handle.block_on(future),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Device;

    #[tokio::test]
    async fn test_from_current() {
        let runtime = Runtime::from_current(TuneParameters::for_testing()).unwrap();
        assert_eq!(runtime.compute().num_threads(), 2);
        assert_eq!(runtime.high_priority_compute().num_threads(), 1);
        assert_eq!(runtime.tune(), &TuneParameters::for_testing());

        let buffer = runtime.allocator().allocate(Device::Cpu, 128).unwrap();
        assert_eq!(buffer.size(), 128);
    }

    #[test]
    fn test_from_current_outside_tokio_fails() {
        assert!(matches!(
            Runtime::from_current(TuneParameters::for_testing()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_from_settings_owns_tokio() {
        temp_env::with_vars([("TESSERA_COMPUTE_THREADS", Some("3"))], || {
            let runtime = Runtime::from_settings().unwrap();
            assert_eq!(runtime.compute().num_threads(), 3);
            assert_eq!(runtime.block_on(async { 41 + 1 }), 42);
        });
    }

    #[tokio::test]
    async fn test_with_allocator_keeps_pools() {
        #[derive(Debug)]
        struct Refusing;
        // SAFETY: never returns a buffer
        unsafe impl TileAllocator for Refusing {
            fn allocate(
                &self,
                _device: Device,
                _bytes: usize,
            ) -> std::result::Result<tessera_memory::Buffer, tessera_memory::StorageError> {
                Err(tessera_memory::StorageError::AllocationFailed("refused".into()))
            }
        }

        let runtime = Runtime::from_current(TuneParameters::for_testing()).unwrap();
        let replaced = runtime.clone().with_allocator(Arc::new(Refusing));
        assert!(replaced.allocator().allocate(Device::Cpu, 8).is_err());
        assert!(runtime.allocator().allocate(Device::Cpu, 8).is_ok());
        assert_eq!(replaced.compute().num_threads(), runtime.compute().num_threads());
    }
}
