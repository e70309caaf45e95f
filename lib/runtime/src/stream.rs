// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-order execution streams for the GPU backend.
//!
//! A [`Stream`] is a FIFO job queue drained by one task: jobs submitted to
//! the same stream run one after another in submission order, jobs on
//! different streams run concurrently. With the `cuda` feature each stream
//! also owns a CUDA stream, so kernels and copies enqueued by consecutive
//! jobs are ordered on the device without cross-stream synchronization.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

#[cfg(feature = "cuda")]
use cudarc::driver::CudaStream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::config::TuneParameters;
use crate::policy::Priority;
use crate::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct StreamInner {
    device_id: u32,
    priority: Priority,
    index: usize,
    jobs: mpsc::UnboundedSender<Job>,
    #[cfg(feature = "cuda")]
    cuda: Arc<CudaStream>,
}

#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("device_id", &self.inner.device_id)
            .field("priority", &self.inner.priority)
            .field("index", &self.inner.index)
            .finish()
    }
}

impl Stream {
    fn spawn(handle: &tokio::runtime::Handle, device_id: u32, priority: Priority, index: usize) -> Result<Self> {
        #[cfg(feature = "cuda")]
        let cuda = tessera_memory::cuda_context(device_id)?.new_stream()?;

        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                // jobs catch their own panics; a join error means shutdown
                if tokio::task::spawn_blocking(job).await.is_err() {
                    break;
                }
            }
            tracing::trace!(device_id, ?priority, index, "stream drained");
        });

        tracing::debug!(device_id, ?priority, index, "created stream");

        Ok(Self {
            inner: Arc::new(StreamInner {
                device_id,
                priority,
                index,
                jobs,
                #[cfg(feature = "cuda")]
                cuda,
            }),
        })
    }

    pub fn device_id(&self) -> u32 {
        self.inner.device_id
    }

    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    pub fn index(&self) -> usize {
        self.inner.index
    }

    #[cfg(feature = "cuda")]
    pub fn cuda(&self) -> &Arc<CudaStream> {
        &self.inner.cuda
    }

    /// Enqueue `f` behind every job already submitted to this stream.
    ///
    /// The receiver yields the job's result; a panic in `f` is reported as
    /// [`Error::Panicked`].
    pub fn submit<F, R>(&self, f: F) -> oneshot::Receiver<Result<R>>
    where
        F: FnOnce() -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let result = std::panic::catch_unwind(AssertUnwindSafe(f))
                .unwrap_or_else(|payload| Err(Error::from_panic(payload)));
            let _ = tx.send(result);
        });

        if self.inner.jobs.send(job).is_err() {
            tracing::warn!(
                device_id = self.inner.device_id,
                index = self.inner.index,
                "stream has shut down; job dropped"
            );
        }
        rx
    }

    /// Two handles to the same stream.
    pub fn same_as(&self, other: &Stream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

struct DeviceStreams {
    normal: Vec<Stream>,
    high: Vec<Stream>,
    next_normal: usize,
    next_high: usize,
}

/// Lazily created per-device stream sets, handed out round-robin.
pub struct StreamPool {
    handle: tokio::runtime::Handle,
    num_streams: usize,
    num_high_priority_streams: usize,
    devices: Mutex<HashMap<u32, DeviceStreams>>,
}

impl fmt::Debug for StreamPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamPool")
            .field("num_streams", &self.num_streams)
            .field("num_high_priority_streams", &self.num_high_priority_streams)
            .field("devices", &self.devices.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StreamPool {
    pub fn new(handle: tokio::runtime::Handle, tune: &TuneParameters) -> Self {
        Self {
            handle,
            num_streams: tune.num_gpu_streams.max(1),
            num_high_priority_streams: tune.num_gpu_high_priority_streams.max(1),
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// The next stream of `priority` on `device_id`.
    pub fn next(&self, device_id: u32, priority: Priority) -> Result<Stream> {
        let mut devices = self.devices.lock();
        let streams = match devices.entry(device_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.create_device_streams(device_id)?),
        };

        let (set, next) = match priority {
            Priority::Normal => (&streams.normal, &mut streams.next_normal),
            Priority::High => (&streams.high, &mut streams.next_high),
        };
        let stream = set[*next % set.len()].clone();
        *next = next.wrapping_add(1);
        Ok(stream)
    }

    fn create_device_streams(&self, device_id: u32) -> Result<DeviceStreams> {
        let normal = (0..self.num_streams)
            .map(|i| Stream::spawn(&self.handle, device_id, Priority::Normal, i))
            .collect::<Result<Vec<_>>>()?;
        let high = (0..self.num_high_priority_streams)
            .map(|i| Stream::spawn(&self.handle, device_id, Priority::High, i))
            .collect::<Result<Vec<_>>>()?;

        Ok(DeviceStreams {
            normal,
            high,
            next_normal: 0,
            next_high: 0,
        })
    }
}
