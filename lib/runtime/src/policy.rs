// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Backend policies: where and how a unit of work runs.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::dispatch::{Completion, Dispatcher, ExecutionContext};
use crate::{Device, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    /// Multi-core CPU, executed on the compute pool.
    Mc,
    /// GPU, executed in order on a device stream.
    Gpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// Whether an operation may work on its operands in place or must use
/// freshly allocated scratch tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Allocation {
    #[default]
    InPlace,
    Scratch,
}

/// Immutable descriptor selecting the execution backend of an operation.
///
/// The backend and the device always agree: `Mc` runs on [`Device::Cpu`],
/// `Gpu` on [`Device::Gpu`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Policy {
    backend: Backend,
    device: Device,
    priority: Priority,
    allocation: Allocation,
}

impl Policy {
    pub const fn mc() -> Self {
        Self {
            backend: Backend::Mc,
            device: Device::Cpu,
            priority: Priority::Normal,
            allocation: Allocation::InPlace,
        }
    }

    pub const fn gpu(device_id: u32) -> Self {
        Self {
            backend: Backend::Gpu,
            device: Device::Gpu(device_id),
            priority: Priority::Normal,
            allocation: Allocation::InPlace,
        }
    }

    /// The policy that computes on `device`.
    pub const fn for_device(device: Device) -> Self {
        match device {
            Device::Cpu => Self::mc(),
            Device::Gpu(id) => Self::gpu(id),
        }
    }

    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub const fn with_allocation(mut self, allocation: Allocation) -> Self {
        self.allocation = allocation;
        self
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn allocation(&self) -> Allocation {
        self.allocation
    }

    /// Bind an operation now and apply it to operands later.
    pub fn bind<F>(self, op: F) -> Bound<F> {
        Bound { policy: self, op }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::mc()
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}", self.backend, self.device)?;
        if self.priority == Priority::High {
            write!(f, "+high")?;
        }
        if self.allocation == Allocation::Scratch {
            write!(f, "+scratch")?;
        }
        Ok(())
    }
}

/// An operation bound to a policy, waiting for its operands.
#[derive(Debug, Clone)]
pub struct Bound<F> {
    policy: Policy,
    op: F,
}

impl<F> Bound<F> {
    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn run<T, R, Fut>(self, dispatcher: &Dispatcher, operands: Fut) -> Completion<R>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        R: Send + 'static,
        F: FnOnce(T, &ExecutionContext) -> Result<R> + Send + 'static,
    {
        dispatcher.dispatch(self.policy, operands, self.op)
    }

    /// Like [`Bound::run`] for operands that may have failed upstream.
    pub fn try_run<T, R, Fut>(self, dispatcher: &Dispatcher, operands: Fut) -> Completion<R>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
        R: Send + 'static,
        F: FnOnce(T, &ExecutionContext) -> Result<R> + Send + 'static,
    {
        dispatcher.try_dispatch(self.policy, operands, self.op)
    }
}
