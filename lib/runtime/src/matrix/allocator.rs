// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-device memory allocation for tiles.

use std::fmt;

use tessera_memory::{Buffer, StorageError, SystemStorage, create_buffer};

use crate::Device;

/// Allocates the memory behind tiles on a given device.
///
/// The runtime holds one allocator; staging and [`super::Tile::allocate`]
/// go through it, so an alternative implementation observes every
/// allocation the engine makes.
///
/// # Safety
/// Every buffer returned by `allocate` must be fresh: no other buffer handle,
/// tile or reference may address its bytes. Tiles hand out `&mut` slices
/// into it.
pub unsafe trait TileAllocator: Send + Sync + fmt::Debug {
    fn allocate(&self, device: Device, bytes: usize) -> Result<Buffer, StorageError>;
}

/// Allocator backed by the storage types of `tessera-memory`.
///
/// - `Cpu`: [`SystemStorage`], or pinned memory when `pinned_host_memory` is
///   set and the `cuda` feature is enabled
/// - `Gpu(id)`: device memory on `id` (requires `cuda`)
#[derive(Debug, Clone, Default)]
pub struct DefaultAllocator {
    pinned_host_memory: bool,
}

impl DefaultAllocator {
    pub fn new(pinned_host_memory: bool) -> Self {
        if pinned_host_memory && !cfg!(feature = "cuda") {
            tracing::warn!("pinned host memory requested without the cuda feature; using system memory");
        }
        Self { pinned_host_memory }
    }

    pub fn pinned_host_memory(&self) -> bool {
        self.pinned_host_memory
    }
}

// SAFETY: each call creates a new storage
unsafe impl TileAllocator for DefaultAllocator {
    fn allocate(&self, device: Device, bytes: usize) -> Result<Buffer, StorageError> {
        match device {
            #[cfg(feature = "cuda")]
            Device::Cpu if self.pinned_host_memory => {
                Ok(create_buffer(tessera_memory::PinnedStorage::new(bytes, 0)?))
            }
            Device::Cpu => Ok(create_buffer(SystemStorage::new(bytes)?)),
            #[cfg(feature = "cuda")]
            Device::Gpu(id) => Ok(create_buffer(tessera_memory::DeviceStorage::new(bytes, id)?)),
            #[cfg(not(feature = "cuda"))]
            Device::Gpu(id) => Err(StorageError::Unsupported(format!(
                "cannot allocate on gpu:{id} without the cuda feature"
            ))),
        }
    }
}
