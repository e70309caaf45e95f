// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Storage backing tessera tiles.
//!
//! This crate provides:
//! - A single trait for type erasure (`MemoryDescription`)
//! - Concrete storage types for host memory and, with the `cuda` feature,
//!   pinned host memory and device memory
//!
//! Storage is owned; dropping the last [`Buffer`] referencing an allocation frees it.

#[cfg(feature = "cuda")]
mod device;
#[cfg(feature = "cuda")]
mod pinned;
mod system;

#[cfg(test)]
mod tests;

#[cfg(feature = "cuda")]
pub use device::{DeviceStorage, cuda_context};
#[cfg(feature = "cuda")]
pub use pinned::PinnedStorage;
pub use system::SystemStorage;

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[cfg(feature = "cuda")]
    #[error("CUDA error: {0}")]
    Cuda(#[from] cudarc::driver::DriverError),
}

/// Storage type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageKind {
    /// System memory (aligned heap allocation)
    System,

    /// CUDA pinned host memory
    Pinned,

    /// CUDA device memory with device ID
    Device(u32),
}

impl StorageKind {
    /// Whether the CPU can dereference addresses of this kind.
    #[inline]
    pub fn is_host_addressable(&self) -> bool {
        matches!(self, StorageKind::System | StorageKind::Pinned)
    }
}

/// Core trait for memory regions that can be type-erased.
///
/// Concrete storage types implement this trait to enable type erasure via
/// `Arc<dyn MemoryDescription>`.
pub trait MemoryDescription: Send + Sync + fmt::Debug {
    /// Base address of the memory region.
    fn addr(&self) -> usize;

    /// Size of the memory region in bytes.
    fn size(&self) -> usize;

    /// Type of storage backing this region.
    fn storage_kind(&self) -> StorageKind;

    /// Enable downcasting to concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// Type-erased, shared handle to an allocation.
#[derive(Clone)]
pub struct Buffer(Arc<dyn MemoryDescription>);

impl Buffer {
    /// The unowned region covered by this buffer.
    pub fn region(&self) -> MemoryRegion {
        MemoryRegion::new(self.addr(), self.size())
    }

    /// Number of live handles to the same allocation.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl MemoryDescription for Buffer {
    fn addr(&self) -> usize {
        self.0.addr()
    }
    fn size(&self) -> usize {
        self.0.size()
    }
    fn storage_kind(&self) -> StorageKind {
        self.0.storage_kind()
    }
    fn as_any(&self) -> &dyn Any {
        self.0.as_any()
    }
}

impl std::ops::Deref for Buffer {
    type Target = dyn MemoryDescription;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("addr", &self.addr())
            .field("size", &self.size())
            .field("kind", &self.storage_kind())
            .finish()
    }
}

/// Helper function to convert concrete storage to type-erased form.
pub fn create_buffer<S: MemoryDescription + 'static>(memory: S) -> Buffer {
    Buffer(Arc::new(memory))
}

/// An unowned contiguous chunk of memory, not storage specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    /// Start address of the memory region.
    pub addr: usize,

    /// Size of the memory region in bytes.
    pub size: usize,
}

impl MemoryRegion {
    pub fn new(addr: usize, size: usize) -> Self {
        Self { addr, size }
    }

    #[inline]
    pub fn addr(&self) -> usize {
        self.addr
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Sub-region starting `offset` bytes in, `size` bytes long.
    pub fn slice(&self, offset: usize, size: usize) -> Result<MemoryRegion> {
        match offset.checked_add(size) {
            Some(end) if end <= self.size => Ok(MemoryRegion::new(self.addr + offset, size)),
            _ => Err(StorageError::OperationFailed(format!(
                "region slice {offset}+{size} exceeds region of {} bytes",
                self.size
            ))),
        }
    }
}
