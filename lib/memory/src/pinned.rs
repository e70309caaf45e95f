// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! CUDA pinned host memory storage.
//!
//! Page-locked host memory lets device copies run asynchronously; it is the
//! preferred staging area for transfers between a device and a transport that
//! only understands host memory.

use super::{MemoryDescription, Result, StorageError, StorageKind, device::cuda_context};
use cudarc::driver::CudaContext;
use std::any::Any;
use std::sync::Arc;

/// Page-locked host memory allocated via cuMemHostAlloc.
#[derive(Debug)]
pub struct PinnedStorage {
    ptr: usize,
    len: usize,
    ctx: Arc<CudaContext>,
}

unsafe impl Send for PinnedStorage {}
unsafe impl Sync for PinnedStorage {}

impl PinnedStorage {
    /// Allocate `len` bytes of pinned memory, registered with the context of
    /// `device_id`.
    pub fn new(len: usize, device_id: u32) -> Result<Self> {
        if len == 0 {
            return Err(StorageError::AllocationFailed(
                "zero-sized allocations are not supported".into(),
            ));
        }

        let ctx = cuda_context(device_id)?;
        ctx.bind_to_thread()?;
        // Tiles are read back by the host, so no write-combining.
        let ptr = unsafe { cudarc::driver::result::malloc_host(len, 0)? } as *mut u8;
        if ptr.is_null() {
            return Err(StorageError::AllocationFailed(format!(
                "pinned allocation of {len} bytes returned null"
            )));
        }

        // Zero the allocation so it matches the contract of SystemStorage.
        unsafe { std::ptr::write_bytes(ptr, 0, len) };

        Ok(Self {
            ptr: ptr as usize,
            len,
            ctx,
        })
    }

    /// # Safety
    /// The caller must ensure the pointer is not used after this storage is dropped.
    pub unsafe fn as_ptr(&self) -> *const u8 {
        self.ptr as *const u8
    }

    /// # Safety
    /// The caller must ensure the pointer is not used after this storage is dropped
    /// and that there are no other references to this memory.
    pub unsafe fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr as *mut u8
    }
}

impl Drop for PinnedStorage {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.bind_to_thread() {
            tracing::debug!("failed to bind CUDA context for free: {e}");
        }
        unsafe {
            if let Err(e) = cudarc::driver::result::free_host(self.ptr as _) {
                tracing::debug!("failed to free pinned memory: {e}");
            }
        };
    }
}

impl MemoryDescription for PinnedStorage {
    fn addr(&self) -> usize {
        self.ptr
    }

    fn size(&self) -> usize {
        self.len
    }

    fn storage_kind(&self) -> StorageKind {
        StorageKind::Pinned
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
