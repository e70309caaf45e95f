// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Element copies between tiles of equal size.
//!
//! The copy path is chosen from the storage kinds of the two buffers:
//! host to host copies run on the CPU (column-parallel on the compute pool
//! for large tiles); any device side goes through CUDA async memcpy on the
//! execution context's stream, followed by a synchronize.

use rayon::prelude::*;

use super::{Element, Tile};
use crate::dispatch::ExecutionContext;
use crate::{Error, Result};

/// Base pointer of the destination, shared with the pool threads. Columns
/// are disjoint because `ld >= rows`.
#[derive(Clone, Copy)]
struct ColumnBase<T>(*mut T);

// SAFETY: every task writes a distinct column
unsafe impl<T: Send> Send for ColumnBase<T> {}
unsafe impl<T: Send> Sync for ColumnBase<T> {}

impl<T> ColumnBase<T> {
    fn column(self, offset: usize) -> *mut T {
        self.0.wrapping_add(offset)
    }
}

/// Copy the elements of `src` into `dst`.
///
/// # Panics
/// When the sizes differ.
pub fn copy_tile<T: Element>(src: &Tile<T>, dst: &mut Tile<T>, ctx: &ExecutionContext) -> Result<()> {
    assert_eq!(
        src.size(),
        dst.size(),
        "copy_tile: source and destination sizes differ"
    );
    if src.is_empty() {
        return Ok(());
    }

    if src.is_host_accessible() && dst.is_host_accessible() {
        copy_host(src, dst, ctx);
        Ok(())
    } else {
        copy_device(src, dst, ctx)
    }
}

fn copy_host<T: Element>(src: &Tile<T>, dst: &mut Tile<T>, ctx: &ExecutionContext) {
    if src.is_contiguous() && dst.is_contiguous() && src.size().len() <= ctx.tune().copy_chunk_size {
        let len = src.size().len();
        // SAFETY: both tiles are dense and hold `len` host elements
        unsafe { std::ptr::copy_nonoverlapping(src.ptr(0, 0), dst.ptr_mut(0, 0), len) };
        return;
    }

    if src.size().len() <= ctx.tune().copy_chunk_size || src.cols() == 1 {
        for j in 0..src.cols() {
            dst.column_mut(j).copy_from_slice(src.column(j));
        }
        return;
    }

    let ld = dst.ld() as usize;
    let rows = dst.rows() as usize;
    let base = ColumnBase(dst.ptr_mut(0, 0));
    ctx.compute().execute_sync(|| {
        (0..src.cols()).into_par_iter().for_each(|j| {
            // SAFETY: column j of dst spans rows elements starting at ld * j
            let column = unsafe { std::slice::from_raw_parts_mut(base.column(ld * j as usize), rows) };
            column.copy_from_slice(src.column(j));
        });
    });
}

#[cfg(feature = "cuda")]
fn copy_device<T: Element>(src: &Tile<T>, dst: &mut Tile<T>, ctx: &ExecutionContext) -> Result<()> {
    use cudarc::driver::result as cuda_result;
    use tessera_memory::StorageKind;

    let device_id = match (src.storage_kind(), dst.storage_kind()) {
        (Some(StorageKind::Device(id)), _) | (_, Some(StorageKind::Device(id))) => id,
        kinds => {
            return Err(Error::Unsupported(format!(
                "no copy path between {kinds:?}"
            )));
        }
    };

    let owned;
    let stream = match ctx.cuda_stream() {
        Some(stream) => stream,
        None => {
            owned = ctx
                .runtime()
                .streams()
                .next(device_id, crate::policy::Priority::Normal)?;
            owned.cuda()
        }
    };

    let rows = src.rows() as usize;
    let bytes = rows * std::mem::size_of::<T>();
    for j in 0..src.cols() {
        let src_addr = src.ptr(0, j) as u64;
        let dst_addr = dst.ptr_mut(0, j) as u64;
        // SAFETY: each column is a valid range of `rows` elements on its side
        unsafe {
            match (src.is_host_accessible(), dst.is_host_accessible()) {
                (true, false) => {
                    cuda_result::memcpy_htod_async(dst_addr, src.column(j), stream.cu_stream())?
                }
                (false, true) => {
                    cuda_result::memcpy_dtoh_async(dst.column_mut(j), src_addr, stream.cu_stream())?
                }
                _ => cuda_result::memcpy_dtod_async(dst_addr, src_addr, bytes, stream.cu_stream())?,
            }
        }
    }
    stream.synchronize()?;
    Ok(())
}

#[cfg(not(feature = "cuda"))]
fn copy_device<T: Element>(src: &Tile<T>, dst: &mut Tile<T>, _ctx: &ExecutionContext) -> Result<()> {
    Err(Error::Unsupported(format!(
        "copying {:?} to {:?} memory requires the cuda feature",
        src.storage_kind(),
        dst.storage_kind()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TuneParameters;
    use crate::matrix::{DefaultAllocator, TileMemory, TileSize};
    use crate::policy::Policy;
    use crate::{Device, Runtime};
    use num_complex::Complex;

    async fn run_copy<T: Element>(runtime: &Runtime, src: Tile<T>, dst: Tile<T>) -> Tile<T> {
        runtime
            .dispatcher()
            .dispatch(Policy::mc(), async move { (src, dst) }, |(src, mut dst), ctx| {
                copy_tile(&src, &mut dst, ctx)?;
                Ok(dst)
            })
            .await
            .unwrap()
    }

    fn strided<T: Element>(rows: i64, cols: i64, ld: i64) -> Tile<T> {
        let memory = TileMemory::allocate(&DefaultAllocator::default(), Device::Cpu, (ld * cols) as usize).unwrap();
        Tile::new(rows, cols, ld, memory).unwrap()
    }

    #[tokio::test]
    async fn test_strided_to_contiguous() {
        let runtime = Runtime::from_current(TuneParameters::for_testing()).unwrap();
        let mut src = strided::<Complex<f64>>(13, 7, 20);
        src.fill_with(|i, j| Complex::new(i as f64, j as f64));
        let expected = src.to_vec();

        let dst = Tile::allocate(runtime.allocator(), TileSize::new(13, 7), Device::Cpu).unwrap();
        let dst = run_copy(&runtime, src, dst).await;
        assert!(dst.is_contiguous());
        assert_eq!(dst.to_vec(), expected);
    }

    #[tokio::test]
    async fn test_parallel_columns_above_chunk_size() {
        let tune = TuneParameters {
            copy_chunk_size: 64,
            ..TuneParameters::for_testing()
        };
        let runtime = Runtime::from_current(tune).unwrap();
        let mut src = strided::<f32>(31, 40, 33);
        src.fill_with(|i, j| (i * 100 + j) as f32);
        let expected = src.to_vec();

        let dst = strided::<f32>(31, 40, 31);
        let dst = run_copy(&runtime, src, dst).await;
        assert_eq!(dst.to_vec(), expected);
    }

    #[tokio::test]
    async fn test_empty_copy_is_noop() {
        let runtime = Runtime::from_current(TuneParameters::for_testing()).unwrap();
        let src = Tile::<f64>::allocate(runtime.allocator(), TileSize::new(0, 5), Device::Cpu).unwrap();
        let dst = Tile::<f64>::allocate(runtime.allocator(), TileSize::new(0, 5), Device::Cpu).unwrap();
        assert!(run_copy(&runtime, src, dst).await.is_empty());
    }

    #[tokio::test]
    async fn test_size_mismatch_panics() {
        let runtime = Runtime::from_current(TuneParameters::for_testing()).unwrap();
        let src = strided::<f64>(4, 4, 4);
        let dst = strided::<f64>(4, 3, 4);
        let result = runtime
            .dispatcher()
            .dispatch(Policy::mc(), async move { (src, dst) }, |(src, mut dst), ctx| {
                copy_tile(&src, &mut dst, ctx)
            })
            .await;
        assert!(matches!(result, Err(Error::Panicked(msg)) if msg.contains("sizes differ")));
    }
}
