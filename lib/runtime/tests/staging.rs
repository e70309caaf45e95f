// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use parking_lot::Mutex;
use tessera_memory::{Buffer, StorageError, SystemStorage, create_buffer};
use tessera_runtime::matrix::{DefaultAllocator, Tile, TileAllocator, TileMemory, TileSize};
use tessera_runtime::staging::{
    CopyFromDestination, CopyToDestination, RequireContiguous, StagingOptions, with_temporary_tile,
    with_temporary_tile_ref,
};
use tessera_runtime::{Allocation, Device, Error, Runtime, TuneParameters};

/// Counts allocations; device memory is emulated with host storage.
#[derive(Debug, Default)]
struct CountingAllocator {
    allocations: AtomicUsize,
    refuse: bool,
}

impl CountingAllocator {
    fn count(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }
}

// SAFETY: every buffer is a new system storage
unsafe impl TileAllocator for CountingAllocator {
    fn allocate(&self, _device: Device, bytes: usize) -> Result<Buffer, StorageError> {
        self.allocations.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(StorageError::AllocationFailed("refused by test allocator".into()));
        }
        Ok(create_buffer(SystemStorage::new(bytes)?))
    }
}

fn runtime(refuse: bool) -> (Runtime, Arc<CountingAllocator>) {
    let allocator = Arc::new(CountingAllocator {
        refuse,
        ..Default::default()
    });
    let runtime = Runtime::from_current(TuneParameters::for_testing())
        .unwrap()
        .with_allocator(allocator.clone());
    (runtime, allocator)
}

fn value(i: i64, j: i64) -> f64 {
    (i * 1000 + j) as f64 + 0.25
}

fn strided(rows: i64, cols: i64, ld: i64) -> Tile<f64> {
    let memory = TileMemory::allocate(&DefaultAllocator::default(), Device::Cpu, (ld * cols) as usize).unwrap();
    let mut tile = Tile::new(rows, cols, ld, memory).unwrap();
    tile.fill_with(value);
    tile
}

fn dense(rows: i64, cols: i64) -> Tile<f64> {
    let mut tile = Tile::allocate(&DefaultAllocator::default(), TileSize::new(rows, cols), Device::Cpu).unwrap();
    tile.fill_with(value);
    tile
}

#[tokio::test]
async fn round_trip_copies_in_and_out() {
    let (runtime, allocator) = runtime(false);
    let mut tile = strided(17, 9, 24);
    let expected = tile.to_vec();

    let options = StagingOptions::new(Device::Cpu).contiguity(RequireContiguous::Yes);
    let observed = with_temporary_tile(&runtime, options, &mut tile, |staging| {
        async move {
            assert!(staging.is_contiguous());
            let seen = staging.to_vec();
            for j in 0..staging.cols() {
                for x in staging.column_mut(j) {
                    *x = -*x;
                }
            }
            Ok(seen)
        }
        .boxed()
    })
    .await
    .unwrap();

    assert_eq!(observed, expected);
    assert_eq!(allocator.count(), 1);
    assert_eq!(tile.ld(), 24);
    assert_eq!(tile.to_vec(), expected.iter().map(|x| -x).collect::<Vec<_>>());
}

#[tokio::test]
async fn fast_path_allocates_nothing() {
    let (runtime, allocator) = runtime(false);
    let mut tile = dense(16, 16);
    let address = tile.ptr(0, 0) as usize;

    let options = StagingOptions::new(Device::Cpu).contiguity(RequireContiguous::Yes);
    let seen = with_temporary_tile(&runtime, options, &mut tile, |t| async move { Ok(t.ptr(0, 0) as usize) }.boxed())
        .await
        .unwrap();

    assert_eq!(seen, address);
    assert_eq!(allocator.count(), 0);
}

#[tokio::test]
async fn scratch_allocation_always_stages() {
    let (runtime, allocator) = runtime(false);
    let mut tile = dense(8, 8);
    let address = tile.ptr(0, 0) as usize;

    let options = StagingOptions::new(Device::Cpu).allocation(Allocation::Scratch);
    let seen = with_temporary_tile(&runtime, options, &mut tile, |t| async move { Ok(t.ptr(0, 0) as usize) }.boxed())
        .await
        .unwrap();

    assert_ne!(seen, address);
    assert_eq!(allocator.count(), 1);
}

#[cfg(not(feature = "cuda"))]
#[tokio::test]
async fn stages_onto_other_device() {
    let (runtime, allocator) = runtime(false);
    let mut tile = dense(5, 3);
    let expected = tile.to_vec();

    let options = StagingOptions::new(Device::Gpu(0)).copy_from(CopyFromDestination::No);
    let (device, seen) = with_temporary_tile(&runtime, options, &mut tile, |t| {
        async move {
            let seen = t.to_vec();
            t.fill_with(|_, _| 0.0);
            Ok((t.device(), seen))
        }
        .boxed()
    })
    .await
    .unwrap();

    assert_eq!(device, Device::Gpu(0));
    assert_eq!(seen, expected);
    assert_eq!(allocator.count(), 1);
    // nothing copied back
    assert_eq!(tile.to_vec(), expected);
}

#[tokio::test]
async fn copy_out_only() {
    let (runtime, _) = runtime(false);
    let mut tile = strided(4, 4, 6);

    let options = StagingOptions::new(Device::Cpu)
        .contiguity(RequireContiguous::Yes)
        .copy_to(CopyToDestination::No);
    let staged_sum: f64 = with_temporary_tile(&runtime, options, &mut tile, |t| {
        async move {
            let sum = t.to_vec().iter().sum();
            t.fill_with(|i, j| (i + j) as f64);
            Ok(sum)
        }
        .boxed()
    })
    .await
    .unwrap();

    // fresh staging memory is zeroed
    assert_eq!(staged_sum, 0.0);
    assert_eq!(tile.get(3, 2), 5.0);
}

#[tokio::test]
async fn failed_continuation_skips_copy_out_and_releases_staging() {
    let (runtime, _) = runtime(false);
    let mut tile = strided(6, 6, 8);
    let expected = tile.to_vec();
    let stash: Arc<Mutex<Option<Buffer>>> = Arc::default();

    let options = StagingOptions::new(Device::Cpu).contiguity(RequireContiguous::Yes);
    let captured = stash.clone();
    let result: Result<(), Error> = with_temporary_tile(&runtime, options, &mut tile, move |t| {
        async move {
            *captured.lock() = t.memory().map(|m| m.buffer().clone());
            t.fill_with(|_, _| f64::NAN);
            Err(Error::Unsupported("continuation failed".into()))
        }
        .boxed()
    })
    .await;

    assert!(matches!(result, Err(Error::Unsupported(_))));
    assert_eq!(tile.to_vec(), expected);
    let buffer = stash.lock().take().unwrap();
    assert_eq!(buffer.handle_count(), 1);
}

#[tokio::test]
async fn allocation_failure_fails_operation() {
    let (runtime, allocator) = runtime(true);
    let mut tile = strided(6, 6, 8);
    let called = Arc::new(AtomicUsize::new(0));

    let flag = called.clone();
    let options = StagingOptions::new(Device::Cpu).contiguity(RequireContiguous::Yes);
    let result = with_temporary_tile(&runtime, options, &mut tile, move |_| {
        async move {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    })
    .await;

    assert!(matches!(result, Err(Error::Storage(StorageError::AllocationFailed(_)))));
    assert_eq!(allocator.count(), 1);
    assert_eq!(called.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn read_only_staging() {
    let (runtime, allocator) = runtime(false);
    let tile = strided(9, 2, 12);
    let expected = tile.to_vec();

    let options = StagingOptions::new(Device::Cpu)
        .contiguity(RequireContiguous::Yes)
        .copy_from(CopyFromDestination::No);
    let seen = with_temporary_tile_ref(&runtime, options, &tile, |t| async move { Ok(t.to_vec()) }.boxed())
        .await
        .unwrap();

    assert_eq!(seen, expected);
    assert_eq!(allocator.count(), 1);
}

#[tokio::test]
#[should_panic(expected = "cannot receive a copy back")]
async fn read_only_staging_rejects_copy_back() {
    let (runtime, _) = runtime(false);
    let tile = dense(2, 2);
    let options = StagingOptions::new(Device::Cpu);
    let _ = with_temporary_tile_ref(&runtime, options, &tile, |_| async move { Ok(()) }.boxed()).await;
}
