// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scheduled point-to-point transfers of whole tiles.
//!
//! Both kernels stage the tile onto the device the transport can read or
//! write (host memory unless the transport handles device memory) in a
//! contiguous layout, issue the request once the communicator grant is
//! available, and release that grant as soon as the request is issued. The
//! tile grant is held until the transfer finished and any staged copy-out
//! ran.

use futures::FutureExt;
use tessera_memory::MemoryRegion;
use tessera_runtime::matrix::{Element, Tile};
use tessera_runtime::pipeline::{ReadOnlyFuture, ReadWriteFuture};
use tessera_runtime::staging::{
    CopyFromDestination, CopyToDestination, RequireContiguous, StagingOptions, with_temporary_tile,
    with_temporary_tile_ref,
};
use tessera_runtime::{Completion, Policy, Runtime};

use crate::communicator::Communicator;
use crate::transport::{Rank, Tag, Transport};

/// Bytes of a contiguous tile; empty tiles send and receive empty messages.
fn message<T: Element>(tile: &Tile<T>) -> MemoryRegion {
    debug_assert!(tile.is_contiguous());
    tile.region().unwrap_or(MemoryRegion::new(0, 0))
}

/// Send the tile granted by `tile` to `dest` with `tag`.
pub fn schedule_send<T, X>(
    runtime: &Runtime,
    comm: ReadWriteFuture<Communicator<X>>,
    dest: Rank,
    tag: Tag,
    tile: ReadOnlyFuture<Tile<T>>,
) -> Completion<()>
where
    T: Element,
    X: Transport,
{
    let stager = runtime.clone();
    runtime.dispatcher().spawn(Policy::mc(), async move {
        let tile = tile.await;
        let options = StagingOptions::new(Communicator::<X>::comm_device(tile.device()))
            .contiguity(RequireContiguous::Yes)
            .copy_to(CopyToDestination::Yes)
            .copy_from(CopyFromDestination::No);

        with_temporary_tile_ref(&stager, options, &*tile, move |staged| {
            async move {
                let transfer = {
                    let comm = comm.await;
                    // SAFETY: the staged tile outlives the transfer; dropping
                    // the transfer cancels it
                    unsafe { comm.start_send(dest, tag, message(staged)) }?
                };
                transfer.wait().await?;
                Ok(())
            }
            .boxed()
        })
        .await
    })
}

/// Receive the message from `source` with `tag` into the tile granted by
/// `tile`.
pub fn schedule_recv<T, X>(
    runtime: &Runtime,
    comm: ReadWriteFuture<Communicator<X>>,
    source: Rank,
    tag: Tag,
    tile: ReadWriteFuture<Tile<T>>,
) -> Completion<()>
where
    T: Element,
    X: Transport,
{
    let stager = runtime.clone();
    runtime.dispatcher().spawn(Policy::mc(), async move {
        let mut tile = tile.await;
        let options = StagingOptions::new(Communicator::<X>::comm_device(tile.device()))
            .contiguity(RequireContiguous::Yes)
            .copy_to(CopyToDestination::No)
            .copy_from(CopyFromDestination::Yes);

        with_temporary_tile(&stager, options, &mut *tile, move |staged| {
            async move {
                let transfer = {
                    let comm = comm.await;
                    // SAFETY: the staged tile is borrowed exclusively until
                    // the transfer finished or was cancelled
                    unsafe { comm.start_recv(source, tag, message(staged)) }?
                };
                transfer.wait().await?;
                Ok(())
            }
            .boxed()
        })
        .await
    })
}
