// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Running an operation on a tile that lives on another device or has the
//! wrong layout.
//!
//! [`with_temporary_tile`] hands the continuation either the input tile
//! itself, when it already satisfies the requested device and contiguity,
//! or a staging tile allocated for the occasion. Data moves in before the
//! continuation runs ([`CopyToDestination::Yes`]) and back out once it
//! succeeded ([`CopyFromDestination::Yes`]). The staging tile is freed on
//! every path, after the copy back.

use futures::future::{self, BoxFuture};

use crate::matrix::{Element, Tile, copy_tile};
use crate::policy::{Allocation, Policy};
use crate::runtime::Runtime;
use crate::{Device, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyToDestination {
    No,
    Yes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyFromDestination {
    No,
    Yes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequireContiguous {
    No,
    Yes,
}

/// Requirements on the tile a continuation operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingOptions {
    pub device: Device,
    pub copy_to: CopyToDestination,
    pub copy_from: CopyFromDestination,
    pub contiguity: RequireContiguous,
    pub allocation: Allocation,
}

impl StagingOptions {
    /// Copy in and out, any layout, in place when possible.
    pub fn new(device: Device) -> Self {
        Self {
            device,
            copy_to: CopyToDestination::Yes,
            copy_from: CopyFromDestination::Yes,
            contiguity: RequireContiguous::No,
            allocation: Allocation::InPlace,
        }
    }

    /// Options for an operation running under `policy`.
    pub fn for_policy(policy: Policy) -> Self {
        Self::new(policy.device()).allocation(policy.allocation())
    }

    pub fn copy_to(mut self, copy_to: CopyToDestination) -> Self {
        self.copy_to = copy_to;
        self
    }

    pub fn copy_from(mut self, copy_from: CopyFromDestination) -> Self {
        self.copy_from = copy_from;
        self
    }

    pub fn contiguity(mut self, contiguity: RequireContiguous) -> Self {
        self.contiguity = contiguity;
        self
    }

    pub fn allocation(mut self, allocation: Allocation) -> Self {
        self.allocation = allocation;
        self
    }

    /// Whether `tile` can be used as is.
    pub fn satisfied_by<T: Element>(&self, tile: &Tile<T>) -> bool {
        tile.device() == self.device
            && (self.contiguity == RequireContiguous::No || tile.is_contiguous())
            && self.allocation == Allocation::InPlace
    }
}

/// Staging state for the duration of one wrapped operation.
///
/// Holds a view of the source memory and the staging tile. Dropping the
/// agreement without [`StagingAgreement::complete`] frees the staging tile
/// without copying back.
#[derive(Debug)]
pub struct StagingAgreement<T: Element> {
    runtime: Runtime,
    source: Tile<T>,
    staging: Tile<T>,
    copy_from: CopyFromDestination,
}

impl<T: Element> StagingAgreement<T> {
    /// Allocate the staging tile on the target device and copy the source in
    /// if requested.
    pub async fn new(runtime: &Runtime, options: StagingOptions, source: &Tile<T>) -> Result<Self> {
        let staging = Tile::allocate(runtime.allocator(), source.size(), options.device)?;
        tracing::debug!(
            size = %source.size(),
            from = %source.device(),
            to = %options.device,
            element = T::NAME,
            "allocated staging tile"
        );

        let (source, staging) = match options.copy_to {
            CopyToDestination::Yes => copy(runtime, source.alias(), staging).await?,
            CopyToDestination::No => (source.alias(), staging),
        };

        Ok(Self {
            runtime: runtime.clone(),
            source,
            staging,
            copy_from: options.copy_from,
        })
    }

    pub fn tile(&self) -> &Tile<T> {
        &self.staging
    }

    pub fn tile_mut(&mut self) -> &mut Tile<T> {
        &mut self.staging
    }

    /// Copy back if requested, then release the staging tile.
    pub async fn complete(self) -> Result<()> {
        if self.copy_from == CopyFromDestination::Yes {
            copy(&self.runtime, self.staging, self.source).await?;
        }
        Ok(())
    }
}

/// Copy through the dispatcher: on a stream of the GPU involved, if any,
/// else on the compute pool.
async fn copy<T: Element>(runtime: &Runtime, src: Tile<T>, dst: Tile<T>) -> Result<(Tile<T>, Tile<T>)> {
    let policy = match (src.device(), dst.device()) {
        (Device::Gpu(id), _) | (_, Device::Gpu(id)) => Policy::gpu(id),
        _ => Policy::mc(),
    };
    runtime
        .dispatcher()
        .dispatch(policy, future::ready((src, dst)), |(src, mut dst), ctx| {
            copy_tile(&src, &mut dst, ctx)?;
            Ok((src, dst))
        })
        .await
}

/// Run `continuation` on a tile satisfying `options`, staging `tile` if
/// needed.
///
/// Copy-out happens only when the continuation succeeds. Copy and
/// allocation failures fail the returned future.
pub async fn with_temporary_tile<T, R, F>(
    runtime: &Runtime,
    options: StagingOptions,
    tile: &mut Tile<T>,
    continuation: F,
) -> Result<R>
where
    T: Element,
    R: Send,
    F: for<'a> FnOnce(&'a mut Tile<T>) -> BoxFuture<'a, Result<R>> + Send,
{
    if options.satisfied_by(tile) {
        tracing::trace!(size = %tile.size(), device = %tile.device(), "staging not needed");
        return continuation(tile).await;
    }

    let mut agreement = StagingAgreement::new(runtime, options, tile).await?;
    let value = continuation(agreement.tile_mut()).await?;
    agreement.complete().await?;
    Ok(value)
}

/// Read-only form of [`with_temporary_tile`].
///
/// # Panics
/// When `options.copy_from` is [`CopyFromDestination::Yes`].
pub async fn with_temporary_tile_ref<T, R, F>(
    runtime: &Runtime,
    options: StagingOptions,
    tile: &Tile<T>,
    continuation: F,
) -> Result<R>
where
    T: Element,
    R: Send,
    F: for<'a> FnOnce(&'a Tile<T>) -> BoxFuture<'a, Result<R>> + Send,
{
    assert!(
        options.copy_from == CopyFromDestination::No,
        "a read-only tile cannot receive a copy back"
    );

    if options.satisfied_by(tile) {
        return continuation(tile).await;
    }

    let agreement = StagingAgreement::new(runtime, options, tile).await?;
    continuation(agreement.tile()).await
}
