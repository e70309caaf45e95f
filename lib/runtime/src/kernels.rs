// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tile kernels and their dispatched forms.

use futures::future;

use crate::dispatch::{Completion, Dispatcher, ExecutionContext};
use crate::matrix::{Element, Tile};
use crate::pipeline::{ReadOnlyFuture, ReadWriteFuture};
use crate::policy::{Backend, Policy};
use crate::single_threaded::single_threaded_region;
use crate::{Error, Result};

fn axpy_columns<T: Element>(alpha: T, b: &Tile<T>, a: &mut Tile<T>) {
    for j in 0..a.cols() {
        for (x, &y) in a.column_mut(j).iter_mut().zip(b.column(j)) {
            *x = *x + alpha * y;
        }
    }
}

/// `a = a + alpha * b`.
///
/// On the `Mc` backend the update runs inside the single-threaded region.
///
/// # Panics
/// When the sizes of `a` and `b` differ.
pub fn add<T: Element>(alpha: T, b: &Tile<T>, a: &mut Tile<T>, ctx: &ExecutionContext) -> Result<()> {
    assert_eq!(a.size(), b.size(), "add: operand sizes differ");

    if !(a.is_host_accessible() && b.is_host_accessible()) {
        return Err(Error::Unsupported(format!(
            "add on {:?} memory",
            a.storage_kind()
        )));
    }

    match ctx.policy().backend() {
        Backend::Mc => {
            let _region = single_threaded_region();
            axpy_columns(alpha, b, a);
        }
        Backend::Gpu => axpy_columns(alpha, b, a),
    }
    Ok(())
}

/// Dispatch [`add`] once both accesses are granted.
pub fn schedule_add<T: Element>(
    dispatcher: &Dispatcher,
    policy: Policy,
    alpha: T,
    b: ReadOnlyFuture<Tile<T>>,
    a: ReadWriteFuture<Tile<T>>,
) -> Completion<()> {
    dispatcher.dispatch(policy, future::join(b, a), move |(b, mut a), ctx| {
        add(alpha, &b, &mut a, ctx)
    })
}
