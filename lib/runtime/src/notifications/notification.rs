// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Completion notification handle.

use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Notification handle for an in-flight operation.
///
/// Await it to wait until the background processor observes completion.
/// Dropping it does not cancel the operation.
#[derive(Debug)]
pub struct CompletionNotification {
    pub(crate) status: oneshot::Receiver<Result<()>>,
}

impl CompletionNotification {
    /// A notification that is already complete, for operations that finish
    /// synchronously.
    pub fn completed() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(()));
        Self { status: rx }
    }
}

impl Future for CompletionNotification {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.status).poll(cx).map(|result| {
            result
                .map_err(|_| anyhow::anyhow!("notification processor dropped before completion"))
                .and_then(|r| r)
        })
    }
}
