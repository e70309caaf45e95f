// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Communication endpoint and in-flight transfers.

use std::fmt;
use std::sync::Arc;

use tessera_memory::MemoryRegion;
use tessera_runtime::notifications::{CompletionChecker, CompletionNotification, NotificationHandle};
use tessera_runtime::{Device, Runtime};

use crate::transport::{CommError, Rank, RequestId, Tag, Transport};

/// Polls a transport request from the notification task.
struct TransportChecker<X: Transport> {
    transport: Arc<X>,
    request: RequestId,
}

impl<X: Transport> CompletionChecker for TransportChecker<X> {
    fn is_complete(&self) -> anyhow::Result<bool> {
        Ok(self.transport.test(self.request)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Recv,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => write!(f, "send"),
            Direction::Recv => write!(f, "recv"),
        }
    }
}

/// Communication endpoint of one rank, the resource behind a communicator
/// pipeline.
pub struct Communicator<X: Transport> {
    transport: Arc<X>,
    notifications: NotificationHandle,
}

impl<X: Transport> fmt::Debug for Communicator<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("rank", &self.transport.rank())
            .field("size", &self.transport.size())
            .field("device_memory", &X::SUPPORTS_DEVICE_MEMORY)
            .finish()
    }
}

impl<X: Transport> Communicator<X> {
    /// Requests are polled by the notification task of `runtime`.
    pub fn new(runtime: &Runtime, transport: X) -> Self {
        Self {
            transport: Arc::new(transport),
            notifications: runtime.notifications().clone(),
        }
    }

    pub fn rank(&self) -> Rank {
        self.transport.rank()
    }

    pub fn size(&self) -> usize {
        self.transport.size()
    }

    pub fn transport(&self) -> &X {
        &self.transport
    }

    /// Device a message buffer must live on for a tile on `device`.
    pub const fn comm_device(device: Device) -> Device {
        if X::SUPPORTS_DEVICE_MEMORY {
            device
        } else {
            Device::Cpu
        }
    }

    /// Issue a non-blocking send of `region` to `dest`.
    ///
    /// # Safety
    /// `region` must stay valid and unmodified until the returned transfer
    /// finished or was dropped.
    pub unsafe fn start_send(&self, dest: Rank, tag: Tag, region: MemoryRegion) -> Result<PendingTransfer<X>, CommError> {
        // SAFETY: forwarded to the caller
        let request = unsafe { self.transport.isend(dest, tag, region) }?;
        Ok(self.track(dest, tag, Direction::Send, request))
    }

    /// Issue a non-blocking receive from `source` into `region`.
    ///
    /// # Safety
    /// `region` must stay valid and must not be accessed until the returned
    /// transfer finished or was dropped.
    pub unsafe fn start_recv(&self, source: Rank, tag: Tag, region: MemoryRegion) -> Result<PendingTransfer<X>, CommError> {
        // SAFETY: forwarded to the caller
        let request = unsafe { self.transport.irecv(source, tag, region) }?;
        Ok(self.track(source, tag, Direction::Recv, request))
    }

    fn track(&self, peer: Rank, tag: Tag, direction: Direction, request: RequestId) -> PendingTransfer<X> {
        tracing::debug!(rank = self.rank(), peer, tag, %direction, request, "transfer issued");
        let notification = self.notifications.register(
            "transport request",
            TransportChecker {
                transport: self.transport.clone(),
                request,
            },
        );
        PendingTransfer {
            transport: self.transport.clone(),
            peer,
            tag,
            direction,
            request,
            notification: Some(notification),
        }
    }
}

/// An issued send or receive.
///
/// Dropping it before [`PendingTransfer::wait`] returned cancels the
/// request, after which the transport no longer touches the region.
#[must_use = "dropping a pending transfer cancels it"]
pub struct PendingTransfer<X: Transport> {
    transport: Arc<X>,
    peer: Rank,
    tag: Tag,
    direction: Direction,
    request: RequestId,
    notification: Option<CompletionNotification>,
}

impl<X: Transport> fmt::Debug for PendingTransfer<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTransfer")
            .field("peer", &self.peer)
            .field("tag", &self.tag)
            .field("direction", &self.direction)
            .field("request", &self.request)
            .field("done", &self.notification.is_none())
            .finish()
    }
}

impl<X: Transport> PendingTransfer<X> {
    pub fn peer(&self) -> Rank {
        self.peer
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn request(&self) -> RequestId {
        self.request
    }

    /// Wait until the transport reports the request finished.
    pub async fn wait(mut self) -> Result<(), CommError> {
        let Some(notification) = self.notification.as_mut() else {
            return Ok(());
        };
        let result = notification.await;
        self.notification = None;

        result.map_err(|error| match error.downcast::<CommError>() {
            Ok(error) => error,
            Err(error) => CommError::Runtime(tessera_runtime::Error::Completion(error)),
        })
    }
}

impl<X: Transport> Drop for PendingTransfer<X> {
    fn drop(&mut self) {
        if self.notification.is_some() {
            tracing::debug!(peer = self.peer, tag = self.tag, direction = %self.direction, request = self.request, "cancelling transfer");
            self.transport.cancel(self.request);
        }
    }
}
