// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Serialized shared/exclusive access to one resource.
//!
//! A [`Pipeline`] owns a resource (a tile, a communicator) and hands out
//! access in request order:
//!
//! - [`Pipeline::read_write`] resolves once every earlier grant is released;
//! - [`Pipeline::read_only`] resolves once every earlier exclusive grant is
//!   released, together with the shared requests adjacent to it.
//!
//! Requests join the queue when the method is called, not when the future is
//! first polled. A grant is returned by dropping its guard. Dropping a
//! future that has not been granted yet withdraws the request; dropping one
//! that was granted but not yet observed returns the grant.
//!
//! Guards must not be leaked (`mem::forget`) or held across an abandoned
//! chain: the queue behind them would never advance.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Shared,
    Exclusive,
}

struct Waiter {
    id: u64,
    mode: AccessMode,
    grant: oneshot::Sender<()>,
}

#[derive(Default)]
struct State {
    readers: usize,
    writer: bool,
    queue: VecDeque<Waiter>,
    next_id: u64,
}

impl State {
    fn acquire(&mut self, mode: AccessMode) {
        match mode {
            AccessMode::Shared => self.readers += 1,
            AccessMode::Exclusive => self.writer = true,
        }
    }

    fn release(&mut self, mode: AccessMode) {
        match mode {
            AccessMode::Shared => {
                assert!(self.readers > 0, "shared grant released twice");
                self.readers -= 1;
            }
            AccessMode::Exclusive => {
                assert!(self.writer, "exclusive grant released twice");
                self.writer = false;
            }
        }
    }

    /// Grant the queue head while it is compatible with the active grants.
    fn grant(&mut self) {
        while let Some(head) = self.queue.front() {
            let compatible = match head.mode {
                AccessMode::Shared => !self.writer,
                AccessMode::Exclusive => !self.writer && self.readers == 0,
            };
            if !compatible {
                break;
            }

            let Some(waiter) = self.queue.pop_front() else {
                break;
            };
            self.acquire(waiter.mode);
            tracing::trace!(id = waiter.id, mode = ?waiter.mode, readers = self.readers, "access granted");

            if waiter.grant.send(()).is_err() {
                self.release(waiter.mode);
            }
        }
    }
}

struct Inner<R> {
    resource: UnsafeCell<Option<R>>,
    state: Mutex<State>,
}

// SAFETY: the resource is only reached through grants; shared grants hand
// out `&R` on several threads, exclusive grants `&mut R` on one.
unsafe impl<R: Send> Send for Inner<R> {}
unsafe impl<R: Send + Sync> Sync for Inner<R> {}

impl<R> Inner<R> {
    fn release(&self, mode: AccessMode) {
        let mut state = self.state.lock();
        state.release(mode);
        state.grant();
    }

    /// # Safety
    /// The caller holds a grant.
    unsafe fn resource(&self) -> &R {
        match unsafe { &*self.resource.get() } {
            Some(resource) => resource,
            None => panic!("pipeline resource accessed after it was removed"),
        }
    }

    /// # Safety
    /// The caller holds the exclusive grant.
    #[allow(clippy::mut_from_ref)]
    unsafe fn resource_mut(&self) -> &mut R {
        match unsafe { &mut *self.resource.get() } {
            Some(resource) => resource,
            None => panic!("pipeline resource accessed after it was removed"),
        }
    }
}

/// Owner of one resource, serializing access to it.
pub struct Pipeline<R> {
    inner: Arc<Inner<R>>,
}

impl<R> fmt::Debug for Pipeline<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Pipeline")
            .field("readers", &state.readers)
            .field("writer", &state.writer)
            .field("queued", &state.queue.len())
            .finish()
    }
}

impl<R: Send + Sync> Pipeline<R> {
    pub fn new(resource: R) -> Self {
        Self {
            inner: Arc::new(Inner {
                resource: UnsafeCell::new(Some(resource)),
                state: Mutex::new(State::default()),
            }),
        }
    }

    fn request(&self, mode: AccessMode) -> Request<R> {
        let (grant, rx) = oneshot::channel();
        let mut state = self.inner.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.queue.push_back(Waiter { id, mode, grant });
        state.grant();

        Request {
            inner: Some(self.inner.clone()),
            id,
            mode,
            rx,
        }
    }

    /// Request shared access.
    pub fn read_only(&self) -> ReadOnlyFuture<R> {
        ReadOnlyFuture {
            request: self.request(AccessMode::Shared),
        }
    }

    /// Request exclusive access.
    pub fn read_write(&self) -> ReadWriteFuture<R> {
        ReadWriteFuture {
            request: self.request(AccessMode::Exclusive),
        }
    }

    /// Requests waiting for a grant.
    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Wait for every earlier grant to be released and take the resource back.
    pub async fn finish(self) -> R {
        let access = self.read_write().await;
        // SAFETY: exclusive grant held, and no later request can exist since
        // the pipeline is consumed
        let resource = unsafe { (*access.inner.resource.get()).take() };
        match resource {
            Some(resource) => resource,
            None => panic!("pipeline resource removed twice"),
        }
    }
}

struct Request<R> {
    inner: Option<Arc<Inner<R>>>,
    id: u64,
    mode: AccessMode,
    rx: oneshot::Receiver<()>,
}

impl<R> Request<R> {
    fn poll_grant(&mut self, cx: &mut Context<'_>) -> Poll<Arc<Inner<R>>> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(())) => match self.inner.take() {
                Some(inner) => Poll::Ready(inner),
                None => panic!("access future polled after completion"),
            },
            Poll::Ready(Err(_)) => panic!("pipeline dropped a pending access request"),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<R> Drop for Request<R> {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        let mut state = inner.state.lock();
        match state.queue.iter().position(|w| w.id == self.id) {
            Some(position) => {
                state.queue.remove(position);
            }
            // granted but never observed
            None => state.release(self.mode),
        }
        state.grant();
    }
}

/// Resolves to a [`ReadOnly`] grant.
pub struct ReadOnlyFuture<R> {
    request: Request<R>,
}

impl<R> Future for ReadOnlyFuture<R> {
    type Output = ReadOnly<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.request.poll_grant(cx).map(|inner| ReadOnly { inner })
    }
}

/// Resolves to a [`ReadWrite`] grant.
pub struct ReadWriteFuture<R> {
    request: Request<R>,
}

impl<R> Future for ReadWriteFuture<R> {
    type Output = ReadWrite<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.request.poll_grant(cx).map(|inner| ReadWrite { inner })
    }
}

/// Shared grant. Cloning it adds another holder of the same grant batch.
pub struct ReadOnly<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for ReadOnly<R> {
    fn clone(&self) -> Self {
        self.inner.state.lock().acquire(AccessMode::Shared);
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R> Deref for ReadOnly<R> {
    type Target = R;

    fn deref(&self) -> &R {
        // SAFETY: shared grant held
        unsafe { self.inner.resource() }
    }
}

impl<R: fmt::Debug> fmt::Debug for ReadOnly<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadOnly").field(&**self).finish()
    }
}

impl<R> Drop for ReadOnly<R> {
    fn drop(&mut self) {
        self.inner.release(AccessMode::Shared);
    }
}

/// Exclusive grant.
pub struct ReadWrite<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Deref for ReadWrite<R> {
    type Target = R;

    fn deref(&self) -> &R {
        // SAFETY: exclusive grant held
        unsafe { self.inner.resource() }
    }
}

impl<R> DerefMut for ReadWrite<R> {
    fn deref_mut(&mut self) -> &mut R {
        // SAFETY: exclusive grant held, unique borrow of the guard
        unsafe { self.inner.resource_mut() }
    }
}

impl<R: fmt::Debug> fmt::Debug for ReadWrite<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadWrite").field(&**self).finish()
    }
}

impl<R> Drop for ReadWrite<R> {
    fn drop(&mut self) {
        self.inner.release(AccessMode::Exclusive);
    }
}
