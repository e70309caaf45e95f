// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-process transport connecting the ranks of a [`LocalFabric`].
//!
//! Sends are buffered: the payload is copied out of the region when the send
//! is issued and the send request finishes immediately. A receive finishes
//! once a matching message has been copied into its region. Matching is per
//! `(source, destination, tag)` in issue order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tessera_memory::MemoryRegion;

use crate::transport::{CommError, Rank, RequestId, Tag, Transport};

type Channel = (Rank, Rank, Tag);

struct PostedRecv {
    request: RequestId,
    region: MemoryRegion,
}

#[derive(Default)]
struct Mailboxes {
    /// Messages that arrived before their receive was posted.
    unexpected: HashMap<Channel, VecDeque<Vec<u8>>>,
    posted: HashMap<Channel, VecDeque<PostedRecv>>,
    /// Channel of every posted, unmatched receive.
    waiting: HashMap<RequestId, Channel>,
    finished: HashMap<RequestId, Result<(), CommError>>,
    next_request: RequestId,
    shut_down: bool,
}

impl Mailboxes {
    fn next_request(&mut self) -> RequestId {
        self.next_request += 1;
        self.next_request
    }
}

/// Copy `payload` into a posted receive region.
///
/// # Safety
/// `region` must be valid for writes of `region.size()` bytes.
unsafe fn deliver(payload: &[u8], region: MemoryRegion) -> Result<(), CommError> {
    if payload.len() > region.size() {
        return Err(CommError::Truncated {
            received: payload.len(),
            capacity: region.size(),
        });
    }
    if !payload.is_empty() {
        // SAFETY: the receiver guarantees the region is valid and unaliased
        unsafe { std::ptr::copy_nonoverlapping(payload.as_ptr(), region.addr() as *mut u8, payload.len()) };
    }
    Ok(())
}

struct Fabric {
    size: usize,
    mailboxes: Mutex<Mailboxes>,
}

/// A process group living in one process.
#[derive(Clone)]
pub struct LocalFabric {
    inner: Arc<Fabric>,
}

impl std::fmt::Debug for LocalFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFabric").field("size", &self.inner.size).finish()
    }
}

impl LocalFabric {
    pub fn new(size: usize) -> Self {
        Self {
            inner: Arc::new(Fabric {
                size,
                mailboxes: Mutex::default(),
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// The endpoint of `rank`.
    pub fn endpoint(&self, rank: Rank) -> Result<LocalTransport, CommError> {
        if rank >= self.inner.size {
            return Err(CommError::InvalidRank {
                rank,
                size: self.inner.size,
            });
        }
        Ok(LocalTransport {
            rank,
            fabric: self.inner.clone(),
        })
    }

    /// One endpoint per rank, in rank order.
    pub fn endpoints(&self) -> Vec<LocalTransport> {
        (0..self.inner.size)
            .map(|rank| LocalTransport {
                rank,
                fabric: self.inner.clone(),
            })
            .collect()
    }

    /// Fail every pending receive and refuse new requests.
    pub fn shutdown(&self) {
        let mut mailboxes = self.inner.mailboxes.lock();
        mailboxes.shut_down = true;

        let posted = std::mem::take(&mut mailboxes.posted);
        mailboxes.waiting.clear();
        for ((source, _, _), receives) in posted {
            for recv in receives {
                mailboxes
                    .finished
                    .insert(recv.request, Err(CommError::Disconnected(source)));
            }
        }
        tracing::debug!(size = self.inner.size, "local fabric shut down");
    }
}

/// Endpoint of one rank of a [`LocalFabric`].
#[derive(Clone)]
pub struct LocalTransport {
    rank: Rank,
    fabric: Arc<Fabric>,
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("rank", &self.rank)
            .field("size", &self.fabric.size)
            .finish()
    }
}

impl Transport for LocalTransport {
    const SUPPORTS_DEVICE_MEMORY: bool = false;

    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.fabric.size
    }

    unsafe fn isend(&self, dest: Rank, tag: Tag, region: MemoryRegion) -> Result<RequestId, CommError> {
        self.check_rank(dest)?;
        let payload = if region.size() == 0 {
            Vec::new()
        } else {
            // SAFETY: the caller keeps the region valid until the send finished
            unsafe { std::slice::from_raw_parts(region.addr() as *const u8, region.size()) }.to_vec()
        };

        let mut mailboxes = self.fabric.mailboxes.lock();
        if mailboxes.shut_down {
            return Err(CommError::Disconnected(dest));
        }

        let channel = (self.rank, dest, tag);
        let request = mailboxes.next_request();

        let matched = mailboxes.posted.get_mut(&channel).and_then(VecDeque::pop_front);
        match matched {
            Some(recv) => {
                mailboxes.waiting.remove(&recv.request);
                // SAFETY: a posted region stays valid until its receive finished
                let delivered = unsafe { deliver(&payload, recv.region) };
                mailboxes.finished.insert(recv.request, delivered);
            }
            None => mailboxes.unexpected.entry(channel).or_default().push_back(payload),
        }
        mailboxes.finished.insert(request, Ok(()));

        tracing::trace!(source = self.rank, dest, tag, request, bytes = region.size(), "send issued");
        Ok(request)
    }

    unsafe fn irecv(&self, source: Rank, tag: Tag, region: MemoryRegion) -> Result<RequestId, CommError> {
        self.check_rank(source)?;

        let mut mailboxes = self.fabric.mailboxes.lock();
        if mailboxes.shut_down {
            return Err(CommError::Disconnected(source));
        }

        let channel = (source, self.rank, tag);
        let request = mailboxes.next_request();

        let arrived = mailboxes.unexpected.get_mut(&channel).and_then(VecDeque::pop_front);
        match arrived {
            Some(payload) => {
                // SAFETY: the caller keeps the region valid until the receive finished
                let delivered = unsafe { deliver(&payload, region) };
                mailboxes.finished.insert(request, delivered);
            }
            None => {
                mailboxes
                    .posted
                    .entry(channel)
                    .or_default()
                    .push_back(PostedRecv { request, region });
                mailboxes.waiting.insert(request, channel);
            }
        }

        tracing::trace!(source, dest = self.rank, tag, request, "receive issued");
        Ok(request)
    }

    fn test(&self, request: RequestId) -> Result<bool, CommError> {
        let mut mailboxes = self.fabric.mailboxes.lock();
        if let Some(result) = mailboxes.finished.remove(&request) {
            return result.map(|_| true);
        }
        if mailboxes.waiting.contains_key(&request) {
            return Ok(false);
        }
        Err(CommError::UnknownRequest(request))
    }

    /// A pending receive is withdrawn and reports [`CommError::Cancelled`];
    /// finished requests keep their result.
    fn cancel(&self, request: RequestId) {
        let mut mailboxes = self.fabric.mailboxes.lock();
        if let Some(channel) = mailboxes.waiting.remove(&request) {
            if let Some(receives) = mailboxes.posted.get_mut(&channel) {
                receives.retain(|recv| recv.request != request);
            }
            mailboxes
                .finished
                .insert(request, Err(CommError::Cancelled(request)));
            tracing::debug!(request, rank = self.rank, "receive cancelled");
        }
    }
}
