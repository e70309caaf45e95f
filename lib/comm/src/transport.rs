// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The network layer as seen by the communication kernels.

use tessera_memory::MemoryRegion;

/// Index of a participant in the process group.
pub type Rank = usize;

/// Message tag; together with the peer rank it selects the matching queue.
pub type Tag = u32;

/// Handle of an in-flight non-blocking operation.
pub type RequestId = u64;

#[derive(Debug, thiserror::Error)]
pub enum CommError {
    #[error("rank {rank} is outside a group of {size}")]
    InvalidRank { rank: Rank, size: usize },

    #[error("rank {0} is disconnected")]
    Disconnected(Rank),

    #[error("a {received} byte message does not fit the {capacity} byte receive buffer")]
    Truncated { received: usize, capacity: usize },

    #[error("request {0} was cancelled")]
    Cancelled(RequestId),

    #[error("unknown request {0}")]
    UnknownRequest(RequestId),

    #[error(transparent)]
    Runtime(#[from] tessera_runtime::Error),
}

impl From<CommError> for tessera_runtime::Error {
    fn from(error: CommError) -> Self {
        match error {
            CommError::Runtime(inner) => inner,
            other => tessera_runtime::Error::Transport(Box::new(other)),
        }
    }
}

/// Non-blocking tagged point-to-point messaging.
///
/// For a fixed `(peer, tag)` pair, sends and receives are matched in issue
/// order on each side. A request is retired by the first [`Transport::test`]
/// that reports it finished, successfully or not; later queries return
/// [`CommError::UnknownRequest`].
pub trait Transport: Send + Sync + 'static {
    /// Whether regions may point to device memory.
    const SUPPORTS_DEVICE_MEMORY: bool;

    fn rank(&self) -> Rank;

    fn size(&self) -> usize;

    /// Start sending the bytes of `region` to `dest`.
    ///
    /// # Safety
    /// `region` must stay valid and unmodified until the request finished
    /// or was cancelled.
    unsafe fn isend(&self, dest: Rank, tag: Tag, region: MemoryRegion) -> Result<RequestId, CommError>;

    /// Start receiving a message from `source` into `region`.
    ///
    /// # Safety
    /// `region` must stay valid and must not be accessed until the request
    /// finished or was cancelled.
    unsafe fn irecv(&self, source: Rank, tag: Tag, region: MemoryRegion) -> Result<RequestId, CommError>;

    /// `Ok(true)` once the request finished.
    fn test(&self, request: RequestId) -> Result<bool, CommError>;

    /// Abandon a request. After this returns the transport no longer
    /// touches the request's region.
    fn cancel(&self, request: RequestId);

    fn check_rank(&self, rank: Rank) -> Result<(), CommError> {
        if rank < self.size() {
            Ok(())
        } else {
            Err(CommError::InvalidRank {
                rank,
                size: self.size(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_errors_are_not_wrapped() {
        let error: tessera_runtime::Error = CommError::Runtime(tessera_runtime::Error::Cancelled).into();
        assert!(matches!(error, tessera_runtime::Error::Cancelled));

        let error: tessera_runtime::Error = CommError::Disconnected(3).into();
        assert!(matches!(error, tessera_runtime::Error::Transport(_)));
        assert_eq!(error.to_string(), "transport error: rank 3 is disconnected");
    }
}
