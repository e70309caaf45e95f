// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::any::Any;

use tessera_memory::StorageError;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures reported on a completion.
///
/// Contract violations (mismatched operand sizes, read-only staging with
/// copy-out) are not represented here; they abort via `assert!`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid tile size: {0}")]
    InvalidTileSize(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("operation panicked: {0}")]
    Panicked(String),

    #[error("operation cancelled")]
    Cancelled,

    /// A polled device event or request reported failure.
    #[error("asynchronous completion failed: {0:#}")]
    Completion(anyhow::Error),

    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[cfg(feature = "cuda")]
    #[error("CUDA error: {0}")]
    Cuda(#[from] cudarc::driver::DriverError),

    #[error(transparent)]
    Config(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Error::Panicked(message)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            Error::from_panic(err.into_panic())
        } else {
            Error::Cancelled
        }
    }
}
