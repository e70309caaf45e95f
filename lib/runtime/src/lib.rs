// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tessera runtime
//!
//! Dependency-tracked asynchronous execution of tile operations:
//!
//! - [`pipeline::Pipeline`] serializes shared/exclusive access to a tile or
//!   a communicator;
//! - [`dispatch::Dispatcher`] runs operations on the compute pool or on GPU
//!   streams according to a [`policy::Policy`];
//! - [`staging::with_temporary_tile`] moves tiles to the device and layout
//!   an operation needs;
//! - [`single_threaded::single_threaded_region`] serializes calls into
//!   numeric libraries that are not thread safe.
//!
//! Everything runs inside a [`Runtime`] built from [`TuneParameters`].

pub mod compute;
pub mod config;
pub mod dispatch;
pub mod kernels;
pub mod logging;
pub mod matrix;
pub mod notifications;
pub mod pipeline;
pub mod policy;
pub mod runtime;
pub mod single_threaded;
pub mod staging;
pub mod stream;

mod device;
mod error;

pub use config::TuneParameters;
pub use device::Device;
pub use dispatch::{Chain, Completion, Dispatcher, ExecutionContext};
pub use error::{Error, Result};
pub use pipeline::{Pipeline, ReadOnly, ReadWrite};
pub use policy::{Allocation, Backend, Policy, Priority};
pub use runtime::Runtime;
