// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tagged point-to-point transfers of tiles between ranks.
//!
//! A [`Communicator`] wraps one rank's [`Transport`] endpoint and is placed in
//! a [`tessera_runtime::Pipeline`] like any tile. [`p2p::schedule_send`] and
//! [`p2p::schedule_recv`] take access futures for the communicator and the
//! tile and return a [`tessera_runtime::Completion`].
//!
//! [`LocalFabric`] connects the ranks of a group living in one process.

pub mod communicator;
pub mod local;
pub mod p2p;
pub mod transport;

pub use communicator::{Communicator, Direction, PendingTransfer};
pub use local::{LocalFabric, LocalTransport};
pub use p2p::{schedule_recv, schedule_send};
pub use transport::{CommError, Rank, RequestId, Tag, Transport};
