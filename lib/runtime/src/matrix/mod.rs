// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tiles: column-major blocks of a distributed matrix, the unit of data
//! movement and scheduling.

mod allocator;
mod copy;
mod element;
mod tile;

pub use allocator::{DefaultAllocator, TileAllocator};
pub use copy::copy_tile;
pub use element::Element;
pub use tile::{SizeType, Tile, TileMemory, TileReleased, TileSize};
