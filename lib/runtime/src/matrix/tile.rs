// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Column-major tiles over type-erased buffers.

use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;

use tessera_memory::{Buffer, MemoryRegion, StorageKind};
use tokio::sync::oneshot;

use super::{Element, TileAllocator};
use crate::{Device, Error, Result};

/// Signed extent type; negative values are representable so that they can be
/// rejected at construction.
pub type SizeType = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TileSize {
    pub rows: SizeType,
    pub cols: SizeType,
}

impl TileSize {
    pub const fn new(rows: SizeType, cols: SizeType) -> Self {
        Self { rows, cols }
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    /// Number of elements, zero for invalid sizes.
    pub fn len(&self) -> usize {
        if self.rows <= 0 || self.cols <= 0 {
            return 0;
        }
        (self.rows as usize).saturating_mul(self.cols as usize)
    }
}

impl fmt::Display for TileSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// A typed view on (part of) a buffer, tagged with the device it belongs to.
///
/// Tile memory is not `Clone`: a tile owns the elements it addresses, and
/// two tiles over one buffer would hand out overlapping `&mut` slices.
///
/// ```compile_fail
/// use tessera_runtime::matrix::{DefaultAllocator, TileMemory};
/// use tessera_runtime::Device;
///
/// let memory = TileMemory::<f64>::allocate(&DefaultAllocator::default(), Device::Cpu, 16).unwrap();
/// let second = memory.clone();
/// ```
///
/// Wrapping a raw buffer is `unsafe` for the same reason:
///
/// ```compile_fail
/// use tessera_memory::{SystemStorage, create_buffer};
/// use tessera_runtime::matrix::TileMemory;
/// use tessera_runtime::Device;
///
/// let buffer = create_buffer(SystemStorage::new(128).unwrap());
/// let memory = TileMemory::<f64>::new(buffer, Device::Cpu);
/// ```
pub struct TileMemory<T> {
    buffer: Buffer,
    device: Device,
    offset: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for TileMemory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileMemory")
            .field("buffer", &self.buffer)
            .field("device", &self.device)
            .field("offset", &self.offset)
            .finish()
    }
}

impl<T> TileMemory<T> {
    /// A second view on the same elements. Only the engine may hold one,
    /// while it owns the exclusive borrow of the original tile.
    pub(crate) fn share(&self) -> Self {
        Self {
            buffer: self.buffer.clone(),
            device: self.device,
            offset: self.offset,
            _marker: PhantomData,
        }
    }
}

impl<T: Element> TileMemory<T> {
    /// Wrap `buffer`, which lives on `device`.
    ///
    /// # Safety
    /// No other `TileMemory` or live reference may address any byte of
    /// `buffer` for as long as the returned value (or a tile built on it)
    /// exists.
    pub unsafe fn new(buffer: Buffer, device: Device) -> Self {
        Self {
            buffer,
            device,
            offset: 0,
            _marker: PhantomData,
        }
    }

    /// Allocate room for `elements` values on `device`.
    pub fn allocate(allocator: &dyn TileAllocator, device: Device, elements: usize) -> Result<Self> {
        let bytes = elements.checked_mul(size_of::<T>()).ok_or_else(|| {
            Error::InvalidTileSize(format!("{elements} elements overflow the address space"))
        })?;
        let buffer = allocator.allocate(device, bytes)?;
        // SAFETY: allocators hand out buffers no other tile references
        Ok(unsafe { Self::new(buffer, device) })
    }

    /// Skip the first `elements` values of the buffer.
    pub fn with_offset(mut self, elements: usize) -> Self {
        self.offset += elements;
        self
    }

    /// Number of elements available from the offset on.
    pub fn len(&self) -> usize {
        (self.buffer.size() / size_of::<T>()).saturating_sub(self.offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    fn base_addr(&self) -> usize {
        self.buffer.addr() + self.offset * size_of::<T>()
    }
}

/// Receives the released tile once the tile carrying the notifier is dropped.
pub type TileReleased<T> = oneshot::Receiver<Tile<T>>;

/// A `rows x cols` column-major block with leading dimension `ld`.
///
/// Element `(i, j)` lives at linear index `i + ld * j` of the tile memory.
/// Tiles are move-only; [`Tile::take`] leaves the empty tile (0x0, ld 1)
/// behind.
pub struct Tile<T: Element> {
    size: TileSize,
    ld: SizeType,
    device: Device,
    memory: Option<TileMemory<T>>,
    notifier: Option<oneshot::Sender<Tile<T>>>,
}

impl<T: Element> Default for Tile<T> {
    fn default() -> Self {
        Self {
            size: TileSize::default(),
            ld: 1,
            device: Device::Cpu,
            memory: None,
            notifier: None,
        }
    }
}

impl<T: Element> fmt::Debug for Tile<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("type", &T::NAME)
            .field("size", &self.size)
            .field("ld", &self.ld)
            .field("device", &self.device)
            .field("memory", &self.memory)
            .finish()
    }
}

fn check_dimensions(rows: SizeType, cols: SizeType, ld: SizeType, available: usize) -> Result<()> {
    if rows < 0 || cols < 0 {
        return Err(Error::InvalidTileSize(format!(
            "negative tile size {rows}x{cols}"
        )));
    }
    if ld < rows.max(1) {
        return Err(Error::InvalidTileSize(format!(
            "leading dimension {ld} is smaller than max(1, {rows})"
        )));
    }
    if rows > 0 && cols > 0 {
        let required = ld
            .checked_mul(cols - 1)
            .and_then(|n| n.checked_add(rows))
            .ok_or_else(|| Error::InvalidTileSize(format!("tile {rows}x{cols} with ld {ld} overflows")))?;
        if required as u64 > available as u64 {
            return Err(Error::InvalidTileSize(format!(
                "tile {rows}x{cols} with ld {ld} needs {required} elements, memory holds {available}"
            )));
        }
    }
    Ok(())
}

impl<T: Element> Tile<T> {
    /// Wrap existing memory.
    ///
    /// Fails with [`Error::InvalidTileSize`] when `rows` or `cols` is
    /// negative, when `ld < max(1, rows)`, or when `memory` holds fewer than
    /// `ld * (cols - 1) + rows` elements.
    pub fn new(rows: SizeType, cols: SizeType, ld: SizeType, memory: TileMemory<T>) -> Result<Self> {
        check_dimensions(rows, cols, ld, memory.len())?;
        Ok(Self {
            size: TileSize::new(rows, cols),
            ld,
            device: memory.device(),
            memory: Some(memory),
            notifier: None,
        })
    }

    /// Allocate a contiguous tile (`ld = max(1, rows)`) on `device`.
    pub fn allocate(allocator: &dyn TileAllocator, size: TileSize, device: Device) -> Result<Self> {
        let ld = size.rows.max(1);
        check_dimensions(size.rows, size.cols, ld, usize::MAX)?;

        if size.is_empty() {
            return Ok(Self {
                size,
                ld,
                device,
                memory: None,
                notifier: None,
            });
        }

        let memory = TileMemory::allocate(allocator, device, size.len())?;
        Self::new(size.rows, size.cols, ld, memory)
    }

    pub fn rows(&self) -> SizeType {
        self.size.rows
    }

    pub fn cols(&self) -> SizeType {
        self.size.cols
    }

    pub fn ld(&self) -> SizeType {
        self.ld
    }

    pub fn size(&self) -> TileSize {
        self.size
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn is_empty(&self) -> bool {
        self.size.is_empty()
    }

    /// True when the elements form one dense block.
    pub fn is_contiguous(&self) -> bool {
        self.ld == self.size.rows || self.size.cols <= 1 || self.is_empty()
    }

    /// Storage kind of the backing buffer; `None` for tiles without memory.
    pub fn storage_kind(&self) -> Option<StorageKind> {
        self.memory.as_ref().map(|m| m.buffer().storage_kind())
    }

    /// Whether the host may read and write the elements directly.
    pub fn is_host_accessible(&self) -> bool {
        self.storage_kind()
            .map(|kind| kind.is_host_addressable())
            .unwrap_or(true)
    }

    pub fn memory(&self) -> Option<&TileMemory<T>> {
        self.memory.as_ref()
    }

    /// Elements spanned from `(0, 0)` to `(rows - 1, cols - 1)`.
    pub fn span_len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        (self.ld * (self.size.cols - 1) + self.size.rows) as usize
    }

    /// The raw byte range covered by the tile, `None` when empty.
    pub fn region(&self) -> Option<MemoryRegion> {
        let memory = self.memory.as_ref().filter(|_| !self.is_empty())?;
        Some(MemoryRegion::new(
            memory.base_addr(),
            self.span_len() * size_of::<T>(),
        ))
    }

    fn linear_index(&self, i: SizeType, j: SizeType) -> usize {
        assert!(
            (0..self.size.rows).contains(&i) && (0..self.size.cols).contains(&j),
            "index ({i}, {j}) out of range for a {} tile",
            self.size
        );
        (i + self.ld * j) as usize
    }

    fn base(&self) -> *mut T {
        match &self.memory {
            Some(memory) => memory.base_addr() as *mut T,
            None => std::ptr::NonNull::dangling().as_ptr(),
        }
    }

    /// Address of element `(i, j)`. For device tiles this is a device address.
    pub fn ptr(&self, i: SizeType, j: SizeType) -> *const T {
        let index = self.linear_index(i, j);
        self.base().wrapping_add(index)
    }

    pub fn ptr_mut(&mut self, i: SizeType, j: SizeType) -> *mut T {
        let index = self.linear_index(i, j);
        self.base().wrapping_add(index)
    }

    fn assert_host_accessible(&self) {
        assert!(
            self.is_host_accessible(),
            "tile on {} with {:?} memory is not host accessible",
            self.device,
            self.storage_kind()
        );
    }

    pub fn get(&self, i: SizeType, j: SizeType) -> T {
        self.assert_host_accessible();
        // SAFETY: index checked, memory host addressable and at least span_len long
        unsafe { *self.ptr(i, j) }
    }

    pub fn set(&mut self, i: SizeType, j: SizeType, value: T) {
        self.assert_host_accessible();
        // SAFETY: as in `get`, exclusive borrow held
        unsafe { *self.ptr_mut(i, j) = value }
    }

    /// Column `j` as a slice of `rows` elements.
    pub fn column(&self, j: SizeType) -> &[T] {
        self.assert_host_accessible();
        assert!((0..self.size.cols).contains(&j), "column {j} out of range");
        if self.size.rows == 0 {
            return &[];
        }
        // SAFETY: column j spans rows elements within the validated span
        unsafe { std::slice::from_raw_parts(self.ptr(0, j), self.size.rows as usize) }
    }

    pub fn column_mut(&mut self, j: SizeType) -> &mut [T] {
        self.assert_host_accessible();
        assert!((0..self.size.cols).contains(&j), "column {j} out of range");
        if self.size.rows == 0 {
            return &mut [];
        }
        let rows = self.size.rows as usize;
        // SAFETY: as in `column`, exclusive borrow held
        unsafe { std::slice::from_raw_parts_mut(self.ptr_mut(0, j), rows) }
    }

    /// Set every element to `f(i, j)`.
    pub fn fill_with(&mut self, mut f: impl FnMut(SizeType, SizeType) -> T) {
        for j in 0..self.size.cols {
            for (i, value) in self.column_mut(j).iter_mut().enumerate() {
                *value = f(i as SizeType, j);
            }
        }
    }

    /// Elements in column-major order, without the `ld` padding.
    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.size.len());
        for j in 0..self.size.cols {
            out.extend_from_slice(self.column(j));
        }
        out
    }

    /// A second tile over the same memory, without the release notifier.
    pub(crate) fn alias(&self) -> Tile<T> {
        Tile {
            size: self.size,
            ld: self.ld,
            device: self.device,
            memory: self.memory.as_ref().map(TileMemory::share),
            notifier: None,
        }
    }

    /// Move the content out, leaving the empty tile behind.
    ///
    /// The release notifier, if any, moves with the content.
    pub fn take(&mut self) -> Tile<T> {
        std::mem::take(self)
    }

    /// Send a tile describing the same memory through `notifier` when this
    /// tile is dropped.
    pub fn set_notifier(&mut self, notifier: oneshot::Sender<Tile<T>>) {
        self.notifier = Some(notifier);
    }

    pub fn with_release_notifier(mut self) -> (Self, TileReleased<T>) {
        let (tx, rx) = oneshot::channel();
        self.set_notifier(tx);
        (self, rx)
    }
}

impl<T: Element> Drop for Tile<T> {
    fn drop(&mut self) {
        if let Some(notifier) = self.notifier.take() {
            // nobody waiting is fine
            let _ = notifier.send(self.alias());
        }
    }
}
