//! Growable arena of packed items
//!
//! A [`Buffer`] tracks three offsets into its memory:
//!
//! ```text
//! 0            committed          written             capacity
//! ├──────────────┼──────────────────┼───────────────────┤
//! │ valid items  │ item in progress │ free              │
//! └──────────────┴──────────────────┴───────────────────┘
//! ```
//!
//! Only `[0, committed)` is ever iterated. Items are appended by reserving
//! space, filling it in and committing; an abandoned item is dropped with
//! [`Buffer::rollback`].
//!
//! **Auto-growth**: buffers that own their memory and were created with
//! [`AutoGrow::Yes`] double their capacity until a reservation fits. Buffers
//! over caller-provided memory never grow and report [`OsmError::BufferFull`].

use super::item::{ItemRef, Items, FLAGS_OFFSET, FLAG_REMOVED};
use super::{is_aligned, ALIGN_BYTES};
use crate::error::{OsmError, Result};
use crate::osm::{Entities, Entity};

/// Default capacity of an internally managed buffer (1 MiB)
pub const DEFAULT_CAPACITY: usize = 1024 * 1024;

const GROW_FACTOR: usize = 2;

/// Whether an internally managed buffer may grow on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoGrow {
    Yes,
    No,
}

enum Memory<'a> {
    /// No backing memory: the end-of-stream sentinel
    Invalid,
    /// Memory owned and freed by the buffer
    Owned(Vec<u8>),
    /// Memory owned by the caller
    External(&'a mut [u8]),
}

/// Arena of packed, self-describing items
///
/// Buffers that own their memory are `Buffer<'static>` and can be moved
/// between threads freely; buffers over external memory borrow it for `'a`.
pub struct Buffer<'a> {
    memory: Memory<'a>,
    capacity: usize,
    written: usize,
    committed: usize,
    auto_grow: AutoGrow,
}

impl Buffer<'static> {
    /// Create an invalid buffer with no memory
    ///
    /// Used to signal end of input. All operations except the accessors
    /// and iteration (which yields nothing) fail with [`OsmError::InvalidBuffer`].
    pub fn invalid() -> Self {
        Buffer {
            memory: Memory::Invalid,
            capacity: 0,
            written: 0,
            committed: 0,
            auto_grow: AutoGrow::No,
        }
    }

    /// Create an auto-growing buffer with the default capacity
    pub fn new() -> Self {
        Buffer {
            memory: Memory::Owned(vec![0; DEFAULT_CAPACITY]),
            capacity: DEFAULT_CAPACITY,
            written: 0,
            committed: 0,
            auto_grow: AutoGrow::Yes,
        }
    }

    /// Create a buffer owning `capacity` bytes
    ///
    /// # Errors
    /// [`OsmError::Misaligned`] if `capacity` is not a multiple of the alignment.
    pub fn with_capacity(capacity: usize, auto_grow: AutoGrow) -> Result<Self> {
        if !is_aligned(capacity) {
            return Err(OsmError::Misaligned(capacity));
        }

        Ok(Buffer {
            memory: Memory::Owned(vec![0; capacity]),
            capacity,
            written: 0,
            committed: 0,
            auto_grow,
        })
    }
}

impl<'a> Buffer<'a> {
    /// Wrap caller-owned memory that is completely filled with items
    ///
    /// `capacity == written == committed == data.len()`.
    pub fn from_slice(data: &'a mut [u8]) -> Result<Self> {
        let size = data.len();
        Self::from_slice_committed(data, size)
    }

    /// Wrap caller-owned memory whose first `committed` bytes hold items
    ///
    /// The rest of the slice is free space. The buffer never grows.
    pub fn from_slice_committed(data: &'a mut [u8], committed: usize) -> Result<Self> {
        let capacity = data.len();
        if !is_aligned(capacity) {
            return Err(OsmError::Misaligned(capacity));
        }
        if !is_aligned(committed) {
            return Err(OsmError::Misaligned(committed));
        }
        if committed > capacity {
            return Err(OsmError::SizeMismatch {
                what: "external buffer",
                declared: committed,
                actual: capacity,
            });
        }

        Ok(Buffer {
            memory: Memory::External(data),
            capacity,
            written: committed,
            committed,
            auto_grow: AutoGrow::No,
        })
    }

    /// Whether the buffer has backing memory
    pub fn is_valid(&self) -> bool {
        !matches!(self.memory, Memory::Invalid)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn committed(&self) -> usize {
        self.committed
    }

    pub fn auto_grow(&self) -> AutoGrow {
        self.auto_grow
    }

    /// Whether the buffer holds no committed items
    pub fn is_empty(&self) -> bool {
        self.committed == 0
    }

    /// Whether both `written` and `committed` sit on an alignment boundary
    pub fn is_aligned(&self) -> bool {
        is_aligned(self.written) && is_aligned(self.committed)
    }

    /// Committed bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data()[..self.committed]
    }

    fn data(&self) -> &[u8] {
        match &self.memory {
            Memory::Invalid => &[],
            Memory::Owned(vec) => vec.as_slice(),
            Memory::External(slice) => &slice[..],
        }
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.memory {
            Memory::Invalid => &mut [],
            Memory::Owned(vec) => vec.as_mut_slice(),
            Memory::External(slice) => &mut slice[..],
        }
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(OsmError::InvalidBuffer)
        }
    }

    /// Grow the owned memory to `size` bytes
    ///
    /// Does nothing if the buffer is already at least that large. Existing
    /// bytes, committed or not, are preserved.
    pub fn grow(&mut self, size: usize) -> Result<()> {
        self.ensure_valid()?;
        let Memory::Owned(vec) = &mut self.memory else {
            return Err(OsmError::CannotGrow);
        };
        if self.capacity < size {
            if !is_aligned(size) {
                return Err(OsmError::Misaligned(size));
            }
            tracing::debug!("Growing buffer: {} -> {} bytes", self.capacity, size);
            vec.resize(size, 0);
            self.capacity = size;
        }
        Ok(())
    }

    /// Reserve `size` bytes at the end of the written region
    ///
    /// Returns the zeroed window. The bytes stay uncommitted until
    /// [`commit`](Self::commit).
    ///
    /// # Errors
    /// [`OsmError::BufferFull`] if the space is not available and the buffer
    /// cannot grow. The buffer is left unchanged in that case.
    pub fn reserve(&mut self, size: usize) -> Result<&mut [u8]> {
        self.ensure_valid()?;

        if self.written + size > self.capacity {
            let growable =
                matches!(self.memory, Memory::Owned(_)) && self.auto_grow == AutoGrow::Yes;
            if !growable {
                return Err(OsmError::BufferFull {
                    requested: size,
                    available: self.capacity - self.written,
                });
            }

            let mut new_capacity = (self.capacity * GROW_FACTOR).max(ALIGN_BYTES);
            while self.written + size > new_capacity {
                new_capacity *= GROW_FACTOR;
            }
            self.grow(new_capacity)?;
        }

        let start = self.written;
        self.written += size;
        let window = &mut self.data_mut()[start..start + size];
        window.fill(0);
        Ok(window)
    }

    /// Mark everything written so far as committed
    ///
    /// Returns the previous committed offset, which is where the item just
    /// finished begins.
    pub fn commit(&mut self) -> Result<usize> {
        self.ensure_valid()?;
        if !is_aligned(self.written) {
            return Err(OsmError::Misaligned(self.written));
        }
        let offset = self.committed;
        self.committed = self.written;
        Ok(offset)
    }

    /// Drop everything written since the last commit
    pub fn rollback(&mut self) {
        self.written = self.committed;
    }

    /// Forget all items, keeping the memory
    ///
    /// Returns the number of bytes that were committed.
    pub fn clear(&mut self) -> usize {
        let committed = self.committed;
        self.written = 0;
        self.committed = 0;
        committed
    }

    /// Copy all committed items of `other` to the end of this buffer
    ///
    /// The copied bytes are written but not committed.
    pub fn append(&mut self, other: &Buffer<'_>) -> Result<()> {
        other.ensure_valid()?;
        let source = other.as_bytes();
        let target = self.reserve(source.len())?;
        target.copy_from_slice(source);
        Ok(())
    }

    /// Copy a single item (from any buffer) to the end and commit it
    ///
    /// Returns the offset of the copy.
    pub fn push_item(&mut self, item: &ItemRef<'_>) -> Result<usize> {
        let target = self.reserve(item.padded_size())?;
        target.copy_from_slice(item.as_bytes());
        self.commit()
    }

    /// Iterate over all committed items
    pub fn items(&self) -> Items<'_> {
        Items::new(self.as_bytes(), 0)
    }

    /// Iterate over committed items starting at `offset`
    ///
    /// `offset` must be an offset previously returned by [`commit`](Self::commit).
    pub fn items_from(&self, offset: usize) -> Items<'_> {
        Items::new(self.as_bytes(), offset)
    }

    /// Iterate over all committed entities as typed views
    pub fn entities(&self) -> Entities<'_> {
        Entities::new(self.items())
    }

    /// Item at `offset`
    pub fn get(&self, offset: usize) -> Result<ItemRef<'_>> {
        self.ensure_valid()?;
        if !is_aligned(offset) {
            return Err(OsmError::Misaligned(offset));
        }
        ItemRef::parse(self.as_bytes(), offset)
    }

    /// Entity at `offset`
    pub fn entity(&self, offset: usize) -> Result<Entity<'_>> {
        Entity::from_item(self.get(offset)?)
    }

    /// Flag the item at `offset` for removal by [`purge_removed`](Self::purge_removed)
    pub fn mark_removed(&mut self, offset: usize) -> Result<()> {
        self.get(offset)?;
        self.data_mut()[offset + FLAGS_OFFSET] |= FLAG_REMOVED;
        Ok(())
    }

    /// Compact the buffer by dropping all items flagged as removed
    ///
    /// Kept items move towards the front in their original order.
    /// `moving(old_offset, new_offset)` is called once for every item that
    /// changes position so that external indexes can be updated. All
    /// previously obtained offsets are invalid afterwards.
    ///
    /// The whole committed range is validated before anything is moved.
    pub fn purge_removed<F>(&mut self, mut moving: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        self.ensure_valid()?;

        let mut layout = Vec::new();
        for item in self.items() {
            let item = item?;
            layout.push((item.offset(), item.padded_size(), item.removed()));
        }

        let mut write = 0;
        for (read, size, removed) in layout {
            if removed {
                continue;
            }
            if read != write {
                moving(read, write);
                self.data_mut().copy_within(read..read + size, write);
            }
            write += size;
        }

        self.written = write;
        self.committed = write;
        Ok(())
    }
}

impl Default for Buffer<'static> {
    fn default() -> Self {
        Buffer::invalid()
    }
}

impl std::fmt::Debug for Buffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.memory {
            Memory::Invalid => "invalid",
            Memory::Owned(_) => "owned",
            Memory::External(_) => "external",
        };
        f.debug_struct("Buffer")
            .field("memory", &mode)
            .field("capacity", &self.capacity)
            .field("written", &self.written)
            .field("committed", &self.committed)
            .field("auto_grow", &self.auto_grow)
            .finish()
    }
}
