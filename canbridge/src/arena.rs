//! Bounded block allocator
//!
//! The arena reserves its memory once and never grows. Memory is split into fixed-size blocks kept
//! on a singly-linked free list. An allocation takes as many blocks as the request needs, and the
//! blocks of one allocation need not be adjacent. There is no external fragmentation, so a request
//! succeeds whenever enough blocks are free.
//!
//! Memory is accounted in blocks, not bytes. A request occupies whole blocks, so a one-byte payload
//! costs as much as a full block.
//!
//! Allocation cost depends on the request size only. Freeing is O(1) regardless of the
//! allocation size or the arena occupancy.

const NIL: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArenaError {
    ZeroBlockSize,
    /// The capacity does not hold a single block
    TooSmall,
    /// The block count does not fit the block index
    TooLarge,
}

impl core::fmt::Display for ArenaError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ArenaError::ZeroBlockSize => f.write_str("arena block size is zero"),
            ArenaError::TooSmall => f.write_str("arena capacity is smaller than one block"),
            ArenaError::TooLarge => f.write_str("arena holds too many blocks"),
        }
    }
}

impl std::error::Error for ArenaError {}

/// The arena has not enough free blocks for the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutOfMemory {
    pub requested: usize,
    pub available: usize,
}

impl core::fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "out of memory: requested {} bytes, {} bytes available",
            self.requested, self.available
        )
    }
}

impl std::error::Error for OutOfMemory {}

/// Allocator diagnostics
///
/// Byte counts include block rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ArenaStats {
    pub capacity: usize,
    pub allocated: usize,
    pub peak_allocated: usize,
    /// Largest request seen, failed ones included
    pub peak_request_size: usize,
    pub oom_count: u64,
}

/// Allocation handle
///
/// A block is bound to the arena that produced it and must be returned there with
/// [`Arena::free`]. It can not be cloned, so a chain can be freed only once.
#[must_use]
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Block {
    head: u32,
    tail: u32,
    count: u32,
    len: usize,
}

impl Block {
    /// Requested size in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of arena blocks the allocation occupies
    pub fn block_count(&self) -> usize {
        self.count as usize
    }
}

pub struct Arena {
    memory: Box<[u8]>,
    next: Box<[u32]>,
    block_size: usize,
    free_head: u32,
    free_count: u32,
    stats: ArenaStats,
}

impl Arena {
    /// Reserves `capacity` bytes split into blocks of `block_size` bytes.
    ///
    /// The capacity is rounded down to whole blocks.
    pub fn new(capacity: usize, block_size: usize) -> Result<Self, ArenaError> {
        if block_size == 0 {
            return Err(ArenaError::ZeroBlockSize);
        }
        let count = capacity / block_size;
        if count == 0 {
            return Err(ArenaError::TooSmall);
        }
        if count >= NIL as usize {
            return Err(ArenaError::TooLarge);
        }
        let count = count as u32;

        let memory = vec![0u8; count as usize * block_size].into_boxed_slice();
        let next: Box<[u32]> = (1..=count)
            .map(|index| if index == count { NIL } else { index })
            .collect();

        Ok(Self {
            memory,
            next,
            block_size,
            free_head: 0,
            free_count: count,
            stats: ArenaStats {
                capacity: count as usize * block_size,
                ..Default::default()
            },
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Usable capacity in bytes
    pub fn capacity(&self) -> usize {
        self.stats.capacity
    }

    /// Free memory in bytes
    pub fn available(&self) -> usize {
        self.free_count as usize * self.block_size
    }

    /// Number of blocks a request of `size` bytes occupies. Empty requests take one block.
    pub fn blocks_for(&self, size: usize) -> usize {
        size.div_ceil(self.block_size).max(1)
    }

    pub fn stats(&self) -> ArenaStats {
        self.stats
    }

    pub fn allocate(&mut self, size: usize) -> Result<Block, OutOfMemory> {
        self.stats.peak_request_size = self.stats.peak_request_size.max(size);

        let count = self.blocks_for(size);
        if count > self.free_count as usize {
            self.stats.oom_count += 1;
            let available = self.available();
            warn!(
                "arena out of memory: requested {} bytes, {} bytes available",
                size, available
            );
            return Err(OutOfMemory {
                requested: size,
                available,
            });
        }

        let head = self.free_head;
        let mut tail = head;
        for _ in 1..count {
            tail = self.next[tail as usize];
        }
        self.free_head = self.next[tail as usize];
        self.next[tail as usize] = NIL;
        self.free_count -= count as u32;

        self.stats.allocated += count * self.block_size;
        self.stats.peak_allocated = self.stats.peak_allocated.max(self.stats.allocated);

        Ok(Block {
            head,
            tail,
            count: count as u32,
            len: size,
        })
    }

    /// Returns the block chain to the free list.
    pub fn free(&mut self, block: Block) {
        debug_assert!((block.tail as usize) < self.next.len());
        self.next[block.tail as usize] = self.free_head;
        self.free_head = block.head;
        self.free_count += block.count;
        self.stats.allocated -= block.count as usize * self.block_size;
    }

    /// Allocates a block and copies `data` into it.
    pub fn store(&mut self, data: &[u8]) -> Result<Block, OutOfMemory> {
        let block = self.allocate(data.len())?;
        self.write(&block, data);
        Ok(block)
    }

    /// Copies `data` to the start of the block. Bytes beyond the block length are ignored.
    pub fn write(&mut self, block: &Block, data: &[u8]) {
        let mut index = block.head;
        let mut rest = &data[..data.len().min(block.len)];
        while !rest.is_empty() && index != NIL {
            let start = index as usize * self.block_size;
            let n = rest.len().min(self.block_size);
            self.memory[start..start + n].copy_from_slice(&rest[..n]);
            rest = &rest[n..];
            index = self.next[index as usize];
        }
    }

    /// Copies the block content to `dst`. Returns the number of bytes copied.
    pub fn load(&self, block: &Block, dst: &mut [u8]) -> usize {
        let mut copied = 0;
        for chunk in self.chunks(block) {
            let n = chunk.len().min(dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&chunk[..n]);
            copied += n;
            if copied == dst.len() {
                break;
            }
        }
        copied
    }

    /// Iterates over the block content, one slice per arena block.
    pub fn chunks<'a>(&'a self, block: &Block) -> Chunks<'a> {
        Chunks {
            arena: self,
            index: block.head,
            remaining: block.len,
        }
    }
}

pub struct Chunks<'a> {
    arena: &'a Arena,
    index: u32,
    remaining: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.index == NIL {
            return None;
        }
        let arena = self.arena;
        let start = self.index as usize * arena.block_size;
        let n = self.remaining.min(arena.block_size);
        self.remaining -= n;
        self.index = arena.next[self.index as usize];
        Some(&arena.memory[start..start + n])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(arena: &Arena, block: &Block) -> Vec<u8> {
        arena.chunks(block).flatten().copied().collect()
    }

    #[test]
    fn test_new() {
        assert_eq!(Arena::new(64, 0).err(), Some(ArenaError::ZeroBlockSize));
        assert_eq!(Arena::new(15, 16).err(), Some(ArenaError::TooSmall));

        let arena = Arena::new(100, 16).unwrap();
        assert_eq!(arena.block_size(), 16);
        assert_eq!(arena.capacity(), 96);
        assert_eq!(arena.available(), 96);
        assert_eq!(arena.blocks_for(0), 1);
        assert_eq!(arena.blocks_for(16), 1);
        assert_eq!(arena.blocks_for(17), 2);
    }

    #[test]
    fn test_store_load() {
        let mut arena = Arena::new(256, 16).unwrap();
        let data: Vec<u8> = (0..40).collect();
        let block = arena.store(&data).unwrap();
        assert_eq!(block.len(), 40);
        assert_eq!(block.block_count(), 3);
        assert_eq!(collect(&arena, &block), data);

        let mut short = [0u8; 10];
        assert_eq!(arena.load(&block, &mut short), 10);
        assert_eq!(&short[..], &data[..10]);

        let mut long = [0u8; 64];
        assert_eq!(arena.load(&block, &mut long), 40);
        assert_eq!(&long[..40], &data[..]);
        arena.free(block);
    }

    #[test]
    fn test_empty_allocation() {
        let mut arena = Arena::new(32, 16).unwrap();
        let block = arena.store(&[]).unwrap();
        assert!(block.is_empty());
        assert_eq!(arena.available(), 16);
        assert_eq!(arena.chunks(&block).count(), 0);
        arena.free(block);
        assert_eq!(arena.available(), 32);
    }

    #[test]
    fn test_fill_to_capacity() {
        let mut arena = Arena::new(128, 16).unwrap();
        let blocks: Vec<Block> = (0..8).map(|i| arena.store(&[i; 16]).unwrap()).collect();
        assert_eq!(arena.available(), 0);

        let err = arena.allocate(1).unwrap_err();
        assert_eq!(err.requested, 1);
        assert_eq!(err.available, 0);
        assert_eq!(arena.stats().oom_count, 1);

        for (i, block) in blocks.iter().enumerate() {
            assert_eq!(collect(&arena, block), [i as u8; 16]);
        }
        for block in blocks {
            arena.free(block);
        }
        assert_eq!(arena.available(), 128);
    }

    #[test]
    fn test_small_requests_take_whole_blocks() {
        let mut arena = Arena::new(4096, 64).unwrap();
        let blocks: Vec<Block> = (0..64).map(|i| arena.store(&[i]).unwrap()).collect();
        assert_eq!(arena.available(), 0);
        assert_eq!(arena.stats().allocated, 4096);
        assert!(arena.allocate(1).is_err());

        for block in blocks {
            arena.free(block);
        }
        assert_eq!(arena.available(), 4096);
    }

    #[test]
    fn test_freed_memory_is_reusable() {
        let mut arena = Arena::new(64, 16).unwrap();
        let a = arena.allocate(48).unwrap();
        assert!(arena.allocate(32).is_err());
        arena.free(a);
        let b = arena.allocate(64).unwrap();
        assert_eq!(arena.available(), 0);
        arena.free(b);
    }

    #[test]
    fn test_no_fragmentation() {
        // Free every other block, then ask for a chain spanning all of them
        let mut arena = Arena::new(128, 16).unwrap();
        let mut blocks: Vec<Option<Block>> = (0..8).map(|_| arena.allocate(16).ok()).collect();
        for slot in blocks.iter_mut().step_by(2) {
            arena.free(slot.take().unwrap());
        }

        let data: Vec<u8> = (0..64).collect();
        let chain = arena.store(&data).unwrap();
        assert_eq!(chain.block_count(), 4);
        assert_eq!(collect(&arena, &chain), data);
        arena.free(chain);
        for block in blocks.into_iter().flatten() {
            arena.free(block);
        }
        assert_eq!(arena.available(), 128);
    }

    #[test]
    fn test_outstanding_within_capacity_never_fails() {
        // Pseudo-random allocation pattern; the footprint stays within capacity
        let mut arena = Arena::new(64 * 16, 16).unwrap();
        let mut live: Vec<Block> = Vec::new();
        let mut seed = 0x2545_f491_u32;
        for _ in 0..2000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let size = (seed % 100) as usize;
            let needed = arena.blocks_for(size);
            let outstanding: usize = live.iter().map(Block::block_count).sum();
            if outstanding + needed <= 64 {
                live.push(arena.allocate(size).unwrap());
            } else {
                assert!(arena.allocate(size).is_err());
                let victim = (seed as usize) % live.len();
                arena.free(live.swap_remove(victim));
            }
        }
        for block in live {
            arena.free(block);
        }
        assert_eq!(arena.available(), arena.capacity());
    }

    #[test]
    fn test_stats() {
        let mut arena = Arena::new(64, 16).unwrap();
        let a = arena.allocate(20).unwrap();
        let b = arena.allocate(1).unwrap();
        arena.free(a);
        assert!(arena.allocate(100).is_err());

        let stats = arena.stats();
        assert_eq!(stats.capacity, 64);
        assert_eq!(stats.allocated, 16);
        assert_eq!(stats.peak_allocated, 48);
        assert_eq!(stats.peak_request_size, 100);
        assert_eq!(stats.oom_count, 1);
        arena.free(b);
    }
}
