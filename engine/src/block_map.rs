//! Free-space tracking for the whole device.
//!
//! The block map holds two redundant views of free space: a bit array
//! (`true` = used) and an ordered set of free extents. The bit array is
//! what gets persisted, in the blocks directly after the superblock; the
//! extent set is rebuilt from it on every load and exists to answer
//! "smallest free run of at least n blocks" without scanning bits.
//!
//! The extent set is kept in two indexes: a map keyed by base address
//! (also used for coalescing on release, via its `range` lookups) and a
//! size-bucketed secondary index for the best-fit query. An extent is
//! never empty, never overlaps another, and is never adjacent to another;
//! adjacency is merged away when blocks are released.
//!
//! Blocks used by the map's own storage (and block 0, the superblock) are
//! reserved at creation time: their bits are permanently set and they are
//! never handed out or taken back.

use crate::codec::{ceil_div, BlockAddr};
use crate::error::{HalfsError, Result};
use crate::host::{Bitmap, ByteBitmap};
use halfs_api::controller::Device;
use halfs_api::types::Block;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Magic number identifying a persisted block-map header ("HALFSMAP").
const MAP_MAGIC: u64 = 0x4841_4C46_534D_4150;

/// Block address of the map header; the packed bit array follows it.
const MAP_START: BlockAddr = 1;

/// A contiguous run of blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    /// First block of the run.
    pub base: BlockAddr,
    /// Number of blocks in the run; never zero in a live extent.
    pub len: u64,
}

impl Extent {
    /// One past the last block of the run.
    pub fn end(&self) -> BlockAddr {
        self.base + self.len
    }

    /// The addresses covered by the run, in order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockAddr> {
        self.base..self.end()
    }
}

/// The result of an allocation: one extent, or a list of them when no
/// single free run was long enough.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockGroup {
    /// A single contiguous run.
    Contig(Extent),
    /// Several disjoint runs, in allocation order.
    Discontig(Vec<Extent>),
}

impl BlockGroup {
    /// The extents making up this group.
    pub fn extents(&self) -> impl Iterator<Item = Extent> + '_ {
        let slice = match self {
            BlockGroup::Contig(e) => std::slice::from_ref(e),
            BlockGroup::Discontig(v) => &v[..],
        };
        slice.iter().copied()
    }

    /// Every address in the group, in extent order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockAddr> + '_ {
        self.extents().flat_map(|e| e.blocks())
    }

    /// Total number of blocks in the group.
    pub fn block_count(&self) -> u64 {
        self.extents().map(|e| e.len).sum()
    }

    /// Regroup loose addresses into maximal extents. Returns `None` for an
    /// empty list.
    pub fn from_blocks(mut addrs: Vec<BlockAddr>) -> Option<BlockGroup> {
        addrs.sort_unstable();
        addrs.dedup();
        let first = *addrs.first()?;
        let mut extents = Vec::new();
        let mut cur = Extent { base: first, len: 1 };
        for &a in &addrs[1..] {
            if a == cur.end() {
                cur.len += 1;
            } else {
                extents.push(cur);
                cur = Extent { base: a, len: 1 };
            }
        }
        extents.push(cur);
        Some(if extents.len() == 1 {
            BlockGroup::Contig(extents[0])
        } else {
            BlockGroup::Discontig(extents)
        })
    }
}

/// Persisted header of the block map, stored at block [`MAP_START`].
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
struct MapHeader {
    magic: u64,
    nblocks: u64,
    reserved: u64,
    num_free: u64,
}

/// The free-space allocator of a mounted filesystem.
#[derive(Debug)]
pub struct BlockMap<B: Bitmap = ByteBitmap> {
    nblocks: u64,
    /// Blocks `0..reserved` hold the superblock and the map itself.
    reserved: u64,
    num_free: u64,
    bits: B,
    /// Free extents keyed by base address.
    by_base: BTreeMap<BlockAddr, u64>,
    /// Free extent bases bucketed by length.
    by_size: BTreeMap<u64, BTreeSet<BlockAddr>>,
}

/// Number of blocks the packed bit array occupies on the given device.
fn bit_blocks(dev: &Device) -> u64 {
    ceil_div(ceil_div(dev.nblocks, 8), dev.block_size)
}

impl<B: Bitmap> BlockMap<B> {
    /// Build a fresh map sized to `dev`, persist its initial state, and
    /// return it. Block 0 and the map's own storage are marked used and
    /// stay that way for the life of the device.
    pub fn create(dev: &mut Device) -> Result<BlockMap<B>> {
        let nblocks = dev.nblocks;
        let reserved = MAP_START + 1 + bit_blocks(dev);
        if reserved >= nblocks {
            return Err(HalfsError::Input("device too small to hold a block map"));
        }

        let mut bits = B::new(nblocks);
        for b in 0..reserved {
            bits.set(b, true);
        }

        let mut bm = BlockMap {
            nblocks,
            reserved,
            num_free: nblocks - reserved,
            bits,
            by_base: BTreeMap::new(),
            by_size: BTreeMap::new(),
        };
        bm.insert_extent(reserved, nblocks - reserved);
        bm.persist(dev)?;
        Ok(bm)
    }

    /// Load a persisted map from `dev`, rebuilding the extent set from the
    /// bit array. Fails with `CorruptBlockMap` if the header or the bits
    /// violate the map invariants.
    pub fn read(dev: &Device) -> Result<BlockMap<B>> {
        let header_block = dev.read_block(MAP_START)?;
        let header: MapHeader = header_block
            .deserialize_from(0)
            .map_err(|_| HalfsError::CorruptBlockMap("undecodable header"))?;

        if header.magic != MAP_MAGIC {
            return Err(HalfsError::CorruptBlockMap("bad magic"));
        }
        if header.nblocks != dev.nblocks {
            return Err(HalfsError::CorruptBlockMap("geometry mismatch"));
        }
        let reserved = MAP_START + 1 + bit_blocks(dev);
        if header.reserved != reserved {
            return Err(HalfsError::CorruptBlockMap("reserved region mismatch"));
        }

        let mut bytes = Vec::with_capacity((bit_blocks(dev) * dev.block_size) as usize);
        for i in 0..bit_blocks(dev) {
            let b = dev.read_block(MAP_START + 1 + i)?;
            bytes.extend_from_slice(b.contents_as_ref());
        }
        let bits = B::from_bytes(bytes, dev.nblocks);

        for b in 0..reserved {
            if !bits.get(b) {
                return Err(HalfsError::CorruptBlockMap("reserved block marked free"));
            }
        }
        let num_free = dev.nblocks - bits.count_set();
        if num_free != header.num_free {
            return Err(HalfsError::CorruptBlockMap("free count disagrees with bits"));
        }

        let mut bm = BlockMap {
            nblocks: dev.nblocks,
            reserved,
            num_free,
            bits,
            by_base: BTreeMap::new(),
            by_size: BTreeMap::new(),
        };
        // Clear runs in the bit array are maximal, so plain inserts suffice
        let mut run: Option<Extent> = None;
        for b in reserved..bm.nblocks {
            if bm.bits.get(b) {
                if let Some(e) = run.take() {
                    bm.insert_extent(e.base, e.len);
                }
            } else if let Some(e) = run.as_mut() {
                e.len += 1;
            } else {
                run = Some(Extent { base: b, len: 1 });
            }
        }
        if let Some(e) = run {
            bm.insert_extent(e.base, e.len);
        }
        Ok(bm)
    }

    /// Write the header and the packed bit array back to the device.
    /// The extent set is never persisted.
    pub fn persist(&self, dev: &mut Device) -> Result<()> {
        let header = MapHeader {
            magic: MAP_MAGIC,
            nblocks: self.nblocks,
            reserved: self.reserved,
            num_free: self.num_free,
        };
        let mut hb = Block::new_zero(MAP_START, dev.block_size);
        hb.serialize_into(&header, 0)?;
        dev.write_block(&hb)?;

        let bytes = self.bits.as_bytes();
        let bs = dev.block_size as usize;
        for (i, chunk) in bytes.chunks(bs).enumerate() {
            let mut blk = Block::new_zero(MAP_START + 1 + i as u64, dev.block_size);
            blk.write_data(chunk, 0)?;
            dev.write_block(&blk)?;
        }
        Ok(())
    }

    /// Number of free blocks.
    pub fn num_free(&self) -> u64 {
        self.num_free
    }

    /// Number of blocks in the permanently reserved prefix.
    pub fn reserved_blocks(&self) -> u64 {
        self.reserved
    }

    /// Whether block `addr` is currently marked used.
    pub fn is_used(&self, addr: BlockAddr) -> bool {
        self.bits.get(addr)
    }

    /// The current free extents, in base order. Mostly useful to tests and
    /// consistency checks.
    pub fn free_extents(&self) -> impl Iterator<Item = Extent> + '_ {
        self.by_base.iter().map(|(&base, &len)| Extent { base, len })
    }

    fn insert_extent(&mut self, base: BlockAddr, len: u64) {
        debug_assert!(len > 0);
        self.by_base.insert(base, len);
        self.by_size.entry(len).or_default().insert(base);
    }

    fn remove_extent(&mut self, base: BlockAddr, len: u64) {
        self.by_base.remove(&base);
        let bucket = self.by_size.get_mut(&len).expect("extent indexes agree");
        bucket.remove(&base);
        if bucket.is_empty() {
            self.by_size.remove(&len);
        }
    }

    /// Carve the first `take` blocks out of the free extent `(base, len)`,
    /// marking them used.
    fn take_extent_prefix(&mut self, base: BlockAddr, len: u64, take: u64) {
        debug_assert!(take <= len);
        self.remove_extent(base, len);
        if take < len {
            self.insert_extent(base + take, len - take);
        }
        for b in base..base + take {
            debug_assert!(!self.bits.get(b));
            self.bits.set(b, true);
        }
        self.num_free -= take;
    }

    /// Allocate a single block: the first block of the lowest-based free
    /// extent. Returns `None` when nothing is free.
    pub fn alloc1(&mut self) -> Option<BlockAddr> {
        let (&base, &len) = self.by_base.iter().next()?;
        self.take_extent_prefix(base, len, 1);
        Some(base)
    }

    /// Allocate `n` blocks.
    ///
    /// Prefers the smallest free extent that can hold `n` contiguously
    /// (ties broken toward the lowest base). When no single extent
    /// suffices, concatenates extents from smallest upward until `n`
    /// blocks are gathered. Returns `None` when fewer than `n` blocks are
    /// free; `n` must be positive.
    pub fn alloc_blocks(&mut self, n: u64) -> Option<BlockGroup> {
        debug_assert!(n > 0);
        if n == 0 || self.num_free < n {
            return None;
        }

        if let Some((&len, bases)) = self.by_size.range(n..).next() {
            let base = *bases.iter().next().expect("size buckets are non-empty");
            self.take_extent_prefix(base, len, n);
            return Some(BlockGroup::Contig(Extent { base, len: n }));
        }

        // No single extent is long enough; gather small ones first
        let mut chosen: Vec<Extent> = Vec::new();
        let mut gathered = 0;
        'outer: for (&len, bases) in self.by_size.iter() {
            for &base in bases.iter() {
                chosen.push(Extent { base, len });
                gathered += len;
                if gathered >= n {
                    break 'outer;
                }
            }
        }
        debug_assert!(gathered >= n);

        let mut taken = Vec::with_capacity(chosen.len());
        let mut remaining = n;
        for e in chosen {
            let take = e.len.min(remaining);
            self.take_extent_prefix(e.base, e.len, take);
            taken.push(Extent {
                base: e.base,
                len: take,
            });
            remaining -= take;
        }
        debug_assert_eq!(remaining, 0);
        Some(BlockGroup::Discontig(taken))
    }

    /// Release every block of `group` back into the free set, merging with
    /// any adjacent free extents.
    ///
    /// Freeing a block that is already free is a caller bug and fails
    /// loudly with `DoubleFree`; the map is left untouched in that case.
    /// Freeing a reserved block is rejected as `Input`.
    pub fn unalloc_blocks(&mut self, group: &BlockGroup) -> Result<()> {
        // Validate the whole group before mutating anything
        let mut seen = BTreeSet::new();
        for e in group.extents() {
            if e.len == 0 {
                return Err(HalfsError::Input("cannot free an empty extent"));
            }
            for b in e.blocks() {
                if b >= self.nblocks {
                    return Err(HalfsError::Input("cannot free past the end of the device"));
                }
                if b < self.reserved {
                    return Err(HalfsError::Input("cannot free a reserved block"));
                }
                if !self.bits.get(b) || !seen.insert(b) {
                    return Err(HalfsError::DoubleFree(b));
                }
            }
        }

        for e in group.extents() {
            for b in e.blocks() {
                self.bits.set(b, false);
            }
            self.insert_free(e.base, e.len);
            self.num_free += e.len;
        }
        Ok(())
    }

    /// Insert a run into the free set, merging with the immediate
    /// predecessor and successor if they touch it.
    fn insert_free(&mut self, base: BlockAddr, len: u64) {
        let mut base = base;
        let mut len = len;
        if let Some((&pbase, &plen)) = self.by_base.range(..base).next_back() {
            debug_assert!(pbase + plen <= base);
            if pbase + plen == base {
                self.remove_extent(pbase, plen);
                base = pbase;
                len += plen;
            }
        }
        if let Some(&slen) = self.by_base.get(&(base + len)) {
            self.remove_extent(base + len, slen);
            len += slen;
        }
        self.insert_extent(base, len);
    }
}
