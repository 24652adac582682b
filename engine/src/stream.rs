//! Byte-granularity reads and writes over a carrier chain.
//!
//! A stream offset is decomposed into a carrier index, a block index
//! within that carrier, and a byte offset within that block, using the
//! address capacities reported at decode time — never hard-coded ones.
//! Reads walk the chain only as far as the requested window; writes keep
//! only the carriers from the start carrier onward, since nothing before
//! it can change.
//!
//! A truncating write additionally cuts the chain right after the last
//! written byte, fills the remainder of the final block with the `0xBA`
//! sentinel, and releases every dropped block — data blocks and carrier
//! blocks alike — back to the block map.
//!
//! Ordering discipline: the block map is persisted before any carrier
//! write that adopts newly allocated blocks, and carrier writes are issued
//! after the data writes they reference. A crash mid-write then leaves at
//! worst old data under new pointers, never pointers to uninitialized
//! blocks.

use crate::block_map::{BlockGroup, BlockMap};
use crate::carrier::{cont_capacity, dref_inode, walk_chain, write_carrier, Carrier, Cont};
use crate::codec::{ceil_div, BlockAddr, NIL};
use crate::error::{HalfsError, Result};
use crate::host::Bitmap;
use halfs_api::controller::Device;
use halfs_api::types::Block;

/// Fill byte for partial blocks and reclaimed trailing space after a
/// truncating write. Never interpreted by readers; it exists to make
/// truncation effects visible in block dumps.
pub const TRUNC_FILL: u8 = 0xBA;

/// A byte offset decomposed into chain coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPos {
    /// Index of the carrier in the chain (0 = the inode).
    pub carrier: u64,
    /// Block index within that carrier's address list.
    pub blk: u64,
    /// Byte offset within that block.
    pub byte: u64,
}

/// Decompose byte offset `offset` for a chain whose inode holds `api`
/// addresses and whose continuations hold `apc` each.
pub fn decompose(offset: u64, api: u64, apc: u64, block_size: u64) -> StreamPos {
    let bytes_per_inode = api * block_size;
    let bytes_per_cont = apc * block_size;
    let (carrier, in_byte) = if offset < bytes_per_inode {
        (0, offset)
    } else {
        (
            1 + (offset - bytes_per_inode) / bytes_per_cont,
            (offset - bytes_per_inode) % bytes_per_cont,
        )
    };
    StreamPos {
        carrier,
        blk: in_byte / block_size,
        byte: in_byte % block_size,
    }
}

/// Read up to `max_len` bytes starting at byte `start` of the chain headed
/// by `start_ref`.
///
/// Without `max_len` the result runs to the end of the chain and includes
/// the tail of the last block verbatim; the caller is expected to trim
/// with the file size. An empty chain yields an empty result; a start
/// offset past the allocated chain is `InvalidStreamIndex`.
pub fn read_stream(
    dev: &Device,
    start_ref: BlockAddr,
    start: u64,
    max_len: Option<u64>,
) -> Result<Vec<u8>> {
    let head = dref_inode(dev, start_ref)?;
    if head.disk.blocks.is_empty() {
        return Ok(Vec::new());
    }
    let api = head.capacity;
    let apc = cont_capacity(dev.block_size)?;
    let bs = dev.block_size;
    let pos = decompose(start, api, apc, bs);

    let mut out = Vec::new();
    let mut idx = 0u64;
    let mut found_start = false;
    for item in walk_chain(dev, head) {
        let c = item?;
        if idx < pos.carrier {
            idx += 1;
            continue;
        }
        let skip = if idx == pos.carrier {
            if pos.blk >= c.block_count() {
                return Err(HalfsError::InvalidStreamIndex);
            }
            found_start = true;
            pos.blk as usize
        } else {
            0
        };
        for (bi, &addr) in c.blocks().iter().enumerate().skip(skip) {
            let blk = dev.read_block(addr)?;
            let from = if idx == pos.carrier && bi as u64 == pos.blk {
                pos.byte as usize
            } else {
                0
            };
            out.extend_from_slice(&blk.contents_as_ref()[from..]);
            if let Some(want) = max_len {
                if out.len() as u64 >= want {
                    out.truncate(want as usize);
                    return Ok(out);
                }
            }
        }
        idx += 1;
    }
    if !found_start {
        return Err(HalfsError::InvalidStreamIndex);
    }
    Ok(out)
}

/// Everything a write needs after planning and allocation succeeded.
struct WritePlan<'a> {
    bytes: &'a [u8],
    truncating: bool,
    pos: StreamPos,
    /// Index of `pos.carrier` within `kept` (1 when appending right past
    /// the terminal carrier, else 0).
    start_rel: usize,
    /// Carriers from the window start onward; updated in place and
    /// rewritten at the end.
    kept: Vec<Carrier>,
    /// Chain index of `kept[0]`.
    keep_from: u64,
    /// Freshly allocated data blocks, in allocation order.
    new_data: Vec<BlockAddr>,
    /// Freshly allocated continuation blocks, in chain order.
    new_conts: Vec<BlockAddr>,
    api: u64,
    apc: u64,
}

/// Write `bytes` at byte `start` of the chain headed by `start_ref`,
/// allocating blocks and continuations as needed.
///
/// With `truncating` set, the file's contents end exactly at
/// `start + bytes.len()`: the rest of the final block is filled with
/// [`TRUNC_FILL`] and every block past it is released. A zero-length
/// write is a no-op. On any failure the block map is left as it was:
/// partial allocations are rolled back.
///
/// The caller owns the head inode's `size` and `mtime` fields; this
/// function never updates them.
pub fn write_stream<B: Bitmap>(
    dev: &mut Device,
    bm: &mut BlockMap<B>,
    start_ref: BlockAddr,
    start: u64,
    truncating: bool,
    bytes: &[u8],
) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let head = dref_inode(dev, start_ref)?;
    let api = head.capacity;
    let apc = cont_capacity(dev.block_size)?;
    let bs = dev.block_size;
    let len = bytes.len() as u64;
    let pos = decompose(start, api, apc, bs);

    // Walk the chain once, keeping the carriers from the start carrier
    // onward. The carrier just before the window is remembered so an
    // append that begins exactly past the terminal carrier can still link
    // new continuations onto it.
    let mut kept: Vec<Carrier> = Vec::new();
    let mut before: Option<Carrier> = None;
    let mut chain_len = 0u64;
    for item in walk_chain(dev, head) {
        let c = item?;
        if chain_len >= pos.carrier {
            kept.push(c);
        } else {
            before = Some(c);
        }
        chain_len += 1;
    }

    let (keep_from, start_rel) = if kept.is_empty() {
        // The start lies at or past the end of the chain; only the exact
        // append position right past the terminal carrier is legal
        if pos.carrier != chain_len || pos.blk != 0 || pos.byte != 0 {
            return Err(HalfsError::InvalidStreamIndex);
        }
        kept.push(before.expect("a chain always has a head"));
        (chain_len - 1, 1)
    } else {
        let c0 = &kept[0];
        let past_used = pos.blk > c0.block_count()
            || (pos.blk == c0.block_count() && pos.byte != 0)
            || (pos.blk == c0.block_count() && c0.continuation() != NIL);
        if past_used {
            return Err(HalfsError::InvalidStreamIndex);
        }
        (pos.carrier, 0)
    };

    // Capacity planning: whole blocks already allocated at and past the
    // start position, then the shortfall in blocks and continuations.
    let already_blocks: u64 = kept[start_rel..]
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i == 0 {
                c.block_count() - pos.blk
            } else {
                c.block_count()
            }
        })
        .sum();
    // When nothing is allocated at the start position, validation has
    // already pinned the position to a block boundary, so this never
    // underflows
    let avail_bytes = already_blocks * bs - pos.byte;
    let bytes_to_alloc = len.saturating_sub(avail_bytes);
    let blks_to_alloc = ceil_div(bytes_to_alloc, bs);
    let terminal = kept.last().expect("kept is never empty here");
    let avail_in_last = terminal.capacity() - terminal.block_count();
    let conts_to_alloc = if blks_to_alloc > avail_in_last {
        ceil_div(blks_to_alloc - avail_in_last, apc)
    } else {
        0
    };

    // Allocate; partial allocations are released before reporting failure
    let data_group = if blks_to_alloc > 0 {
        match bm.alloc_blocks(blks_to_alloc) {
            Some(g) => Some(g),
            None => return Err(HalfsError::AllocFailed),
        }
    } else {
        None
    };
    let mut cont_addrs = Vec::with_capacity(conts_to_alloc as usize);
    for _ in 0..conts_to_alloc {
        match bm.alloc1() {
            Some(a) => cont_addrs.push(a),
            None => {
                rollback(bm, &data_group, &cont_addrs);
                return Err(HalfsError::AllocFailed);
            }
        }
    }

    let plan = WritePlan {
        bytes,
        truncating,
        pos,
        start_rel,
        kept,
        keep_from,
        new_data: data_group
            .as_ref()
            .map(|g| g.blocks().collect())
            .unwrap_or_default(),
        new_conts: cont_addrs.clone(),
        api,
        apc,
    };
    match plan.apply(dev, bm) {
        Ok(()) => Ok(()),
        Err(e) => {
            rollback(bm, &data_group, &cont_addrs);
            // Best effort: the device may be the thing that just failed
            let _ = bm.persist(dev);
            Err(e)
        }
    }
}

/// Return freshly allocated blocks to the map after a failed write.
fn rollback<B: Bitmap>(
    bm: &mut BlockMap<B>,
    data_group: &Option<BlockGroup>,
    cont_addrs: &[BlockAddr],
) {
    if let Some(g) = data_group {
        let _ = bm.unalloc_blocks(g);
    }
    if let Some(g) = BlockGroup::from_blocks(cont_addrs.to_vec()) {
        let _ = bm.unalloc_blocks(&g);
    }
}

impl<'a> WritePlan<'a> {
    fn apply<B: Bitmap>(mut self, dev: &mut Device, bm: &mut BlockMap<B>) -> Result<()> {
        let bs = dev.block_size;

        // Chain fixup: link the new continuations after the current
        // terminal, then spill the new data blocks across the terminal and
        // the new carriers, filling each to capacity before the next.
        if !self.new_conts.is_empty() {
            let terminal = self.kept.pop().expect("kept is never empty");
            self.kept.push(terminal.with_continuation(self.new_conts[0]));
        }
        for (i, &addr) in self.new_conts.iter().enumerate() {
            let next = self.new_conts.get(i + 1).copied().unwrap_or(NIL);
            let cont = Cont::empty(addr, bs)?;
            self.kept
                .push(Carrier::Cont(cont).with_continuation(next));
        }
        let mut pending = self.new_data.iter().copied();
        let spill_from = self.kept.len() - 1 - self.new_conts.len();
        for i in spill_from..self.kept.len() {
            let c = &self.kept[i];
            let mut blocks = c.blocks().to_vec();
            blocks.extend(
                (&mut pending).take((c.capacity() - c.block_count()) as usize),
            );
            self.kept[i] = self.kept[i].clone().with_blocks(blocks);
        }
        debug_assert_eq!(pending.next(), None);

        // The map must be durable before any carrier adopts a new block
        if !self.new_data.is_empty() || !self.new_conts.is_empty() {
            bm.persist(dev)?;
        }

        // Flatten the addresses the write touches
        let touched = ceil_div(self.pos.byte + self.bytes.len() as u64, bs);
        let mut targets = Vec::with_capacity(touched as usize);
        'outer: for (i, c) in self.kept.iter().enumerate().skip(self.start_rel) {
            let from = if i == self.start_rel {
                self.pos.blk as usize
            } else {
                0
            };
            for &a in &c.blocks()[from..] {
                targets.push(a);
                if targets.len() as u64 == touched {
                    break 'outer;
                }
            }
        }
        debug_assert_eq!(targets.len() as u64, touched);

        // Data blocks, in stream order. The first and last chunks splice
        // into existing block contents (or the truncation fill).
        let mut input_off = 0usize;
        for (ti, &addr) in targets.iter().enumerate() {
            let lead = if ti == 0 { self.pos.byte as usize } else { 0 };
            let take = (bs as usize - lead).min(self.bytes.len() - input_off);
            let mut chunk = Vec::with_capacity(bs as usize);
            if lead > 0 {
                let orig = dev.read_block(addr)?;
                chunk.extend_from_slice(&orig.contents_as_ref()[..lead]);
            }
            chunk.extend_from_slice(&self.bytes[input_off..input_off + take]);
            input_off += take;
            if chunk.len() < bs as usize {
                if self.truncating {
                    chunk.resize(bs as usize, TRUNC_FILL);
                } else {
                    // Read-modify-write: preserve the original tail
                    let orig = dev.read_block(addr)?;
                    chunk.extend_from_slice(&orig.contents_as_ref()[chunk.len()..]);
                }
            }
            dev.write_block(&Block::new(addr, chunk.into_boxed_slice()))?;
        }
        debug_assert_eq!(input_off, self.bytes.len());

        // Truncation pass: cut the chain right after the final written
        // byte and release everything past it
        if self.truncating {
            let end = self.pos_of_last_byte(bs);
            let term_rel = (end.carrier - self.keep_from) as usize;
            let mut freed: Vec<BlockAddr> = Vec::new();

            let term = self.kept[term_rel].clone();
            let mut blocks = term.blocks().to_vec();
            let keep = (end.blk + 1) as usize;
            if keep < blocks.len() {
                freed.extend_from_slice(&blocks[keep..]);
                blocks.truncate(keep);
            }
            self.kept[term_rel] = term.with_blocks(blocks).with_continuation(NIL);

            for c in self.kept.drain(term_rel + 1..) {
                freed.extend_from_slice(c.blocks());
                freed.push(c.addr());
            }
            if let Some(g) = BlockGroup::from_blocks(freed) {
                bm.unalloc_blocks(&g)?;
                bm.persist(dev)?;
            }
        }

        // Carriers last, after the data they point at
        for c in &self.kept {
            write_carrier(dev, c)?;
        }
        Ok(())
    }

    /// Chain coordinates of the final byte this plan writes.
    fn pos_of_last_byte(&self, bs: u64) -> StreamPos {
        let start_offset = match self.pos.carrier {
            0 => self.pos.blk * bs + self.pos.byte,
            c => self.api * bs + (c - 1) * self.apc * bs + self.pos.blk * bs + self.pos.byte,
        };
        decompose(
            start_offset + self.bytes.len() as u64 - 1,
            self.api,
            self.apc,
            bs,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decomposition_matches_capacities() {
        let (api, apc, bs) = (50, 56, 512);
        assert_eq!(
            decompose(0, api, apc, bs),
            StreamPos { carrier: 0, blk: 0, byte: 0 }
        );
        assert_eq!(
            decompose(api * bs - 1, api, apc, bs),
            StreamPos { carrier: 0, blk: api - 1, byte: bs - 1 }
        );
        assert_eq!(
            decompose(api * bs, api, apc, bs),
            StreamPos { carrier: 1, blk: 0, byte: 0 }
        );
        assert_eq!(
            decompose(api * bs + 513, api, apc, bs),
            StreamPos { carrier: 1, blk: 1, byte: 1 }
        );
        assert_eq!(
            decompose(api * bs + apc * bs, api, apc, bs),
            StreamPos { carrier: 2, blk: 0, byte: 0 }
        );
    }

    // The end-to-end stream scenarios run against real device images
    #[path = "../../../fs-tests/stream_test.rs"]
    mod scenarios;
}
