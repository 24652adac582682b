//! Inode and continuation records, and the carrier chain built from them.
//!
//! A file is one **inode** block followed by zero or more **continuation**
//! blocks, singly linked through their continuation references. The inode
//! carries the file metadata; continuations carry nothing but more block
//! addresses, which is why they hold strictly more of them.
//!
//! Records are split into a persisted struct ([`DInode`], [`DCont`]) and
//! an in-memory struct ([`Inode`], [`Cont`]) wrapping it together with the
//! derived `capacity` field. Capacity is a function of the device
//! block size, never stored on disk, and repopulated on every decode — the
//! wrapper types make it impossible to forget.
//!
//! On disk each record fills exactly one block: the block list is padded
//! with nil references up to the record's capacity, four 8-byte magic
//! segments are interspersed between the field groups, and a 7-byte `0xAD`
//! region closes the record so future extensions are detectable.

use crate::codec::{
    BlockAddr, ByteReader, ByteWriter, CONT_MAGIC, INODE_MAGIC, NIL, PAD_LEN, TAG_CONT, TAG_INODE,
};
use crate::error::{HalfsError, RecordKind, Result};
use crate::host::Timestamp;
use halfs_api::controller::Device;
use halfs_api::types::Block;
use lazy_static::lazy_static;

/// Smallest block-list capacity any inode record must support. A device
/// whose block size cannot hold this many addresses is rejected at mount.
pub const MIN_INODE_BLOCKS: u64 = 48;
/// Smallest block-list capacity any continuation record must support.
pub const MIN_CONT_BLOCKS: u64 = 56;

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// The persisted fields of an inode block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DInode {
    /// Block address of this record itself.
    pub addr: BlockAddr,
    /// Parent inode; [`NIL`] for the root.
    pub parent: BlockAddr,
    /// First continuation of the chain; [`NIL`] if there is none.
    pub cont: BlockAddr,
    /// File size in bytes.
    pub size: u64,
    /// Creation time.
    pub ctime: Timestamp,
    /// Last modification time; never earlier than `ctime`.
    pub mtime: Timestamp,
    /// Owning user.
    pub uid: u32,
    /// Owning group.
    pub gid: u32,
    /// Addresses of the file's first data blocks, in file order.
    pub blocks: Vec<BlockAddr>,
}

/// An inode together with its derived address capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    /// The persisted record.
    pub disk: DInode,
    /// Maximum length of `disk.blocks` at the current block size.
    pub capacity: u64,
}

/// The persisted fields of a continuation block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DCont {
    /// Block address of this record itself.
    pub addr: BlockAddr,
    /// Next continuation; [`NIL`] terminates the chain.
    pub next: BlockAddr,
    /// Addresses of further data blocks, in file order.
    pub blocks: Vec<BlockAddr>,
}

/// A continuation together with its derived address capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cont {
    /// The persisted record.
    pub disk: DCont,
    /// Maximum length of `disk.blocks` at the current block size.
    pub capacity: u64,
}

impl Cont {
    /// A fresh, empty continuation at `addr` for the given block size.
    pub fn empty(addr: BlockAddr, block_size: u64) -> Result<Cont> {
        Ok(Cont {
            disk: DCont {
                addr,
                next: NIL,
                blocks: Vec::new(),
            },
            capacity: cont_capacity(block_size)?,
        })
    }
}

fn encode_dinode(d: &DInode, capacity: u64) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity((capacity * 8) as usize + 128);
    w.put_u8(TAG_INODE);
    w.put_magic_seg(INODE_MAGIC, 0);
    w.put_u64(d.addr);
    w.put_u64(d.parent);
    w.put_magic_seg(INODE_MAGIC, 1);
    w.put_u64(d.cont);
    w.put_u64(d.size);
    put_timestamp(&mut w, d.ctime);
    put_timestamp(&mut w, d.mtime);
    w.put_magic_seg(INODE_MAGIC, 2);
    w.put_u32(d.uid);
    w.put_u32(d.gid);
    w.put_u64(d.blocks.len() as u64);
    w.put_magic_seg(INODE_MAGIC, 3);
    put_block_list(&mut w, &d.blocks, capacity);
    w.put_padding();
    w.into_inner()
}

fn encode_dcont(d: &DCont, capacity: u64) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity((capacity * 8) as usize + 64);
    w.put_u8(TAG_CONT);
    w.put_magic_seg(CONT_MAGIC, 0);
    w.put_u64(d.addr);
    w.put_magic_seg(CONT_MAGIC, 1);
    w.put_u64(d.next);
    w.put_magic_seg(CONT_MAGIC, 2);
    w.put_u64(d.blocks.len() as u64);
    w.put_magic_seg(CONT_MAGIC, 3);
    put_block_list(&mut w, &d.blocks, capacity);
    w.put_padding();
    w.into_inner()
}

fn put_timestamp(w: &mut ByteWriter, t: Timestamp) {
    w.put_u64(t.secs);
    w.put_u32(t.nanos);
}

fn put_block_list(w: &mut ByteWriter, blocks: &[BlockAddr], capacity: u64) {
    debug_assert!(blocks.len() as u64 <= capacity);
    for &b in blocks {
        w.put_u64(b);
    }
    for _ in blocks.len() as u64..capacity {
        w.put_u64(NIL);
    }
}

lazy_static! {
    /// Bytes of an inode record that are not block-list slots, measured by
    /// serializing an empty record carrying the minimum list.
    static ref INODE_OVERHEAD: u64 = {
        let empty = DInode {
            addr: NIL,
            parent: NIL,
            cont: NIL,
            size: 0,
            ctime: Timestamp::ZERO,
            mtime: Timestamp::ZERO,
            uid: 0,
            gid: 0,
            blocks: Vec::new(),
        };
        encode_dinode(&empty, MIN_INODE_BLOCKS).len() as u64 - MIN_INODE_BLOCKS * 8
    };
    /// Likewise for continuation records.
    static ref CONT_OVERHEAD: u64 = {
        let empty = DCont { addr: NIL, next: NIL, blocks: Vec::new() };
        encode_dcont(&empty, MIN_CONT_BLOCKS).len() as u64 - MIN_CONT_BLOCKS * 8
    };
}

/// Address capacity of an inode record at the given block size.
pub fn inode_capacity(block_size: u64) -> Result<u64> {
    let cap = block_size
        .checked_sub(*INODE_OVERHEAD)
        .map(|rest| rest / 8)
        .unwrap_or(0);
    if cap < MIN_INODE_BLOCKS {
        return Err(HalfsError::Input("block size too small for inode records"));
    }
    Ok(cap)
}

/// Address capacity of a continuation record at the given block size.
/// Strictly larger than [`inode_capacity`] for any supported block size,
/// since continuations carry less metadata.
pub fn cont_capacity(block_size: u64) -> Result<u64> {
    let cap = block_size
        .checked_sub(*CONT_OVERHEAD)
        .map(|rest| rest / 8)
        .unwrap_or(0);
    if cap < MIN_CONT_BLOCKS {
        return Err(HalfsError::Input(
            "block size too small for continuation records",
        ));
    }
    Ok(cap)
}

/// The uniform view over inodes and continuations that the stream layer
/// works with. Carriers are values: every setter consumes the carrier and
/// returns the edited copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Carrier {
    /// The head record of a chain.
    Inode(Inode),
    /// Any later record of a chain.
    Cont(Cont),
}

impl Carrier {
    /// Block address of the record itself.
    pub fn addr(&self) -> BlockAddr {
        match self {
            Carrier::Inode(i) => i.disk.addr,
            Carrier::Cont(c) => c.disk.addr,
        }
    }

    /// The next continuation of the chain; [`NIL`] terminates it.
    pub fn continuation(&self) -> BlockAddr {
        match self {
            Carrier::Inode(i) => i.disk.cont,
            Carrier::Cont(c) => c.disk.next,
        }
    }

    /// Number of data-block addresses currently held.
    pub fn block_count(&self) -> u64 {
        self.blocks().len() as u64
    }

    /// The held data-block addresses, in file order.
    pub fn blocks(&self) -> &[BlockAddr] {
        match self {
            Carrier::Inode(i) => &i.disk.blocks,
            Carrier::Cont(c) => &c.disk.blocks,
        }
    }

    /// Maximum number of addresses this record can hold.
    pub fn capacity(&self) -> u64 {
        match self {
            Carrier::Inode(i) => i.capacity,
            Carrier::Cont(c) => c.capacity,
        }
    }

    /// This carrier with its continuation reference replaced.
    pub fn with_continuation(self, next: BlockAddr) -> Carrier {
        match self {
            Carrier::Inode(mut i) => {
                i.disk.cont = next;
                Carrier::Inode(i)
            }
            Carrier::Cont(mut c) => {
                c.disk.next = next;
                Carrier::Cont(c)
            }
        }
    }

    /// This carrier with its block list replaced. The list must fit the
    /// carrier's capacity.
    pub fn with_blocks(self, blocks: Vec<BlockAddr>) -> Carrier {
        debug_assert!(blocks.len() as u64 <= self.capacity());
        match self {
            Carrier::Inode(mut i) => {
                i.disk.blocks = blocks;
                Carrier::Inode(i)
            }
            Carrier::Cont(mut c) => {
                c.disk.blocks = blocks;
                Carrier::Cont(c)
            }
        }
    }
}

/// Serialize a carrier into the single device block it occupies.
pub fn encode_carrier(c: &Carrier, block_size: u64) -> Result<Block> {
    let bytes = match c {
        Carrier::Inode(i) => {
            let cap = inode_capacity(block_size)?;
            if i.disk.blocks.len() as u64 > cap {
                return Err(HalfsError::Input("inode block list exceeds capacity"));
            }
            encode_dinode(&i.disk, cap)
        }
        Carrier::Cont(ct) => {
            let cap = cont_capacity(block_size)?;
            if ct.disk.blocks.len() as u64 > cap {
                return Err(HalfsError::Input("continuation block list exceeds capacity"));
            }
            encode_dcont(&ct.disk, cap)
        }
    };
    debug_assert!(bytes.len() as u64 <= block_size);
    let mut blk = Block::new_zero(c.addr(), block_size);
    blk.write_data(&bytes, 0)?;
    Ok(blk)
}

/// Decode the carrier stored in `block`, repopulating its capacity from
/// the block size. This is the only decoder: the record kind is read from
/// the tag byte, and every magic segment, the padding region, and the
/// structural invariants are verified on the way.
pub fn decode_carrier(block: &Block) -> Result<Carrier> {
    let bytes = block.contents_as_ref();
    match bytes.first() {
        Some(&TAG_INODE) => decode_inode_bytes(bytes, block.len()).map(Carrier::Inode),
        Some(&TAG_CONT) => decode_cont_bytes(bytes, block.len()).map(Carrier::Cont),
        _ => Err(HalfsError::DecodeFail(RecordKind::Carrier)),
    }
}

fn decode_inode_bytes(bytes: &[u8], block_size: u64) -> Result<Inode> {
    let capacity = inode_capacity(block_size)?;
    let mut r = ByteReader::new(bytes, RecordKind::Inode);
    r.get_u8()?; // tag, already dispatched on
    r.expect_magic_seg(INODE_MAGIC, 0)?;
    let addr = r.get_u64()?;
    let parent = r.get_u64()?;
    r.expect_magic_seg(INODE_MAGIC, 1)?;
    let cont = r.get_u64()?;
    let size = r.get_u64()?;
    let ctime = get_timestamp(&mut r)?;
    let mtime = get_timestamp(&mut r)?;
    r.expect_magic_seg(INODE_MAGIC, 2)?;
    let uid = r.get_u32()?;
    let gid = r.get_u32()?;
    let count = r.get_u64()?;
    r.expect_magic_seg(INODE_MAGIC, 3)?;
    let blocks = get_block_list(&mut r, count, capacity, RecordKind::Inode)?;
    r.expect_padding()?;

    // A record can never describe itself at the nil address, and a
    // modification can never precede creation
    if addr == NIL || mtime < ctime {
        return Err(HalfsError::DecodeFail(RecordKind::Inode));
    }
    Ok(Inode {
        disk: DInode {
            addr,
            parent,
            cont,
            size,
            ctime,
            mtime,
            uid,
            gid,
            blocks,
        },
        capacity,
    })
}

fn decode_cont_bytes(bytes: &[u8], block_size: u64) -> Result<Cont> {
    let capacity = cont_capacity(block_size)?;
    let mut r = ByteReader::new(bytes, RecordKind::Continuation);
    r.get_u8()?;
    r.expect_magic_seg(CONT_MAGIC, 0)?;
    let addr = r.get_u64()?;
    r.expect_magic_seg(CONT_MAGIC, 1)?;
    let next = r.get_u64()?;
    r.expect_magic_seg(CONT_MAGIC, 2)?;
    let count = r.get_u64()?;
    r.expect_magic_seg(CONT_MAGIC, 3)?;
    let blocks = get_block_list(&mut r, count, capacity, RecordKind::Continuation)?;
    r.expect_padding()?;

    if addr == NIL {
        return Err(HalfsError::DecodeFail(RecordKind::Continuation));
    }
    Ok(Cont {
        disk: DCont { addr, next, blocks },
        capacity,
    })
}

fn get_timestamp(r: &mut ByteReader) -> Result<Timestamp> {
    let secs = r.get_u64()?;
    let nanos = r.get_u32()?;
    if nanos >= NANOS_PER_SEC {
        // Whatever this is, it was not written by the encoder
        return Err(HalfsError::DecodeFail(r.kind()));
    }
    Ok(Timestamp::new(secs, nanos))
}

fn get_block_list(
    r: &mut ByteReader,
    count: u64,
    capacity: u64,
    kind: RecordKind,
) -> Result<Vec<BlockAddr>> {
    if count > capacity {
        return Err(HalfsError::DecodeFail(kind));
    }
    let mut blocks = Vec::with_capacity(count as usize);
    for i in 0..capacity {
        let a = r.get_u64()?;
        if i < count {
            if a == NIL {
                return Err(HalfsError::DecodeFail(kind));
            }
            blocks.push(a);
        } else if a != NIL {
            // Slots past the count must still be nil padding
            return Err(HalfsError::DecodeFail(kind));
        }
    }
    Ok(blocks)
}

/// Construct an in-memory empty inode at `addr`. Allocates nothing and
/// writes nothing.
pub fn build_empty_inode(
    dev: &Device,
    addr: BlockAddr,
    parent: BlockAddr,
    uid: u32,
    gid: u32,
    now: Timestamp,
) -> Result<Inode> {
    Ok(Inode {
        disk: DInode {
            addr,
            parent,
            cont: NIL,
            size: 0,
            ctime: now,
            mtime: now,
            uid,
            gid,
            blocks: Vec::new(),
        },
        capacity: inode_capacity(dev.block_size)?,
    })
}

/// [`build_empty_inode`], serialized to exactly one device block.
pub fn build_empty_inode_enc(
    dev: &Device,
    addr: BlockAddr,
    parent: BlockAddr,
    uid: u32,
    gid: u32,
    now: Timestamp,
) -> Result<Block> {
    let inode = build_empty_inode(dev, addr, parent, uid, gid, now)?;
    encode_carrier(&Carrier::Inode(inode), dev.block_size)
}

/// Read and decode the inode at `iref`.
pub fn dref_inode(dev: &Device, iref: BlockAddr) -> Result<Inode> {
    if iref == NIL {
        return Err(HalfsError::Input("dereferenced a nil inode reference"));
    }
    match decode_carrier(&dev.read_block(iref)?)? {
        Carrier::Inode(i) => Ok(i),
        Carrier::Cont(_) => Err(HalfsError::DecodeFail(RecordKind::Inode)),
    }
}

/// Read and decode the continuation at `cref`.
pub fn dref_cont(dev: &Device, cref: BlockAddr) -> Result<Cont> {
    if cref == NIL {
        return Err(HalfsError::Input("dereferenced a nil continuation reference"));
    }
    match decode_carrier(&dev.read_block(cref)?)? {
        Carrier::Cont(c) => Ok(c),
        Carrier::Inode(_) => Err(HalfsError::DecodeFail(RecordKind::Continuation)),
    }
}

/// Serialize `c` and write it at its own address.
pub fn write_carrier(dev: &mut Device, c: &Carrier) -> Result<()> {
    let blk = encode_carrier(c, dev.block_size)?;
    dev.write_block(&blk)?;
    Ok(())
}

/// Lazy walk over a carrier chain, yielding the head inode first and then
/// each continuation in order. A chain longer than the device has blocks
/// can only be a cycle, and is reported as `CorruptChain`.
pub struct ChainWalker<'a> {
    dev: &'a Device,
    head: Option<Inode>,
    next: BlockAddr,
    steps: u64,
    done: bool,
}

/// Begin walking the chain headed by `head`.
pub fn walk_chain(dev: &Device, head: Inode) -> ChainWalker<'_> {
    ChainWalker {
        dev,
        head: Some(head),
        next: NIL,
        steps: 0,
        done: false,
    }
}

impl<'a> Iterator for ChainWalker<'a> {
    type Item = Result<Carrier>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(head) = self.head.take() {
            self.next = head.disk.cont;
            return Some(Ok(Carrier::Inode(head)));
        }
        if self.next == NIL {
            self.done = true;
            return None;
        }
        self.steps += 1;
        if self.steps > self.dev.nblocks {
            self.done = true;
            return Some(Err(HalfsError::CorruptChain));
        }
        match dref_cont(self.dev, self.next) {
            Ok(c) => {
                self.next = c.disk.next;
                Some(Ok(Carrier::Cont(c)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Materialize the full chain headed by `head`, following continuation
/// links until nil.
pub fn expand_chain(dev: &Device, head: Inode) -> Result<Vec<Carrier>> {
    walk_chain(dev, head).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[path = "../../../fs-tests/utils.rs"]
    mod utils;

    static BLOCK_SIZE: u64 = 512;

    fn sample_inode() -> Inode {
        Inode {
            disk: DInode {
                addr: 7,
                parent: 3,
                cont: 9,
                size: 1234,
                ctime: Timestamp::new(100, 500),
                mtime: Timestamp::new(101, 0),
                uid: 1000,
                gid: 100,
                blocks: vec![12, 13, 40, 41],
            },
            capacity: inode_capacity(BLOCK_SIZE).unwrap(),
        }
    }

    #[test]
    fn capacities_are_derived_and_ordered() {
        let api = inode_capacity(BLOCK_SIZE).unwrap();
        let apc = cont_capacity(BLOCK_SIZE).unwrap();
        assert!(api >= MIN_INODE_BLOCKS);
        assert!(apc >= MIN_CONT_BLOCKS);
        // Continuations carry less metadata, so they hold more addresses
        assert!(apc > api);
        // At the common 512-byte block size the layout yields exactly:
        assert_eq!(api, 50);
        assert_eq!(apc, 56);

        // A block too small for the minimum lists is rejected
        assert!(inode_capacity(128).is_err());
        assert!(cont_capacity(128).is_err());
    }

    #[test]
    fn inode_roundtrip() {
        let inode = sample_inode();
        let blk = encode_carrier(&Carrier::Inode(inode.clone()), BLOCK_SIZE).unwrap();
        assert_eq!(blk.len(), BLOCK_SIZE);
        match decode_carrier(&blk).unwrap() {
            Carrier::Inode(got) => assert_eq!(got, inode),
            other => panic!("decoded the wrong kind: {:?}", other),
        }
    }

    #[test]
    fn cont_roundtrip() {
        let cont = Cont {
            disk: DCont {
                addr: 9,
                next: NIL,
                blocks: (20..40).collect(),
            },
            capacity: cont_capacity(BLOCK_SIZE).unwrap(),
        };
        let blk = encode_carrier(&Carrier::Cont(cont.clone()), BLOCK_SIZE).unwrap();
        match decode_carrier(&blk).unwrap() {
            Carrier::Cont(got) => assert_eq!(got, cont),
            other => panic!("decoded the wrong kind: {:?}", other),
        }
    }

    #[test]
    fn zeroed_magic_fails_decode() {
        let blk = encode_carrier(&Carrier::Inode(sample_inode()), BLOCK_SIZE).unwrap();
        // The second magic segment sits after tag + seg0 + addr + parent
        let mut raw = blk.contents_as_ref().to_vec();
        for b in &mut raw[25..33] {
            *b = 0;
        }
        let tampered = Block::new(blk.block_no, raw.into_boxed_slice());
        assert!(matches!(
            decode_carrier(&tampered),
            Err(HalfsError::DecodeFail(RecordKind::Inode))
        ));
    }

    #[test]
    fn tampered_padding_fails_decode() {
        let blk = encode_carrier(&Carrier::Inode(sample_inode()), BLOCK_SIZE).unwrap();
        let record_len = (*INODE_OVERHEAD + inode_capacity(BLOCK_SIZE).unwrap() * 8) as usize;
        let mut raw = blk.contents_as_ref().to_vec();
        raw[record_len - PAD_LEN] = 0x00;
        let tampered = Block::new(blk.block_no, raw.into_boxed_slice());
        assert!(matches!(
            decode_carrier(&tampered),
            Err(HalfsError::DecodeFail(RecordKind::Inode))
        ));
    }

    #[test]
    fn non_nil_slot_past_count_fails_decode() {
        let mut inode = sample_inode();
        inode.disk.blocks.clear();
        let blk = encode_carrier(&Carrier::Inode(inode), BLOCK_SIZE).unwrap();
        let record_len = (*INODE_OVERHEAD + inode_capacity(BLOCK_SIZE).unwrap() * 8) as usize;
        let list_start = record_len - PAD_LEN - (inode_capacity(BLOCK_SIZE).unwrap() * 8) as usize;
        let mut raw = blk.contents_as_ref().to_vec();
        raw[list_start + 7] = 0x2A; // first slot now non-nil while count is 0
        let tampered = Block::new(blk.block_no, raw.into_boxed_slice());
        assert!(matches!(
            decode_carrier(&tampered),
            Err(HalfsError::DecodeFail(RecordKind::Inode))
        ));
    }

    #[test]
    fn unknown_tag_fails_as_carrier() {
        let blk = Block::new_zero(5, BLOCK_SIZE);
        assert!(matches!(
            decode_carrier(&blk),
            Err(HalfsError::DecodeFail(RecordKind::Carrier))
        ));
    }

    #[test]
    fn chain_expansion_and_cycle_detection() {
        let path = utils::disk_prep_path("images-carrier-chain", "img");
        let mut dev = utils::disk_setup(&path, BLOCK_SIZE, 32);

        // inode(3) -> cont(4) -> cont(5)
        let mut inode = build_empty_inode(&dev, 3, NIL, 0, 0, Timestamp::ZERO).unwrap();
        inode.disk.cont = 4;
        let mut c1 = Cont::empty(4, BLOCK_SIZE).unwrap();
        c1.disk.next = 5;
        let c2 = Cont::empty(5, BLOCK_SIZE).unwrap();
        write_carrier(&mut dev, &Carrier::Inode(inode.clone())).unwrap();
        write_carrier(&mut dev, &Carrier::Cont(c1.clone())).unwrap();
        write_carrier(&mut dev, &Carrier::Cont(c2)).unwrap();

        let chain = expand_chain(&dev, dref_inode(&dev, 3).unwrap()).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(
            chain.iter().map(Carrier::addr).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );

        // Loop the second continuation back onto the first: a cycle
        let mut looped = Cont::empty(5, BLOCK_SIZE).unwrap();
        looped.disk.next = 4;
        write_carrier(&mut dev, &Carrier::Cont(looped)).unwrap();
        let res = expand_chain(&dev, dref_inode(&dev, 3).unwrap());
        assert!(matches!(res, Err(HalfsError::CorruptChain)));

        utils::disk_destruct(dev);
    }

    #[test]
    fn dref_rejects_the_wrong_kind() {
        let path = utils::disk_prep_path("images-carrier-kind", "img");
        let mut dev = utils::disk_setup(&path, BLOCK_SIZE, 16);
        let cont = Cont::empty(6, BLOCK_SIZE).unwrap();
        write_carrier(&mut dev, &Carrier::Cont(cont)).unwrap();

        assert!(matches!(
            dref_inode(&dev, 6),
            Err(HalfsError::DecodeFail(RecordKind::Inode))
        ));
        assert!(dref_cont(&dev, 6).is_ok());
        utils::disk_destruct(dev);
    }
}
