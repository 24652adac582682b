//! Block and superblock types traded between the controller and the engine.
//!
//! A [`Block`] is the unit the controller reads and writes: a fixed-size
//! byte buffer tagged with its position on the device. Blocks offer raw
//! bounds-checked access plus serde helpers, so records like the superblock
//! and the block-map header can be written with bincode instead of by hand.
//!
//! All multi-byte integers on a Halfs disk are big-endian; the bincode
//! configuration returned by [`bin_codec`] enforces that (together with
//! fixed-size integer encoding, so record sizes are stable).

use super::error;
use super::error::ApiError;
use bincode::Options;
use lazy_static::lazy_static;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::prelude::*;
use std::io::{Cursor, SeekFrom};

/// The bincode configuration used for every serde-encoded record on disk:
/// big-endian, fixed-size integers.
pub fn bin_codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
}

/// A single device block: `block_size` bytes of data at index `block_no`.
#[derive(Debug, PartialEq, Eq)]
pub struct Block {
    /// Index of this block on the device.
    pub block_no: u64,
    contents: Box<[u8]>,
}

impl Block {
    /// Wrap the given bytes as the contents of block `block_no`.
    pub fn new(block_no: u64, data: Box<[u8]>) -> Block {
        Block {
            block_no,
            contents: data,
        }
    }

    /// An all-zero block of `len` bytes at index `block_no`.
    pub fn new_zero(block_no: u64, len: u64) -> Block {
        Block {
            block_no,
            contents: vec![0; len as usize].into_boxed_slice(),
        }
    }

    /// Length of the block contents in bytes.
    pub fn len(&self) -> u64 {
        self.contents.len() as u64
    }

    /// True iff the block holds no bytes (a zero-sized device would produce
    /// one; real devices never do).
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Borrow the block contents.
    pub fn contents_as_ref(&self) -> &[u8] {
        &self.contents
    }

    /// Copy `data.len()` bytes out of the block, starting at `offset`.
    /// Errors without reading anything if the range leaves the block.
    pub fn read_data(&self, data: &mut [u8], offset: u64) -> error::Result<()> {
        if offset + data.len() as u64 > self.len() {
            return Err(ApiError::BlockInput("read beyond the end of the block"));
        }
        let mut c = Cursor::new(&self.contents);
        c.seek(SeekFrom::Start(offset))?;
        c.read_exact(data).map_err(|e| e.into())
    }

    /// Copy `data` into the block, starting at `offset`.
    /// Errors without writing anything if the range leaves the block.
    pub fn write_data(&mut self, data: &[u8], offset: u64) -> error::Result<()> {
        if offset + data.len() as u64 > self.len() {
            return Err(ApiError::BlockInput("write beyond the end of the block"));
        }
        let mut c = Cursor::new(&mut self.contents[..]);
        c.seek(SeekFrom::Start(offset))?;
        c.write_all(data).map_err(|e| e.into())
    }

    /// Decode a serde record from the block, starting at `offset`.
    pub fn deserialize_from<S>(&self, offset: u64) -> error::Result<S>
    where
        S: DeserializeOwned,
    {
        let mut c = Cursor::new(&self.contents);
        c.seek(SeekFrom::Start(offset))?;
        Ok(bin_codec().deserialize_from(c)?)
    }

    /// Encode a serde record into the block at `offset`.
    /// Routed through `write_data` so an overlong record is rejected instead
    /// of silently growing the buffer.
    pub fn serialize_into<S>(&mut self, record: &S, offset: u64) -> error::Result<()>
    where
        S: Serialize,
    {
        let bin = bin_codec().serialize(record)?;
        self.write_data(&bin, offset)
    }
}

/// Magic number identifying a Halfs superblock.
pub const SUPER_MAGIC: u64 = 0x4841_4C46_5356_3101; // "HALFSV1" + 0x01

/// The record stored at block 0 of every Halfs device.
///
/// Device layout:
///     \[ superblock | block-map storage | inode and data blocks \]
///
/// Unlike classical fixed-region layouts, the block map storage immediately
/// after the superblock is self-describing (its size follows from
/// `nblocks` and `block_size`), so the superblock only needs to carry the
/// geometry, the root inode address, and the clean-unmount flag. The clean
/// flag is cleared on mount and set again on unmount; finding it cleared at
/// mount time means the previous session did not shut down properly.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    /// Must equal [`SUPER_MAGIC`].
    pub magic: u64,
    /// Size of each device block, in bytes.
    pub block_size: u64,
    /// Total number of blocks on the device.
    pub nblocks: u64,
    /// Block address of the root directory's inode.
    pub root_inode: u64,
    /// True iff the filesystem was unmounted cleanly.
    pub clean: bool,
}

lazy_static! {
    /// Serialized size of a superblock, in bytes. Measured at runtime from
    /// the actual encoding; must fit in a single device block.
    pub static ref SUPERBLOCK_SIZE: u64 =
        bin_codec().serialize(&SuperBlock::default()).unwrap().len() as u64;
}

#[cfg(test)]
mod block_tests {
    use super::{bin_codec, Block, SuperBlock, SUPERBLOCK_SIZE};
    use bincode::Options;

    static BLOCK_SIZE: u64 = 512;

    #[test]
    fn raw_rw() {
        let mut b = Block::new_zero(7, BLOCK_SIZE);
        assert_eq!(b.contents_as_ref(), &vec![0; BLOCK_SIZE as usize][..]);

        let mut data = vec![5; 5];
        b.write_data(&data, 10).unwrap();
        b.read_data(&mut data, 8).unwrap();
        assert_eq!(data, vec![0, 0, 5, 5, 5]);

        // Out-of-bounds accesses leave the block untouched
        let mut one = vec![1];
        assert!(b.write_data(&one, BLOCK_SIZE).is_err());
        assert!(b.read_data(&mut one, BLOCK_SIZE).is_err());
        let mut two = vec![1, 2];
        assert!(b.write_data(&two, BLOCK_SIZE - 1).is_err());
        assert!(b.read_data(&mut two, BLOCK_SIZE - 1).is_err());
    }

    #[test]
    fn codec_is_big_endian_fixint() {
        let bytes = bin_codec().serialize(&0x0102_0304_0506_0708u64).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn superblock_roundtrip() {
        let sb = SuperBlock {
            magic: super::SUPER_MAGIC,
            block_size: BLOCK_SIZE,
            nblocks: 64,
            root_inode: 3,
            clean: true,
        };
        let mut b = Block::new_zero(0, BLOCK_SIZE);
        b.serialize_into(&sb, 0).unwrap();
        assert_eq!(b.deserialize_from::<SuperBlock>(0).unwrap(), sb);
        assert!(*SUPERBLOCK_SIZE <= BLOCK_SIZE);

        // A record must not fit past the end of the block
        assert!(b
            .serialize_into(&sb, BLOCK_SIZE + 1 - *SUPERBLOCK_SIZE)
            .is_err());
    }
}
