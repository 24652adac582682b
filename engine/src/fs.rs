//! The mountable filesystem handle tying the engine together.
//!
//! [`Halfs`] owns the device, the superblock, and the block map, all
//! behind the single per-mount lock; every operation acquires it, so the
//! engine itself never runs concurrently. The handle is thin policy over
//! the stream layer: it trims reads to the file size, and after a write it
//! updates the head inode's `size` and `mtime` — the bookkeeping the
//! stream layer deliberately leaves to the layer above.
//!
//! Life cycle: [`Halfs::mkfs`] formats a fresh image and returns it
//! mounted, [`Halfs::mountfs`] opens an existing one, and
//! [`Halfs::unmountfs`] sets the clean flag and gives the device back.
//! The clean flag is cleared on disk for as long as the filesystem is
//! mounted, so a handle that disappears without unmounting (a crash) is
//! visible at the next mount.

use crate::block_map::BlockMap;
use crate::carrier::{
    build_empty_inode_enc, cont_capacity, dref_inode, inode_capacity, write_carrier, Carrier,
};
use crate::codec::{BlockAddr, NIL};
use crate::error::{HalfsError, Result};
use crate::host::{Bitmap, ByteBitmap, Clock, Lock, MutexLock, WallClock};
use crate::stream;
use halfs_api::controller::Device;
use halfs_api::types::{Block, SuperBlock, SUPER_MAGIC};
use std::marker::PhantomData;
use std::path::Path;

/// The engine state guarded by the per-mount lock.
pub struct FsState<B: Bitmap> {
    dev: Device,
    sb: SuperBlock,
    bm: BlockMap<B>,
}

/// A mounted Halfs filesystem.
///
/// Generic over the host capabilities so a deterministic test host can
/// substitute a step clock and a no-op lock; production mounts use the
/// defaults.
pub struct Halfs<B = ByteBitmap, C = WallClock, L = MutexLock<FsState<B>>>
where
    B: Bitmap,
    C: Clock,
    L: Lock<FsState<B>>,
{
    state: L,
    clock: C,
    /// Value of the clean flag found at mount time.
    was_clean: bool,
    _bitmap: PhantomData<B>,
}

fn write_superblock(dev: &mut Device, sb: &SuperBlock) -> Result<()> {
    let mut blk = Block::new_zero(0, dev.block_size);
    blk.serialize_into(sb, 0)?;
    dev.write_block(&blk)?;
    Ok(())
}

fn sb_valid(sb: &SuperBlock, dev: &Device) -> bool {
    sb.magic == SUPER_MAGIC
        && sb.block_size == dev.block_size
        && sb.nblocks == dev.nblocks
        && sb.root_inode != NIL
        && sb.root_inode < sb.nblocks
}

impl<B, C, L> Halfs<B, C, L>
where
    B: Bitmap,
    C: Clock,
    L: Lock<FsState<B>>,
{
    /// Format a fresh image at `path` and return it mounted: superblock,
    /// empty block map, and an empty root inode.
    pub fn mkfs<P: AsRef<Path>>(
        path: P,
        block_size: u64,
        nblocks: u64,
        clock: C,
    ) -> Result<Self> {
        // Reject geometries the record layout cannot support
        inode_capacity(block_size)?;
        cont_capacity(block_size)?;

        let mut dev = Device::new(path, block_size, nblocks)?;
        let mut bm = BlockMap::create(&mut dev)?;
        let root = bm.alloc1().ok_or(HalfsError::AllocFailed)?;
        bm.persist(&mut dev)?;

        let root_blk = build_empty_inode_enc(&dev, root, NIL, 0, 0, clock.now())?;
        dev.write_block(&root_blk)?;

        // The flag stays cleared until a proper unmount
        let sb = SuperBlock {
            magic: SUPER_MAGIC,
            block_size,
            nblocks,
            root_inode: root,
            clean: false,
        };
        write_superblock(&mut dev, &sb)?;
        dev.flush()?;

        Ok(Halfs {
            state: L::new(FsState { dev, sb, bm }),
            clock,
            was_clean: true,
            _bitmap: PhantomData,
        })
    }

    /// Mount an existing device. Validates the superblock and the block
    /// map, then clears the clean flag on disk.
    pub fn mountfs(mut dev: Device, clock: C) -> Result<Self> {
        let sb: SuperBlock = dev
            .read_block(0)?
            .deserialize_from(0)
            .map_err(|_| HalfsError::Input("device does not hold a superblock"))?;
        if !sb_valid(&sb, &dev) {
            return Err(HalfsError::Input("superblock does not match the device"));
        }
        let bm = BlockMap::read(&dev)?;

        let was_clean = sb.clean;
        let mut sb = sb;
        sb.clean = false;
        write_superblock(&mut dev, &sb)?;
        dev.flush()?;

        Ok(Halfs {
            state: L::new(FsState { dev, sb, bm }),
            clock,
            was_clean,
            _bitmap: PhantomData,
        })
    }

    /// Whether the previous session unmounted cleanly. Always true for a
    /// freshly formatted filesystem.
    pub fn was_clean(&self) -> bool {
        self.was_clean
    }

    /// Unmount: persist the block map, set the clean flag, flush, and
    /// return the backing device.
    pub fn unmountfs(self) -> Result<Device> {
        let mut st = self.state.into_inner();
        st.bm.persist(&mut st.dev)?;
        st.sb.clean = true;
        write_superblock(&mut st.dev, &st.sb)?;
        st.dev.flush()?;
        Ok(st.dev)
    }

    /// Block address of the root inode.
    pub fn root(&self) -> BlockAddr {
        self.state.with(|st| st.sb.root_inode)
    }

    /// Number of free blocks in the block map.
    pub fn num_free(&self) -> u64 {
        self.state.with(|st| st.bm.num_free())
    }

    /// Size in bytes of the file headed by `iref`.
    pub fn file_size(&self, iref: BlockAddr) -> Result<u64> {
        self.state.with(|st| Ok(dref_inode(&st.dev, iref)?.disk.size))
    }

    /// Allocate and persist a fresh empty inode owned by `uid`:`gid`,
    /// child of `parent`. Returns its address.
    pub fn create_file(&self, parent: BlockAddr, uid: u32, gid: u32) -> Result<BlockAddr> {
        let now = self.clock.now();
        self.state.with(|st| {
            let addr = st.bm.alloc1().ok_or(HalfsError::AllocFailed)?;
            st.bm.persist(&mut st.dev)?;
            let blk = build_empty_inode_enc(&st.dev, addr, parent, uid, gid, now)?;
            st.dev.write_block(&blk)?;
            Ok(addr)
        })
    }

    /// Read up to `n` bytes of the file headed by `iref`, starting at byte
    /// `off`. Reads never run past the file size; a read starting at or
    /// past it yields an empty buffer.
    pub fn read(&self, iref: BlockAddr, off: u64, n: u64) -> Result<Vec<u8>> {
        self.state.with(|st| {
            let size = dref_inode(&st.dev, iref)?.disk.size;
            if off >= size {
                return Ok(Vec::new());
            }
            let len = n.min(size - off);
            stream::read_stream(&st.dev, iref, off, Some(len))
        })
    }

    /// Write `data` at byte `off` of the file headed by `iref`, then
    /// update the head inode's size and modification time. A truncating
    /// write makes `off + data.len()` the new file size; otherwise the
    /// size only ever grows. Zero-length writes change nothing.
    pub fn write(&self, iref: BlockAddr, off: u64, truncating: bool, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let now = self.clock.now();
        self.state.with(|st| {
            stream::write_stream(&mut st.dev, &mut st.bm, iref, off, truncating, data)?;

            // The stream layer may have rewritten the head inode; re-read
            // it before touching its metadata
            let mut inode = dref_inode(&st.dev, iref)?;
            let end = off + data.len() as u64;
            inode.disk.size = if truncating {
                end
            } else {
                inode.disk.size.max(end)
            };
            inode.disk.mtime = now;
            write_carrier(&mut st.dev, &Carrier::Inode(inode))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{NoopLock, StepClock};

    #[path = "../../../fs-tests/utils.rs"]
    mod utils;

    type TestFs = Halfs<ByteBitmap, StepClock, NoopLock<FsState<ByteBitmap>>>;

    static BLOCK_SIZE: u64 = 512;
    static NBLOCKS: u64 = 128;

    fn mkfs(name: &str) -> (std::path::PathBuf, TestFs) {
        let path = utils::disk_prep_path(&("images-fs-".to_string() + name), "img");
        let fs = TestFs::mkfs(&path, BLOCK_SIZE, NBLOCKS, StepClock::starting_at(1)).unwrap();
        (path, fs)
    }

    #[test]
    fn fresh_root_is_empty() {
        let (_path, fs) = mkfs("fresh");
        let root = fs.root();
        assert_eq!(fs.file_size(root).unwrap(), 0);
        assert_eq!(fs.read(root, 0, 100).unwrap(), Vec::<u8>::new());
        utils::disk_destruct(fs.unmountfs().unwrap());
    }

    #[test]
    fn write_updates_size_and_mtime() {
        let (_path, fs) = mkfs("meta");
        let f = fs.create_file(fs.root(), 1000, 100).unwrap();

        fs.write(f, 0, false, b"hello halfs").unwrap();
        assert_eq!(fs.file_size(f).unwrap(), 11);
        assert_eq!(fs.read(f, 0, 64).unwrap(), b"hello halfs".to_vec());

        // An overwrite inside the file does not shrink it, a truncating
        // one does
        fs.write(f, 6, false, b"again").unwrap();
        assert_eq!(fs.file_size(f).unwrap(), 11);
        assert_eq!(fs.read(f, 0, 64).unwrap(), b"hello again".to_vec());
        fs.write(f, 0, true, b"bye").unwrap();
        assert_eq!(fs.file_size(f).unwrap(), 3);
        assert_eq!(fs.read(f, 0, 64).unwrap(), b"bye".to_vec());

        // StepClock ticks once per operation, so mtime moved forward
        let inode = fs.state.with(|st| dref_inode(&st.dev, f).unwrap());
        assert!(inode.disk.mtime > inode.disk.ctime);
        utils::disk_destruct(fs.unmountfs().unwrap());
    }

    #[test]
    fn data_survives_a_remount() {
        let (path, fs) = mkfs("remount");
        let root = fs.root();
        fs.write(root, 0, false, b"persistent bytes").unwrap();
        let dev = fs.unmountfs().unwrap();
        drop(dev);

        let dev = utils::disk_open(&path, BLOCK_SIZE, NBLOCKS);
        let fs = TestFs::mountfs(dev, StepClock::starting_at(50)).unwrap();
        assert!(fs.was_clean());
        assert_eq!(fs.read(fs.root(), 0, 64).unwrap(), b"persistent bytes".to_vec());
        utils::disk_destruct(fs.unmountfs().unwrap());
    }

    #[test]
    fn crash_without_unmount_is_visible() {
        let (path, fs) = mkfs("crash");
        fs.write(fs.root(), 0, false, b"x").unwrap();
        // Dropping the handle without unmounting stands in for a crash:
        // the clean flag on disk is still cleared
        drop(fs);

        let dev = utils::disk_open(&path, BLOCK_SIZE, NBLOCKS);
        let fs = TestFs::mountfs(dev, StepClock::starting_at(50)).unwrap();
        assert!(!fs.was_clean());
        // A proper unmount restores the flag
        let dev = fs.unmountfs().unwrap();
        let fs = TestFs::mountfs(dev, StepClock::starting_at(90)).unwrap();
        assert!(fs.was_clean());
        utils::disk_destruct(fs.unmountfs().unwrap());
    }

    #[test]
    fn foreign_devices_are_rejected() {
        let path = utils::disk_prep_path("images-fs-foreign", "img");
        let dev = utils::disk_setup(&path, BLOCK_SIZE, NBLOCKS);
        // An all-zero device has no superblock
        assert!(matches!(
            TestFs::mountfs(dev, StepClock::starting_at(1)),
            Err(HalfsError::Input(_))
        ));
        let dev = utils::disk_open(&path, BLOCK_SIZE, NBLOCKS);
        utils::disk_destruct(dev);
    }
}
