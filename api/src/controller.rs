//! A block device emulated on a memory-mapped image file.
//!
//! The [`Device`] is the hardware boundary of Halfs: it knows its block
//! size and block count, and moves whole blocks between the image and the
//! caller. Nothing above this module sees byte offsets into the image.
//!
//! Writes land in the mapped region and become durable on [`Device::flush`]
//! (also invoked when the device is dropped). No file locking is performed
//! on the backing image; concurrent processes mutating the same image are
//! undefined behavior.

use super::error;
use super::error::ApiError;
use super::types::Block;
use memmap::MmapMut;
use std::{
    fs::{remove_file, OpenOptions},
    path::{Path, PathBuf},
};

/// Whether a backing image is expected to already exist.
#[derive(PartialEq, Eq, Copy, Clone)]
enum ImageState {
    /// Creating a fresh image.
    New,
    /// Opening an existing image.
    Load,
}

use self::ImageState::*;

/// A fixed-geometry block device backed by a memory-mapped file.
#[derive(Debug)]
pub struct Device {
    /// Size of each block, in bytes.
    pub block_size: u64,
    /// Total number of blocks on the device.
    pub nblocks: u64,
    /// Path of the backing image file.
    path: PathBuf,
    /// The mapped image contents.
    contents: MmapMut,
}

impl Drop for Device {
    /// Persist outstanding writes before the mapping goes away. Skipped if
    /// the backing file was already removed via `destruct`.
    fn drop(&mut self) {
        if self.path.exists() {
            self.contents.flush().unwrap();
        }
    }
}

impl Device {
    fn open<P: AsRef<Path>>(
        path: P,
        block_size: u64,
        nblocks: u64,
        state: ImageState,
    ) -> error::Result<Device> {
        let path_buf = path.as_ref().to_path_buf();
        let exists = path.as_ref().exists();
        match state {
            Load if !exists => {
                return Err(ApiError::ControllerInput(
                    "tried to load a non-existing image",
                ))
            }
            New if exists => {
                return Err(ApiError::ControllerInput(
                    "tried to create a pre-existing image",
                ))
            }
            _ => {}
        }

        let size = block_size * nblocks;
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path_buf)?;
        if state == Load {
            if f.metadata()?.len() != size {
                return Err(ApiError::ControllerInput(
                    "image size does not match the given geometry",
                ));
            }
        } else {
            // Extends the file to `size`, zero-filled
            f.set_len(size)?;
        }
        let contents = unsafe { memmap::MmapOptions::new().map_mut(&f)? };

        Ok(Device {
            block_size,
            nblocks,
            path: path_buf,
            contents,
        })
    }

    /// Create a *new* device image at `path` with the given geometry.
    /// Every block of the fresh device reads as all zeroes.
    /// Errors if `path` already exists.
    pub fn new<P: AsRef<Path>>(path: P, block_size: u64, nblocks: u64) -> error::Result<Device> {
        Device::open(path, block_size, nblocks, New)
    }

    /// Open an *existing* device image at `path`, checking that its size
    /// matches the given geometry. Errors if `path` does not exist.
    pub fn load<P: AsRef<Path>>(path: P, block_size: u64, nblocks: u64) -> error::Result<Device> {
        Device::open(path, block_size, nblocks, Load)
    }

    /// End the life of this device and delete its backing image.
    /// Panics if removing the file fails.
    pub fn destruct(self) {
        remove_file(&self.path).unwrap();
    }

    /// Total device size in bytes.
    pub fn device_size(&self) -> u64 {
        self.block_size * self.nblocks
    }

    /// Path of the backing image file.
    pub fn device_path(&self) -> &Path {
        &self.path
    }

    /// Read block `index` from the device.
    pub fn read_block(&self, index: u64) -> error::Result<Block> {
        if index >= self.nblocks {
            return Err(ApiError::ControllerInput("read past the end of the device"));
        }
        let start = (index * self.block_size) as usize;
        let end = start + self.block_size as usize;
        Ok(Block::new(index, self.contents[start..end].into()))
    }

    /// Write block `b` to the device at `b.block_no`.
    /// Errors if `b` is not exactly one block long or its index is out of
    /// range.
    pub fn write_block(&mut self, b: &Block) -> error::Result<()> {
        if b.len() != self.block_size {
            return Err(ApiError::ControllerInput(
                "tried to write a non-block-sized buffer",
            ));
        }
        if b.block_no >= self.nblocks {
            return Err(ApiError::ControllerInput(
                "write past the end of the device",
            ));
        }
        let start = (b.block_no * self.block_size) as usize;
        let end = start + self.block_size as usize;
        self.contents[start..end].copy_from_slice(b.contents_as_ref());
        Ok(())
    }

    /// Flush outstanding writes to the backing image. Writes are only
    /// guaranteed durable once this returns.
    pub fn flush(&self) -> error::Result<()> {
        self.contents.flush()?;
        Ok(())
    }
}

// The devices in these tests are tiny (10 blocks of 10 bytes); each test
// uses its own image directory so the suite can run in parallel.
#[cfg(test)]
mod tests {
    use super::Device;
    use crate::types::Block;
    use std::fs::{create_dir_all, remove_dir, remove_file};
    use std::path::PathBuf;

    static BLOCK_SIZE: u64 = 10;
    static NBLOCKS: u64 = 10;

    fn disk_prep_path(name: &str) -> PathBuf {
        let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("images-controller-".to_string() + name);
        path.push("img");
        if path.exists() {
            remove_file(&path).unwrap();
        }
        create_dir_all(path.parent().unwrap()).unwrap();
        path
    }

    fn disk_destruct(dev: Device) {
        let path = dev.device_path().to_owned();
        dev.destruct();
        remove_dir(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn create_device() {
        let path = disk_prep_path("create");
        let mut dev = Device::new(&path, BLOCK_SIZE, NBLOCKS).unwrap();

        // Fresh blocks read as zero
        let br = dev.read_block(3).unwrap();
        assert_eq!(br, Block::new_zero(3, BLOCK_SIZE));

        // Out-of-range and misshapen accesses fail
        assert!(dev.read_block(NBLOCKS).is_err());
        assert!(dev.write_block(&Block::new_zero(NBLOCKS, BLOCK_SIZE)).is_err());
        assert!(dev.write_block(&Block::new_zero(3, BLOCK_SIZE + 1)).is_err());
        assert!(dev.write_block(&Block::new_zero(3, BLOCK_SIZE - 1)).is_err());

        // Read back what we wrote
        let bw = Block::new(3, (0..10).collect());
        dev.write_block(&bw).unwrap();
        assert_eq!(dev.read_block(3).unwrap(), bw);

        disk_destruct(dev);
        assert!(!path.exists());
    }

    #[test]
    fn reload_device() {
        let path = disk_prep_path("reload");
        let mut dev = Device::new(&path, BLOCK_SIZE, NBLOCKS).unwrap();

        let bw1 = Block::new(0, (0..10).collect());
        let bw2 = Block::new(8, (0..10).rev().collect());
        dev.write_block(&bw1).unwrap();
        dev.write_block(&bw2).unwrap();
        drop(dev);

        // Geometry mismatch is rejected on load
        assert!(Device::load(&path, BLOCK_SIZE, NBLOCKS + 1).is_err());

        let dev = Device::load(&path, BLOCK_SIZE, NBLOCKS).unwrap();
        assert_eq!(dev.read_block(0).unwrap(), bw1);
        assert_eq!(dev.read_block(8).unwrap(), bw2);

        disk_destruct(dev);
    }
}
