#![allow(dead_code)]

//General testing utilities shared by the unit and scenario tests
use halfs_api::controller::Device;
use std::fs::{create_dir_all, remove_dir, remove_file};
use std::path::{Path, PathBuf};

//Create the directories leading up to 'img_name', starting from the crate
//root, and remove a stale 'img_name' if an earlier run left one behind.
//Every test passes a unique 'name' so parallel tests get their own images.
pub fn disk_prep_path(name: &str, img_name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push(name);
    path.push(img_name);

    if path.exists() {
        remove_file(&path).unwrap();
    }
    create_dir_all(path.parent().unwrap()).unwrap();

    path
}

//Undo image creation, including removing the parent directory
pub fn disk_unprep_path(path: &Path) {
    remove_file(path).unwrap();
    remove_dir(path.parent().unwrap()).unwrap(); //only removes an empty dir
}

//Create a fresh device
pub fn disk_setup(path: &Path, block_size: u64, nblocks: u64) -> Device {
    Device::new(path, block_size, nblocks).unwrap()
}

//Open an existing device
pub fn disk_open(path: &Path, block_size: u64, nblocks: u64) -> Device {
    Device::load(path, block_size, nblocks).unwrap()
}

//Destruct the given device and remove the directory it lived in
pub fn disk_destruct(dev: Device) {
    let path = dev.device_path().to_owned();
    drop(dev); //release the mapping before touching the file
    disk_unprep_path(&path);
}
