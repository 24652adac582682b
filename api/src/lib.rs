//! Host-facing support crate for the Halfs storage engine.
//!
//! This crate owns everything the engine consumes from the outside world:
//!
//! 1. The [`controller`] module: a block device emulated on top of a
//!    memory-mapped image file, exposing fixed-size block reads and writes.
//! 2. The [`types`] module: the `Block` byte container the controller trades
//!    in, and the `SuperBlock` record stored at block 0 of every device.
//! 3. The [`error`] module: the device-layer error type, which the engine
//!    propagates verbatim.
//!
//! The storage engine itself (block map, inode chains, stream IO) lives in
//! the `halfs` crate and treats this crate as its hardware boundary.

#![deny(missing_docs)]

pub mod controller;
pub mod error;
pub mod types;
