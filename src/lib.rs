//! tierfs - a virtual POSIX-style filesystem over tiered storage.
//!
//! The crate exposes a Node-shaped asynchronous file API over a
//! pluggable [`vfs::Backend`], three query drivers (glob, grep, find)
//! sharing one traversal engine, and a storage engine that packs file
//! contents into 2 MiB pages migrated between a hot row store and a
//! remote object store, with a content-addressable store for immutable
//! blobs.

pub mod cancel;
pub mod cas;
pub mod config;
pub mod consts;
pub mod errno;
pub mod facade;
pub mod find;
pub mod fspath;
pub mod glob;
pub mod grep;
pub mod page;
pub mod pattern;
pub mod store;
pub mod vfs;
pub mod walk;

pub use config::{CasConfig, Encoding, FsConfig, FsOptions, TierConfig};
pub use errno::{ErrnoKind, FsError, FsResult};
pub use facade::FileSystem;
pub use vfs::{Backend, FileHandle, MemoryBackend, Stats, Tier};
