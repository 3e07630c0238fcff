//! I/O operations module
//!
//! Platform-specific uncached file access behind the `DiskIO` trait,
//! plus the aligned chunk buffer used for direct I/O.

pub mod buffer;
pub mod disk;

pub use buffer::AlignedBuffer;
pub use disk::{
    create_disk_io, temp_file_name, CacheBypass, DiskIO, PlatformDiskIO, PlatformFile, TempFile,
    UncachedFile,
};
