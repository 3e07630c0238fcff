use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::TEMP_FILE_PREFIX;

/// What the OS granted when a file was opened for uncached I/O
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBypass {
    /// The page cache is bypassed for this descriptor
    Direct,
    /// Buffered descriptor; cached pages are dropped with an advisory call
    Advisory,
    /// Buffered descriptor, no way to keep the cache out of the numbers
    Unsupported,
}

/// Low-level file operations used by the benchmark engine.
///
/// The engine only talks to the filesystem through this trait so the
/// platform adapter (or a test double) can be swapped in.
pub trait DiskIO: Send + Sync {
    /// Create `path` for exclusive writing, bypassing the cache where
    /// supported. Fails with `AlreadyExists` if the file is already there.
    fn open_uncached_write(&self, path: &Path) -> io::Result<Box<dyn UncachedFile>>;

    /// Open `path` read-only, bypassing the cache where supported
    fn open_uncached_read(&self, path: &Path) -> io::Result<Box<dyn UncachedFile>>;

    /// Delete a file
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// An open benchmark file. Dropping it closes the descriptor.
pub trait UncachedFile: Send {
    /// Write the whole buffer
    fn write_chunk(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Fill `buf` from the current position. Returns fewer bytes than
    /// `buf.len()` only at end of file.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Force written data to stable storage
    fn sync_all(&mut self) -> io::Result<()>;

    fn cache_bypass(&self) -> CacheBypass;
}

/// `std::fs::File` plus the cache mode it was opened with
pub struct PlatformFile {
    file: File,
    bypass: CacheBypass,
}

impl PlatformFile {
    pub fn new(file: File, bypass: CacheBypass) -> Self {
        Self { file, bypass }
    }
}

impl PlatformFile {
    /// Some filesystems accept direct I/O at open time and only reject the
    /// transfers. Returns true if the descriptor was switched to buffered
    /// mode and the call should be retried.
    fn fall_back_to_buffered(&mut self, err: &io::Error) -> bool {
        if self.bypass != CacheBypass::Direct || !leave_direct_mode(&self.file, err) {
            return false;
        }
        warn!(error = %err, "direct I/O rejected, continuing with buffered I/O");
        self.bypass = CacheBypass::Advisory;
        true
    }

    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl UncachedFile for PlatformFile {
    fn write_chunk(&mut self, buf: &[u8]) -> io::Result<()> {
        let start = self.file.stream_position()?;
        match self.file.write_all(buf) {
            Err(e) if self.fall_back_to_buffered(&e) => {
                self.file.seek(SeekFrom::Start(start))?;
                self.file.write_all(buf)
            }
            result => result,
        }
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = self.file.stream_position()?;
        match self.fill(buf) {
            Err(e) if self.fall_back_to_buffered(&e) => {
                self.file.seek(SeekFrom::Start(start))?;
                self.fill(buf)
            }
            result => result,
        }
    }

    fn sync_all(&mut self) -> io::Result<()> {
        self.file.sync_all()?;
        if self.bypass == CacheBypass::Advisory {
            drop_cached_pages(&self.file);
        }
        Ok(())
    }

    fn cache_bypass(&self) -> CacheBypass {
        self.bypass
    }
}

/// Platform-specific disk I/O implementation
#[derive(Debug, Clone, Default)]
pub struct PlatformDiskIO;

impl PlatformDiskIO {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod platform {
    use super::*;
    use std::os::unix::fs::OpenOptionsExt;

    // Opened buffered; O_DIRECT is switched on afterwards with fcntl.
    // tmpfs and some FUSE mounts refuse it.
    fn enable_direct_io(file: File, path: &Path) -> PlatformFile {
        match set_direct_flag(&file, true) {
            Ok(()) => PlatformFile::new(file, CacheBypass::Direct),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "O_DIRECT not supported here, falling back to buffered I/O"
                );
                PlatformFile::new(file, CacheBypass::Advisory)
            }
        }
    }

    impl DiskIO for PlatformDiskIO {
        fn open_uncached_write(&self, path: &Path) -> io::Result<Box<dyn UncachedFile>> {
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(path)?;
            Ok(Box::new(enable_direct_io(file, path)))
        }

        fn open_uncached_read(&self, path: &Path) -> io::Result<Box<dyn UncachedFile>> {
            let file = OpenOptions::new().read(true).open(path)?;
            let file = enable_direct_io(file, path);
            if file.bypass == CacheBypass::Advisory {
                drop_cached_pages(&file.file);
            }
            Ok(Box::new(file))
        }
    }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
mod platform {
    use super::*;
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    fn disable_cache(file: File, path: &Path) -> PlatformFile {
        let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_NOCACHE, 1) };
        if rc == -1 {
            warn!(
                path = %path.display(),
                error = %io::Error::last_os_error(),
                "could not disable caching, continuing with buffered I/O"
            );
            PlatformFile::new(file, CacheBypass::Unsupported)
        } else {
            PlatformFile::new(file, CacheBypass::Direct)
        }
    }

    impl DiskIO for PlatformDiskIO {
        fn open_uncached_write(&self, path: &Path) -> io::Result<Box<dyn UncachedFile>> {
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(path)?;
            Ok(Box::new(disable_cache(file, path)))
        }

        fn open_uncached_read(&self, path: &Path) -> io::Result<Box<dyn UncachedFile>> {
            let file = OpenOptions::new().read(true).open(path)?;
            Ok(Box::new(disable_cache(file, path)))
        }
    }
}

#[cfg(all(
    unix,
    not(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "ios"))
))]
mod platform {
    use super::*;

    impl DiskIO for PlatformDiskIO {
        fn open_uncached_write(&self, path: &Path) -> io::Result<Box<dyn UncachedFile>> {
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)?;
            debug!(path = %path.display(), "no cache bypass on this platform");
            Ok(Box::new(PlatformFile::new(file, CacheBypass::Unsupported)))
        }

        fn open_uncached_read(&self, path: &Path) -> io::Result<Box<dyn UncachedFile>> {
            let file = OpenOptions::new().read(true).open(path)?;
            Ok(Box::new(PlatformFile::new(file, CacheBypass::Unsupported)))
        }
    }
}

#[cfg(windows)]
mod platform {
    use super::*;
    use std::os::windows::fs::OpenOptionsExt;

    const FILE_FLAG_WRITE_THROUGH: u32 = 0x80000000;
    const FILE_FLAG_NO_BUFFERING: u32 = 0x20000000;
    const ERROR_INVALID_PARAMETER: i32 = 87;

    fn open_with_fallback(path: &Path, options: OpenOptions, flags: u32) -> io::Result<PlatformFile> {
        let mut direct = options.clone();
        match direct.custom_flags(flags).open(path) {
            Ok(file) => Ok(PlatformFile::new(file, CacheBypass::Direct)),
            Err(err) if err.raw_os_error() == Some(ERROR_INVALID_PARAMETER) => {
                warn!(
                    path = %path.display(),
                    "unbuffered I/O rejected, falling back to buffered I/O"
                );
                let file = options.open(path)?;
                Ok(PlatformFile::new(file, CacheBypass::Unsupported))
            }
            Err(err) => Err(err),
        }
    }

    impl DiskIO for PlatformDiskIO {
        fn open_uncached_write(&self, path: &Path) -> io::Result<Box<dyn UncachedFile>> {
            let mut options = OpenOptions::new();
            options.write(true).create_new(true).share_mode(0);
            let file = open_with_fallback(
                path,
                options,
                FILE_FLAG_WRITE_THROUGH | FILE_FLAG_NO_BUFFERING,
            )?;
            Ok(Box::new(file))
        }

        fn open_uncached_read(&self, path: &Path) -> io::Result<Box<dyn UncachedFile>> {
            let mut options = OpenOptions::new();
            options.read(true).share_mode(0);
            Ok(Box::new(open_with_fallback(path, options, FILE_FLAG_NO_BUFFERING)?))
        }
    }
}

/// Toggle `O_DIRECT` on an open descriptor
#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_direct_flag(file: &File, enabled: bool) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    let flags = if enabled {
        flags | libc::O_DIRECT
    } else {
        flags & !libc::O_DIRECT
    };
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// EINVAL from a transfer on a direct descriptor means the device or
/// filesystem rejected the alignment; clear `O_DIRECT` so it can be retried
#[cfg(any(target_os = "linux", target_os = "android"))]
fn leave_direct_mode(file: &File, err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINVAL) && set_direct_flag(file, false).is_ok()
}

// Unbuffered Windows handles and F_NOCACHE cannot be turned off in place.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn leave_direct_mode(_file: &File, _err: &io::Error) -> bool {
    false
}

/// Ask the kernel to evict clean cached pages for `file` (best effort)
#[cfg(any(target_os = "linux", target_os = "android"))]
fn drop_cached_pages(file: &File) {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_DONTNEED) };
    if rc != 0 {
        warn!(error = %io::Error::from_raw_os_error(rc), "posix_fadvise(DONTNEED) failed");
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn drop_cached_pages(_file: &File) {}

/// Create a new platform-specific disk I/O instance
pub fn create_disk_io() -> Arc<dyn DiskIO> {
    Arc::new(PlatformDiskIO::new())
}

/// Unique hidden file name for one run
pub fn temp_file_name() -> String {
    format!("{}{:032x}", TEMP_FILE_PREFIX, rand::random::<u128>())
}

/// Benchmark file path that is deleted when the guard goes away.
///
/// Removal goes through the same [`DiskIO`] that created the file. A
/// failed removal is logged and otherwise ignored so it never masks the
/// run's own result.
pub struct TempFile {
    path: PathBuf,
    disk_io: Arc<dyn DiskIO>,
    cleanup_on_drop: bool,
}

impl TempFile {
    pub fn new(path: PathBuf, disk_io: Arc<dyn DiskIO>) -> Self {
        Self {
            path,
            disk_io,
            cleanup_on_drop: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now. Returns whether the file is known to be gone.
    pub fn cleanup(&mut self) -> bool {
        self.cleanup_on_drop = false;
        match self.disk_io.remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "removed test file");
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to remove test file");
                false
            }
        }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.cleanup_on_drop {
            self.cleanup();
        }
    }
}
