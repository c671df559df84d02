//! The property area lives in one memory-mapped file; this crate is the
//! thin plumbing around `memmap2` that the rest of the workspace builds on.
//!
//! A mapping is only valid while its backing file descriptor stays open,
//! so both wrappers here bundle the `File` and the `Mmap`/`MmapMut`
//! together and let `Drop` unmap before closing — splitting the two apart
//! would be a footgun this module exists to rule out.

#![cfg_attr(test, feature(io_error_more))]

use memmap2::{Mmap, MmapMut};
use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

#[derive(Debug)]
pub struct MmapFileMut {
    file: File,
    mmap: MmapMut,
}

#[derive(Debug)]
pub struct MmapFile {
    file: File,
    mmap: Mmap,
}

fn open_rw_options() -> OpenOptions {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true);
    opts
}

impl MmapFileMut {
    /// Creates `path` sized to `size_bytes` (truncating any prior
    /// contents) and maps the whole thing read-write. This is the path
    /// taken exactly once per area: by whichever process first stands up
    /// the shared region.
    pub fn create_rw<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<Self> {
        let file = open_rw_options().create(true).truncate(true).open(path)?;
        file.set_len(size_bytes)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { file, mmap })
    }

    /// Maps an area file that already exists, for a writer reattaching
    /// after a restart rather than creating from scratch.
    pub fn open_rw<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = open_rw_options().open(path)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { file, mmap })
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl MmapFile {
    /// Opens `path` read-only and maps it, refusing to follow a symlink
    /// there. A symlink at the well-known area path would let an attacker
    /// redirect an unsuspecting reader onto arbitrary file contents, so
    /// the fixed-path attach route always goes through this constructor
    /// rather than `open_ro`.
    #[cfg(unix)]
    pub fn open_ro_no_follow<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NOFOLLOW)
            .open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { file, mmap })
    }

    pub fn open_ro<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { file, mmap })
    }

    /// Maps a descriptor this process already holds, without taking
    /// ownership of it: the fd is duplicated, so the original stays open
    /// (and is the caller's to manage) regardless of when this wrapper's
    /// own `File` gets dropped. Used for the legacy environment-variable
    /// attach fallback, which must leave the inherited fd untouched.
    #[cfg(unix)]
    pub fn from_fd_ro(fd: std::os::unix::io::RawFd) -> io::Result<Self> {
        use std::os::unix::io::FromRawFd;
        let dup_fd = unsafe { libc::dup(fd) };
        if dup_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: dup() just handed back a fresh, valid, open descriptor
        // that nothing else holds a File/Mmap view of yet.
        let file = unsafe { File::from_raw_fd(dup_fd) };
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { file, mmap })
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Metadata of the backing file, for the ownership/mode checks an
    /// attach protocol runs before trusting the mapped contents.
    pub fn metadata(&self) -> io::Result<std::fs::Metadata> {
        self.file.metadata()
    }
}
