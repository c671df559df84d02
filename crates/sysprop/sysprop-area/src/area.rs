//! Lifecycle (C5) and the read/write/wait protocols (C2-C4) over the area
//! described in [`crate::layout`].

use crate::error::AreaError;
use crate::layout::{
    AREA_MAGIC, AREA_SIZE, AreaHeader, INFO_REGION_START, MAX_ENTRIES, NAME_MAX_LEN,
    PropertyInfo, VALUE_MAX_LEN, AREA_VERSION, make_serial, serial_counter, serial_dirty,
    serial_value_len, toc_name_len, toc_offset, toc_pack,
};
use crate::waiter::{wait_while_equal, wake_all};
use std::mem::size_of;
use std::path::Path;
use std::sync::atomic::Ordering;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;
#[cfg(unix)]
use std::os::unix::io::RawFd;

/// Keeps whatever owns the mapped bytes alive for as long as the `Area` is.
enum Backing {
    ReadOnly(sysprop_mmap::MmapFile),
    ReadWrite(sysprop_mmap::MmapFileMut),
    /// Always-empty in-process stand-in, used before `attach` succeeds.
    Dummy(Vec<u8>),
}

/// A handle onto a property area, either the one true writer's mapping or
/// a reader's read-only mapping (or the empty dummy area).
///
/// `base` is computed once at construction and never changes; moving an
/// `Area` moves this struct but not the heap/mmap'd bytes it points into,
/// so the pointer stays valid for the `Area`'s lifetime.
pub struct Area {
    _backing: Backing,
    base: *mut u8,
}

impl std::fmt::Debug for Area {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Area").field("base", &self.base).finish()
    }
}

// SAFETY: all cross-process access to the mapped bytes goes through atomics
// (`AtomicU32` loads/stores with explicit ordering) except for the raw byte
// copies in `add`/`update`, which are only sound when this handle is the
// sole writer - a precondition the type cannot enforce and that callers on
// a read-only mapping violate at their own risk (see the module-level docs
// on the intentional fault in that case).
unsafe impl Send for Area {}
unsafe impl Sync for Area {}

/// A reference to a single property's record, valid for the lifetime of
/// the `Area` it was obtained from. Records are never moved or freed.
#[derive(Clone, Copy)]
pub struct PropertyRef<'a>(&'a PropertyInfo);

impl<'a> PropertyRef<'a> {
    pub fn name_bytes(&self) -> &'a [u8] {
        let len = c_str_len(&self.0.name);
        &self.0.name[..len]
    }
}

fn c_str_len(buf: &[u8]) -> usize {
    buf.iter().position(|&b| b == 0).unwrap_or(buf.len())
}

impl Area {
    /// Always-empty stand-in used until [`Area::attach`] succeeds, so that
    /// queries issued before attach safely return "not found" rather than
    /// dereferencing an unmapped area.
    pub fn dummy() -> Area {
        let buf = vec![0u8; size_of::<AreaHeader>()];
        let base = buf.as_ptr() as *mut u8;
        Area {
            _backing: Backing::Dummy(buf),
            base,
        }
    }

    /// Creates a fresh area file at `path`, zeroed and stamped with the
    /// current magic/version. Writer-only, one-shot: calling this again
    /// while readers hold a mapping of the old file is not safe (it
    /// truncates and replaces the file's contents).
    pub fn init_fresh<P: AsRef<Path>>(path: P) -> Result<Area, AreaError> {
        let mut mm = sysprop_mmap::MmapFileMut::create_rw(path, AREA_SIZE as u64)?;
        let base = mm.as_mut_ptr();
        unsafe {
            std::ptr::write_bytes(base, 0, AREA_SIZE);
            let header = &mut *(base as *mut AreaHeader);
            header.magic = AREA_MAGIC;
            header.version = AREA_VERSION;
        }
        tracing::debug!(bytes = AREA_SIZE, "property area initialized");
        Ok(Area {
            _backing: Backing::ReadWrite(mm),
            base,
        })
    }

    /// Re-opens an area this process previously created, for writer-side
    /// mutation after a restart of the owning service (not the first-ever
    /// boot init).
    pub fn open_writer<P: AsRef<Path>>(path: P) -> Result<Area, AreaError> {
        let mut mm = sysprop_mmap::MmapFileMut::open_rw(path)?;
        let base = mm.as_mut_ptr();
        let header = unsafe { &*(base as *const AreaHeader) };
        if header.magic != AREA_MAGIC || header.version != AREA_VERSION {
            return Err(AreaError::BadArea("bad magic/version"));
        }
        Ok(Area {
            _backing: Backing::ReadWrite(mm),
            base,
        })
    }

    /// Attaches a read-only reader to an existing area file.
    ///
    /// Implements §4.5: try the fixed path (refusing symlinks), fall back
    /// to a file descriptor named by `env_fallback_var` only on a
    /// not-found error from the fixed path, reject anything not owned by
    /// uid/gid 0 with group/other write bits set, then validate the
    /// header after mapping.
    #[cfg(unix)]
    pub fn attach<P: AsRef<Path>>(path: P, env_fallback_var: &str) -> Result<Area, AreaError> {
        use std::io::ErrorKind;

        let mm = match sysprop_mmap::MmapFile::open_ro_no_follow(path.as_ref()) {
            Ok(mm) => mm,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Backward-compatible bootstrap: only on ENOENT from the
                // kernel, never on any other error, so an attacker can't
                // induce the fallback by e.g. exhausting file descriptors.
                let fd: RawFd = std::env::var(env_fallback_var)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(AreaError::BadArea("no area file and no fallback fd"))?;
                sysprop_mmap::MmapFile::from_fd_ro(fd)?
            }
            Err(e) => return Err(AreaError::Io(e)),
        };

        let meta = mm.metadata()?;
        if meta.uid() != 0 || meta.gid() != 0 || (meta.mode() & 0o022) != 0 {
            return Err(AreaError::BadArea("area file ownership/mode rejected"));
        }

        let base = mm.as_ptr() as *mut u8;
        let header = unsafe { &*(base as *const AreaHeader) };
        if header.magic != AREA_MAGIC || header.version != AREA_VERSION {
            return Err(AreaError::BadArea("bad magic/version"));
        }

        tracing::debug!(path = %path.as_ref().display(), "attached to property area");
        Ok(Area {
            _backing: Backing::ReadOnly(mm),
            base,
        })
    }

    /// Like [`Area::attach`] but skips the uid/gid/mode check on the area
    /// file. Only useful for tests that can't arrange for fixture files to
    /// be owned by uid/gid 0; production callers must use `attach`.
    #[cfg(any(test, feature = "test-support"))]
    #[cfg(unix)]
    pub fn attach_unchecked<P: AsRef<Path>>(path: P) -> Result<Area, AreaError> {
        let mm = sysprop_mmap::MmapFile::open_ro_no_follow(path.as_ref())?;
        let base = mm.as_ptr() as *mut u8;
        let header = unsafe { &*(base as *const AreaHeader) };
        if header.magic != AREA_MAGIC || header.version != AREA_VERSION {
            return Err(AreaError::BadArea("bad magic/version"));
        }
        Ok(Area {
            _backing: Backing::ReadOnly(mm),
            base,
        })
    }

    #[inline(always)]
    fn header(&self) -> &AreaHeader {
        // SAFETY: base always points at a valid AreaHeader for the
        // lifetime of this Area (init_fresh/open_writer/attach/dummy all
        // establish this before returning).
        unsafe { &*(self.base as *const AreaHeader) }
    }

    /// Resolves a TOC byte offset into a record reference, rejecting
    /// offsets that don't land on a valid, aligned `PropertyInfo` slot.
    /// Necessary because the TOC of an attached area is not otherwise
    /// trusted (see module docs on untrusted offsets).
    fn info_at_offset(&self, offset: u32) -> Option<&PropertyInfo> {
        let offset = offset as usize;
        let max_offset = AREA_SIZE - size_of::<PropertyInfo>();
        if offset < INFO_REGION_START || offset > max_offset || offset % size_of::<u32>() != 0 {
            return None;
        }
        Some(unsafe { &*(self.base.add(offset) as *const PropertyInfo) })
    }

    // --- C2: reader protocol ------------------------------------------

    pub fn find(&self, name: &str) -> Option<PropertyRef<'_>> {
        let len = name.len();
        if len < 1 || len >= NAME_MAX_LEN {
            return None;
        }
        let header = self.header();
        let count = header.count.load(Ordering::Acquire) as usize;
        for i in 0..count {
            let entry = header.toc[i].load(Ordering::Acquire);
            if toc_name_len(entry) as usize != len {
                continue;
            }
            let Some(info) = self.info_at_offset(toc_offset(entry)) else {
                continue;
            };
            if &info.name[..len] == name.as_bytes() {
                return Some(PropertyRef(info));
            }
        }
        None
    }

    pub fn find_nth(&self, i: usize) -> Option<PropertyRef<'_>> {
        let header = self.header();
        let count = header.count.load(Ordering::Acquire) as usize;
        if i >= count {
            return None;
        }
        let entry = header.toc[i].load(Ordering::Acquire);
        self.info_at_offset(toc_offset(entry)).map(PropertyRef)
    }

    pub fn foreach<F: FnMut(PropertyRef<'_>)>(&self, mut callback: F) {
        let header = self.header();
        let count = header.count.load(Ordering::Acquire) as usize;
        for i in 0..count {
            let entry = header.toc[i].load(Ordering::Acquire);
            if let Some(info) = self.info_at_offset(toc_offset(entry)) {
                callback(PropertyRef(info));
            }
        }
    }

    /// Seqlock read: copies the value (and optionally the name) into the
    /// caller's buffers, retrying if a concurrent write is observed.
    /// Returns the value length (excluding the terminator).
    pub fn read(&self, rec: PropertyRef<'_>, mut out_name: Option<&mut [u8]>, out_value: &mut [u8]) -> usize {
        let info = rec.0;
        loop {
            let mut serial = info.serial.load(Ordering::Acquire);
            while serial_dirty(serial) {
                serial = wait_while_equal(&info.serial, serial);
            }
            let len = serial_value_len(serial) as usize;
            let n = len + 1;
            out_value[..n].copy_from_slice(&info.value[..n]);

            let resample = info.serial.load(Ordering::Acquire);
            if resample == serial {
                if let Some(name_buf) = out_name.as_deref_mut() {
                    let nlen = c_str_len(&info.name) + 1;
                    name_buf[..nlen].copy_from_slice(&info.name[..nlen]);
                }
                return len;
            }
            // torn read: a write happened mid-copy, retry from the top
        }
    }

    pub fn get(&self, name: &str, out_value: &mut [u8]) -> usize {
        match self.find(name) {
            Some(rec) => self.read(rec, None, out_value),
            None => {
                out_value[0] = 0;
                0
            }
        }
    }

    pub fn serial_of(&self, rec: PropertyRef<'_>) -> u32 {
        rec.0.serial.load(Ordering::Acquire)
    }

    pub fn current_serial(&self) -> u32 {
        self.header().serial.load(Ordering::Acquire)
    }

    // --- C4: waiter protocol --------------------------------------------

    pub fn wait(&self, rec: PropertyRef<'_>) {
        let info = rec.0;
        let serial = info.serial.load(Ordering::Acquire);
        wait_while_equal(&info.serial, serial);
    }

    pub fn wait_any(&self, prev_serial: u32) -> u32 {
        wait_while_equal(&self.header().serial, prev_serial)
    }

    // --- C3: writer protocol (sole-writer discipline enforced externally) --

    pub fn add(&self, name: &str, value: &str) -> Result<(), AreaError> {
        let name_len = name.len();
        let value_len = value.len();
        if name_len < 1 || name_len >= NAME_MAX_LEN || value_len >= VALUE_MAX_LEN {
            return Err(AreaError::Invalid);
        }

        let header = self.header();
        let count = header.count.load(Ordering::Acquire) as usize;
        if count == MAX_ENTRIES {
            return Err(AreaError::Full(MAX_ENTRIES));
        }

        let offset = INFO_REGION_START + count * size_of::<PropertyInfo>();
        // SAFETY: sole-writer discipline (enforced externally, see crate
        // docs); `offset` was just computed from this area's own layout.
        let info = unsafe { &mut *(self.base.add(offset) as *mut PropertyInfo) };
        info.name[..name_len].copy_from_slice(name.as_bytes());
        info.name[name_len] = 0;
        info.value[..value_len].copy_from_slice(value.as_bytes());
        info.value[value_len] = 0;
        info.serial.store(make_serial(value_len as u32, 0, false), Ordering::Release);

        header.toc[count].store(toc_pack(name_len as u32, offset as u32), Ordering::Release);
        header.count.store((count + 1) as u32, Ordering::Release);
        header.serial.fetch_add(1, Ordering::Release);
        wake_all(&header.serial);

        tracing::debug!(name, value_len, slot = count, "property added");
        Ok(())
    }

    pub fn update(&self, rec: Option<PropertyRef<'_>>, value: &str) -> Result<(), AreaError> {
        let value_len = value.len();
        if value_len >= VALUE_MAX_LEN {
            return Err(AreaError::Invalid);
        }
        let rec = rec.ok_or(AreaError::Invalid)?;

        // SAFETY: sole-writer discipline (enforced externally); `rec`
        // points into this area's info region for its whole lifetime.
        // Recomputed from `self.base` (a `*mut u8`) rather than cast out of
        // `rec`'s shared reference, so this never casts `&T` to `&mut T`.
        let offset = rec.0 as *const PropertyInfo as usize - self.base as usize;
        let info = unsafe { &mut *(self.base.add(offset) as *mut PropertyInfo) };
        let prev = info.serial.load(Ordering::Relaxed);
        info.serial.store(prev | 1, Ordering::Release);
        info.value[..value_len].copy_from_slice(value.as_bytes());
        info.value[value_len] = 0;

        let next_counter = serial_counter(prev).wrapping_add(1);
        info.serial.store(make_serial(value_len as u32, next_counter, false), Ordering::Release);
        wake_all(&info.serial);

        let header = self.header();
        header.serial.fetch_add(1, Ordering::Release);
        wake_all(&header.serial);

        tracing::debug!(value_len, "property updated");
        Ok(())
    }
}
