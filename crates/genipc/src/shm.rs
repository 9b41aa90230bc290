use std::ffi::CString;
use std::marker::PhantomData;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{IpcError, Result};
use crate::plain::Plain;

/// Permission bits for newly created segments (read/write for everyone).
pub const DEFAULT_SEGMENT_MODE: u32 = 0o666;

/// Identity of a System V shared memory segment.
///
/// The pair is hashed with `ftok` into the key every cooperating process
/// derives independently. The path must exist; only the low 8 bits of the id
/// take part in the key, so ids are limited to `1..=255`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentId {
    path: PathBuf,
    id: u32,
}

impl SegmentId {
    pub fn new(path: impl Into<PathBuf>, id: u32) -> Self {
        Self {
            path: path.into(),
            id,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Derive the System V key for this identity.
    pub fn key(&self) -> Result<libc::key_t> {
        if !(1..=255).contains(&self.id) {
            return Err(IpcError::InvalidSegmentId { id: self.id });
        }

        let invalid_path = |source: std::io::Error| IpcError::InvalidSegmentPath {
            path: self.path.clone(),
            source,
        };

        std::fs::metadata(&self.path).map_err(invalid_path)?;
        let c_path = CString::new(self.path.as_os_str().as_bytes()).map_err(|_| {
            invalid_path(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path contains an interior NUL byte",
            ))
        })?;

        // SAFETY: `c_path` is a valid NUL-terminated string for the call's duration.
        let key = unsafe { libc::ftok(c_path.as_ptr(), self.id as libc::c_int) };
        if key == -1 {
            return Err(invalid_path(std::io::Error::last_os_error()));
        }
        Ok(key)
    }
}

/// Owns the OS segment; requests removal when the last owner is dropped.
struct SegmentHandle {
    key: libc::key_t,
    shmid: libc::c_int,
    size: usize,
}

impl SegmentHandle {
    /// Number of attachments across all processes, from `IPC_STAT`.
    fn attach_count(&self) -> std::io::Result<u64> {
        // SAFETY: all-zero is a valid `shmid_ds`.
        let mut stat: libc::shmid_ds = unsafe { std::mem::zeroed() };
        // SAFETY: `stat` is a writable `shmid_ds` for `IPC_STAT` to fill.
        let rc = unsafe { libc::shmctl(self.shmid, libc::IPC_STAT, &mut stat) };
        if rc == -1 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(stat.shm_nattch as u64)
    }
}

impl Drop for SegmentHandle {
    fn drop(&mut self) {
        // Mappings hold this handle alive, so every attachment left is owned by
        // another handle or another process. The last one out removes.
        match self.attach_count() {
            Ok(0) => {}
            Ok(attached) => {
                debug!(
                    shmid = self.shmid,
                    attached,
                    "segment still attached; removal deferred"
                );
                return;
            }
            Err(err) => {
                debug!(shmid = self.shmid, error = %err, "segment already removed");
                return;
            }
        }

        // SAFETY: `IPC_RMID` ignores the buffer argument.
        let rc = unsafe { libc::shmctl(self.shmid, libc::IPC_RMID, std::ptr::null_mut()) };
        if rc == 0 {
            debug!(shmid = self.shmid, key = self.key, "requested segment removal");
            return;
        }

        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINVAL) | Some(libc::EIDRM) => {
                debug!(shmid = self.shmid, "segment already removed");
            }
            _ => warn!(shmid = self.shmid, error = %err, "failed to remove segment"),
        }
    }
}

/// A System V shared memory segment.
///
/// Creation looks the segment up by key and creates it when absent. Each
/// [`attach`](Self::attach) produces an independent [`Mapping`]; mappings of
/// the same identity in any process see the same bytes. The segment handle and
/// every mapping share ownership of the OS object. When the last of them is
/// dropped, removal is requested only if no other handle or process still has
/// the segment attached. Segments that are never released (for
/// example after a crash) outlive the process and must be removed with
/// `ipcrm -m <shmid>`.
///
/// No synchronization is provided for the mapped memory.
pub struct SharedMemorySegment {
    handle: Arc<SegmentHandle>,
}

impl SharedMemorySegment {
    /// Create (or look up) the segment for `id` with [`DEFAULT_SEGMENT_MODE`].
    pub fn create(id: &SegmentId, size: usize) -> Result<Self> {
        Self::create_with_mode(id, size, DEFAULT_SEGMENT_MODE)
    }

    /// Create (or look up) the segment for `id` with explicit permission bits.
    pub fn create_with_mode(id: &SegmentId, size: usize, mode: u32) -> Result<Self> {
        let key = id.key()?;
        let flags = libc::IPC_CREAT | (mode & 0o777) as libc::c_int;

        // SAFETY: plain syscall; no pointers are passed.
        let shmid = unsafe { libc::shmget(key, size, flags) };
        if shmid == -1 {
            return Err(IpcError::SegmentCreation {
                key,
                size,
                source: std::io::Error::last_os_error(),
            });
        }

        debug!(
            path = ?id.path(),
            id = id.id(),
            key,
            shmid,
            size,
            "opened shared memory segment"
        );

        Ok(Self {
            handle: Arc::new(SegmentHandle { key, shmid, size }),
        })
    }

    /// Map the segment and view its base address as `T`.
    ///
    /// `T` must fit in the requested size. The mapping detaches on drop.
    pub fn attach<T: Plain>(&self) -> Result<Mapping<T>> {
        let needed = std::mem::size_of::<T>();
        if needed > self.handle.size {
            return Err(IpcError::SegmentTooSmall {
                needed,
                size: self.handle.size,
            });
        }

        // SAFETY: a null address lets the kernel pick a suitably aligned location.
        let addr = unsafe { libc::shmat(self.handle.shmid, std::ptr::null(), 0) };
        if addr as isize == -1 {
            return Err(IpcError::Attach {
                shmid: self.handle.shmid,
                source: std::io::Error::last_os_error(),
            });
        }
        let ptr = NonNull::new(addr.cast::<T>()).ok_or_else(|| IpcError::Attach {
            shmid: self.handle.shmid,
            source: std::io::Error::other("shmat returned a null address"),
        })?;

        debug!(shmid = self.handle.shmid, ?addr, "attached segment");

        Ok(Mapping {
            ptr,
            len: self.handle.size,
            segment: Arc::clone(&self.handle),
            _marker: PhantomData,
        })
    }

    /// System V key derived from the identity.
    pub fn key(&self) -> libc::key_t {
        self.handle.key
    }

    /// OS segment id, as listed by `ipcs -m`.
    pub fn shmid(&self) -> libc::c_int {
        self.handle.shmid
    }

    /// Size requested at creation.
    pub fn size(&self) -> usize {
        self.handle.size
    }
}

impl std::fmt::Debug for SharedMemorySegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemorySegment")
            .field("key", &self.handle.key)
            .field("shmid", &self.handle.shmid)
            .field("size", &self.handle.size)
            .finish()
    }
}

/// One attachment of a segment into this process.
///
/// Access goes through raw pointers and volatile copies because other
/// processes may change the memory at any time. Coordinating readers and
/// writers is up to the caller.
pub struct Mapping<T: Plain> {
    ptr: NonNull<T>,
    len: usize,
    segment: Arc<SegmentHandle>,
    _marker: PhantomData<*mut T>,
}

impl<T: Plain> Mapping<T> {
    /// Base address of the mapping.
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Number of usable bytes (the size requested at creation).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Volatile read of the value at the base address.
    pub fn read(&self) -> T {
        // SAFETY: the mapping is live, aligned by `shmat`, and at least
        // `size_of::<T>()` bytes long; `T: Plain` accepts any bit pattern.
        unsafe { std::ptr::read_volatile(self.ptr.as_ptr()) }
    }

    /// Volatile write of `value` at the base address.
    pub fn write(&self, value: T) {
        // SAFETY: as for `read`; no Rust reference to the mapped memory exists.
        unsafe { std::ptr::write_volatile(self.ptr.as_ptr(), value) }
    }

    /// Copy bytes starting at `offset` into `dst`.
    pub fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.check_range(offset, dst.len())?;
        // SAFETY: the range was checked against the mapped length and `dst`
        // cannot overlap the shared mapping it was not derived from.
        unsafe {
            let src = self.ptr.as_ptr().cast::<u8>().add(offset);
            std::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    /// Copy `src` into the mapping starting at `offset`.
    pub fn write_bytes(&self, offset: usize, src: &[u8]) -> Result<()> {
        self.check_range(offset, src.len())?;
        // SAFETY: as for `read_bytes`.
        unsafe {
            let dst = self.ptr.as_ptr().cast::<u8>().add(offset);
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
        }
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(IpcError::OutOfBounds {
                offset,
                end: offset.saturating_add(len),
                size: self.len,
            }),
        }
    }
}

impl<T: Plain> Drop for Mapping<T> {
    fn drop(&mut self) {
        // SAFETY: `ptr` is the address returned by `shmat` and is detached once.
        let rc = unsafe { libc::shmdt(self.ptr.as_ptr().cast::<libc::c_void>()) };
        if rc == -1 {
            warn!(
                shmid = self.segment.shmid,
                error = %std::io::Error::last_os_error(),
                "failed to detach segment"
            );
        } else {
            debug!(shmid = self.segment.shmid, "detached segment");
        }
    }
}

impl<T: Plain> std::fmt::Debug for Mapping<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapping")
            .field("shmid", &self.segment.shmid)
            .field("addr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: u32) -> (tempfile::NamedTempFile, SegmentId) {
        let file = tempfile::NamedTempFile::new().expect("temp file should be creatable");
        let seg = SegmentId::new(file.path(), id);
        (file, seg)
    }

    #[test]
    fn key_is_deterministic() {
        let (_file, seg) = identity(7);
        let again = SegmentId::new(seg.path(), 7);
        assert_eq!(seg.key().unwrap(), again.key().unwrap());
    }

    #[test]
    fn key_rejects_out_of_range_ids() {
        let (_file, zero) = identity(0);
        assert!(matches!(
            zero.key(),
            Err(IpcError::InvalidSegmentId { id: 0 })
        ));

        let wide = SegmentId::new(zero.path(), 256);
        assert!(matches!(
            wide.key(),
            Err(IpcError::InvalidSegmentId { id: 256 })
        ));
    }

    #[test]
    fn key_requires_existing_path() {
        let seg = SegmentId::new("/nonexistent/genipc/segment", 1);
        assert!(matches!(seg.key(), Err(IpcError::InvalidSegmentPath { .. })));
        assert!(matches!(
            SharedMemorySegment::create(&seg, 64),
            Err(IpcError::InvalidSegmentPath { .. })
        ));
    }

    #[test]
    fn zero_size_creation_fails() {
        let (_file, seg) = identity(3);
        assert!(matches!(
            SharedMemorySegment::create(&seg, 0),
            Err(IpcError::SegmentCreation { size: 0, .. })
        ));
    }

    #[test]
    fn writes_are_visible_through_second_mapping() {
        let (_file, seg) = identity(7);
        let segment = SharedMemorySegment::create(&seg, 64).unwrap();

        let first = segment.attach::<u32>().unwrap();
        let second = segment.attach::<u32>().unwrap();
        assert_ne!(first.as_ptr(), second.as_ptr());

        first.write(0xDEAD_BEEF);
        assert_eq!(second.read(), 0xDEAD_BEEF);
    }

    #[test]
    fn mapping_exposes_full_requested_size() {
        let (_file, seg) = identity(9);
        let segment = SharedMemorySegment::create(&seg, 128).unwrap();
        let mapping = segment.attach::<u8>().unwrap();
        assert_eq!(mapping.len(), 128);

        mapping.write_bytes(120, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let mut tail = [0u8; 8];
        mapping.read_bytes(120, &mut tail).unwrap();
        assert_eq!(tail, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn byte_access_is_bounds_checked() {
        let (_file, seg) = identity(11);
        let segment = SharedMemorySegment::create(&seg, 64).unwrap();
        let mapping = segment.attach::<u8>().unwrap();

        let err = mapping.write_bytes(60, &[0; 8]).unwrap_err();
        assert!(matches!(
            err,
            IpcError::OutOfBounds {
                offset: 60,
                end: 68,
                size: 64
            }
        ));
        let mut buf = [0u8; 1];
        assert!(mapping.read_bytes(usize::MAX, &mut buf).is_err());
    }

    #[test]
    fn attach_rejects_oversized_type() {
        let (_file, seg) = identity(13);
        let segment = SharedMemorySegment::create(&seg, 16).unwrap();
        assert!(matches!(
            segment.attach::<[u64; 4]>(),
            Err(IpcError::SegmentTooSmall {
                needed: 32,
                size: 16
            })
        ));
    }

    #[test]
    fn dropping_unattached_handle_keeps_attached_segment() {
        let (_file, seg) = identity(7);
        let owner = SharedMemorySegment::create(&seg, 64).unwrap();
        let mapping = owner.attach::<u32>().unwrap();
        mapping.write(0xCAFE);

        let bystander = SharedMemorySegment::create(&seg, 64).unwrap();
        assert_eq!(bystander.shmid(), owner.shmid());
        drop(bystander);

        let third = SharedMemorySegment::create(&seg, 64).unwrap();
        assert_eq!(third.shmid(), owner.shmid());
        let view = third.attach::<u32>().unwrap();
        assert_eq!(view.read(), 0xCAFE);
    }

    #[test]
    fn last_release_removes_segment() {
        let (_file, seg) = identity(17);
        let segment = SharedMemorySegment::create(&seg, 64).unwrap();
        let shmid = segment.shmid();
        segment.attach::<u32>().unwrap().write(5);
        drop(segment);

        // SAFETY: all-zero is a valid `shmid_ds`.
        let mut stat: libc::shmid_ds = unsafe { std::mem::zeroed() };
        // SAFETY: `stat` is a writable `shmid_ds`.
        let rc = unsafe { libc::shmctl(shmid, libc::IPC_STAT, &mut stat) };
        assert_eq!(rc, -1, "segment should no longer exist");
    }

    #[test]
    fn mapping_outlives_segment_handle() {
        let (_file, seg) = identity(15);
        let segment = SharedMemorySegment::create(&seg, 64).unwrap();
        let mapping = segment.attach::<u64>().unwrap();
        drop(segment);

        mapping.write(42);
        assert_eq!(mapping.read(), 42);
    }
}
