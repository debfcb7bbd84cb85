use std::ffi::CString;
use std::io;
use std::ptr;

/// A named shared-memory segment mapped into this address space.
///
/// This is the remote-address-space primitive the process engine uses
/// to reach client memory: the owner creates the segment
/// ([`create`]), peers map it by name ([`open`]), and the owner
/// unlinks the name on teardown. The mapping is removed when the
/// `Segment` drops.
///
/// [`create`]: Segment::create
/// [`open`]: Segment::open
#[derive(Debug)]
pub(crate) struct Segment {
    name: CString,
    ptr: *mut libc::c_void,
    len: usize,
    owner: bool,
}

// The mapping is plain memory; concurrent access discipline is the
// caller's contract, as with any shared-memory pad.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Creates (or truncates) a named segment of `len` bytes and maps
    /// it read-write.
    pub(crate) fn create(name: &str, len: usize) -> io::Result<Segment> {
        Segment::new(name, len, true)
    }

    /// Maps an existing named segment read-write.
    pub(crate) fn open(name: &str, len: usize) -> io::Result<Segment> {
        Segment::new(name, len, false)
    }

    fn new(name: &str, len: usize, owner: bool) -> io::Result<Segment> {
        let cname = CString::new(name).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        let mut oflag = libc::O_RDWR;
        if owner {
            oflag |= libc::O_CREAT;
        }
        let fd = syscall!(shm_open(cname.as_ptr(), oflag, 0o600 as libc::mode_t))?;
        if owner {
            if let Err(err) = syscall!(ftruncate(fd, len as libc::off_t)) {
                let _ = syscall!(close(fd));
                let _ = syscall!(shm_unlink(cname.as_ptr()));
                return Err(err);
            }
        }
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        // The mapping keeps its own reference to the object.
        let _ = syscall!(close(fd));
        if ptr == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            if owner {
                let _ = syscall!(shm_unlink(cname.as_ptr()));
            }
            return Err(err);
        }
        Ok(Segment {
            name: cname,
            ptr,
            len,
            owner,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Base address of the mapping.
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr as *mut u8
    }

    /// A typed pointer `offset` bytes into the mapping.
    ///
    /// The caller must ensure `offset + size_of::<T>() <= len` and that
    /// `T` tolerates concurrent access from other processes.
    pub(crate) unsafe fn offset_as<T>(&self, offset: usize) -> *mut T {
        debug_assert!(offset + std::mem::size_of::<T>() <= self.len);
        self.as_ptr().add(offset) as *mut T
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::munmap(self.ptr, self.len);
            if self.owner {
                let _ = libc::shm_unlink(self.name.as_ptr());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_map_share() {
        let name = format!("/portl-seg-test-{}", std::process::id());
        let seg = Segment::create(&name, 4096).unwrap();
        unsafe { *seg.as_ptr() = 0xab };
        let peer = Segment::open(&name, 4096).unwrap();
        assert_eq!(unsafe { *peer.as_ptr() }, 0xab);
    }
}
