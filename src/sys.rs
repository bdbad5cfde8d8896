//! Thin syscall wrappers for the walker: dirfd-relative open, stat,
//! readlink, and directory streaming.
//!
//! Children are opened with O_NOFOLLOW so a racing swap with a symlink
//! cannot pull the walk outside the tree; the root follows symlinks
//! because disk roots are commonly configured through one.

use std::ffi::{CStr, CString};
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::ptr::NonNull;

use nix::errno::Errno;
use smallvec::SmallVec;

/// Hard cap for symlink targets, from the content file format.
pub const PATH_MAX: usize = libc::PATH_MAX as usize;

pub fn open_root(path: &Path) -> Result<OwnedFd, Errno> {
    use std::os::unix::ffi::OsStrExt;
    let cpath = CString::new(path.as_os_str().as_bytes()).map_err(|_| Errno::EINVAL)?;
    let fd = unsafe {
        libc::open(
            cpath.as_ptr(),
            libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
        )
    };
    Errno::result(fd).map(|fd| unsafe { OwnedFd::from_raw_fd(fd) })
}

pub fn open_dir_at(dirfd: BorrowedFd<'_>, name: &CStr) -> Result<OwnedFd, Errno> {
    let fd = unsafe {
        libc::openat(
            dirfd.as_raw_fd(),
            name.as_ptr(),
            libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC | libc::O_NOFOLLOW,
        )
    };
    Errno::result(fd).map(|fd| unsafe { OwnedFd::from_raw_fd(fd) })
}

pub fn lstat_at(dirfd: BorrowedFd<'_>, name: &CStr) -> Result<libc::stat, Errno> {
    let mut st = MaybeUninit::uninit();
    let ret = unsafe {
        libc::fstatat(
            dirfd.as_raw_fd(),
            name.as_ptr(),
            st.as_mut_ptr(),
            libc::AT_SYMLINK_NOFOLLOW,
        )
    };
    Errno::result(ret).map(|_| unsafe { st.assume_init() })
}

/// Read a symlink target. Returns the raw target bytes; a result of
/// `PATH_MAX` or more bytes means the target does not fit the content
/// file format and the caller must fail the scan.
pub fn readlink_at(dirfd: BorrowedFd<'_>, name: &CStr) -> Result<SmallVec<[u8; 256]>, Errno> {
    let mut buf = [0u8; PATH_MAX];
    let n = unsafe {
        libc::readlinkat(
            dirfd.as_raw_fd(),
            name.as_ptr(),
            buf.as_mut_ptr() as *mut _,
            buf.len(),
        )
    };
    let n = Errno::result(n)? as usize;
    Ok(SmallVec::from_slice(&buf[..n]))
}

/// An open directory stream (fdopendir/readdir/closedir). `.` and `..`
/// are skipped. Dropping the stream closes it; call `close` to observe
/// the closedir result.
pub struct DirStream {
    dirp: NonNull<libc::DIR>,
}

impl DirStream {
    /// Takes ownership of `fd`; the stream owns it from here on, even
    /// if fdopendir fails.
    pub fn fdopen(fd: OwnedFd) -> Result<Self, Errno> {
        let raw: RawFd = fd.into_raw_fd();
        let dirp = unsafe { libc::fdopendir(raw) };
        match NonNull::new(dirp) {
            Some(dirp) => Ok(DirStream { dirp }),
            None => {
                let e = Errno::last();
                unsafe { libc::close(raw) };
                Err(e)
            }
        }
    }

    /// The stream's directory fd, for *at() calls on its entries.
    pub fn dir_fd(&self) -> BorrowedFd<'_> {
        unsafe { BorrowedFd::borrow_raw(libc::dirfd(self.dirp.as_ptr())) }
    }

    /// Next entry name, or None at end of stream. readdir signals errors
    /// only through errno, hence the clear-then-check dance.
    pub fn next_entry(&mut self) -> Result<Option<CString>, Errno> {
        loop {
            Errno::clear();
            let d = unsafe { libc::readdir(self.dirp.as_ptr()) };
            if d.is_null() {
                return match Errno::last_raw() {
                    0 => Ok(None),
                    e => Err(Errno::from_raw(e)),
                };
            }
            let name = unsafe { CStr::from_ptr((*d).d_name.as_ptr()) };
            if name == c"." || name == c".." {
                continue;
            }
            return Ok(Some(name.to_owned()));
        }
    }

    pub fn close(self) -> Result<(), Errno> {
        let dirp = self.dirp;
        std::mem::forget(self);
        let ret = unsafe { libc::closedir(dirp.as_ptr()) };
        Errno::result(ret).map(drop)
    }
}

impl Drop for DirStream {
    fn drop(&mut self) {
        unsafe { libc::closedir(self.dirp.as_ptr()) };
    }
}

/// Human tag for the special file types the scan skips.
pub fn stat_desc(st: &libc::stat) -> &'static str {
    match st.st_mode & libc::S_IFMT {
        libc::S_IFSOCK => "socket",
        libc::S_IFBLK => "block-device",
        libc::S_IFCHR => "char-device",
        libc::S_IFIFO => "fifo",
        libc::S_IFREG => "regular",
        libc::S_IFDIR => "directory",
        libc::S_IFLNK => "symlink",
        _ => "unknown",
    }
}

/// Nanosecond part of the stat mtime.
pub fn stat_mtime_nsec(st: &libc::stat) -> i32 {
    st.st_mtime_nsec as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::fd::AsFd;
    use std::os::unix::fs::symlink;

    #[test]
    fn dir_stream_lists_entries() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("one"), b"x").unwrap();
        fs::write(tmp.path().join("two"), b"y").unwrap();

        let fd = open_root(tmp.path()).unwrap();
        let mut stream = DirStream::fdopen(fd).unwrap();
        let mut names = Vec::new();
        while let Some(name) = stream.next_entry().unwrap() {
            names.push(name.into_string().unwrap());
        }
        stream.close().unwrap();

        names.sort();
        assert_eq!(names, ["one", "two"]);
    }

    #[test]
    fn lstat_at_does_not_follow() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("target"), b"hello").unwrap();
        symlink("target", tmp.path().join("ln")).unwrap();

        let fd = open_root(tmp.path()).unwrap();
        let st = lstat_at(fd.as_fd(), c"ln").unwrap();
        assert_eq!(st.st_mode & libc::S_IFMT, libc::S_IFLNK);
    }

    #[test]
    fn readlink_at_returns_target() {
        let tmp = tempfile::tempdir().unwrap();
        symlink("some/where", tmp.path().join("ln")).unwrap();

        let fd = open_root(tmp.path()).unwrap();
        let target = readlink_at(fd.as_fd(), c"ln").unwrap();
        assert_eq!(&target[..], b"some/where");
    }

    #[test]
    fn open_dir_at_refuses_symlinked_dir() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("real")).unwrap();
        symlink("real", tmp.path().join("alias")).unwrap();

        let fd = open_root(tmp.path()).unwrap();
        assert!(open_dir_at(fd.as_fd(), c"real").is_ok());
        assert_eq!(open_dir_at(fd.as_fd(), c"alias").unwrap_err(), Errno::ELOOP);
    }
}
