//! Recursive directory walker.
//!
//! Depth-first over a disk's live tree, feeding every entry to the diff
//! engine. Name-based exclusions run before any stat so an excluded
//! subtree is never touched. Children are opened relative to the parent
//! dirfd; a directory handle lives exactly as long as its frame.

use std::ffi::{CStr, CString};
use std::os::fd::OwnedFd;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;

use crate::entry::LinkKind;
use crate::error::ScanError;
use crate::scan::DiskScan;
use crate::sys;

fn dir_io(op: &'static str, path: &Path, sub: &Path, e: Errno) -> ScanError {
    ScanError::DirIo {
        op,
        path: path.to_path_buf(),
        sub: sub.to_path_buf(),
        source: e,
    }
}

/// Walk a whole disk. The return value (did the tree contain anything
/// recordable) is meaningless at the root and ignored there.
pub(crate) fn walk_disk(scan: &mut DiskScan<'_>) -> Result<bool, ScanError> {
    let root = scan.disk.dir.clone();
    let fd = sys::open_root(&root)
        .map_err(|e| dir_io("opening directory", &root, Path::new(""), e))?;
    walk_dir(scan, fd, Path::new(""))
}

/// Walk one directory, returning whether any file or link was processed
/// here or below. A directory whose walk processed nothing is recorded
/// as an empty-dir entry by the caller.
fn walk_dir(scan: &mut DiskScan<'_>, dirfd: OwnedFd, sub: &Path) -> Result<bool, ScanError> {
    let dir_path = scan.disk.dir.join(sub);
    let mut stream =
        sys::DirStream::fdopen(dirfd).map_err(|e| dir_io("opening directory", &dir_path, sub, e))?;

    let mut processed = false;
    loop {
        let name: CString = match stream.next_entry() {
            Ok(Some(n)) => n,
            Ok(None) => break,
            Err(e) => return Err(dir_io("reading directory", &dir_path, sub, e)),
        };
        let name_bytes = name.as_bytes();
        let path_next = dir_path.join(std::ffi::OsStr::from_bytes(name_bytes));

        // the content file is line-oriented; it cannot hold these names
        if name_bytes.is_empty()
            || name_bytes.contains(&b'\n')
            || name_bytes.last() == Some(&b'\r')
        {
            return Err(ScanError::NameUnsupported { path: path_next });
        }

        // name-only exclusions, before any stat
        if scan.filters.is_hidden(name_bytes) {
            scan.report.excluded("hidden", &path_next);
            continue;
        }
        if scan.filters.is_content(&path_next) {
            scan.report.excluded("content", &path_next);
            continue;
        }

        let st = sys::lstat_at(stream.dir_fd(), &name).map_err(|e| ScanError::Io {
            op: "statting",
            path: path_next.clone(),
            source: e,
        })?;

        let sub_next = sub.join(std::ffi::OsStr::from_bytes(name_bytes));
        match st.st_mode & libc::S_IFMT {
            libc::S_IFREG => {
                if scan.filters.excludes_path(&scan.disk.name, &sub_next) {
                    scan.report.excluded("file", &path_next);
                } else {
                    scan.scan_file(sub_next, &st)?;
                    processed = true;
                }
            }
            libc::S_IFLNK => {
                if scan.filters.excludes_path(&scan.disk.name, &sub_next) {
                    scan.report.excluded("link", &path_next);
                } else {
                    let target = read_link_target(&mut stream, &name, &path_next)?;
                    scan.scan_link(sub_next, target, LinkKind::Symlink)?;
                    processed = true;
                }
            }
            libc::S_IFDIR => {
                if scan.filters.excludes_dir(&scan.disk.name, &sub_next) {
                    scan.report.excluded("directory", &path_next);
                } else {
                    let child = sys::open_dir_at(stream.dir_fd(), &name)
                        .map_err(|e| dir_io("opening directory", &path_next, &sub_next, e))?;
                    if !walk_dir(scan, child, &sub_next)? {
                        scan.scan_empty_dir(sub_next)?;
                    }
                    // either something below was processed, or the empty
                    // dir itself was recorded
                    processed = true;
                }
            }
            _ => {
                if scan.filters.excludes_path(&scan.disk.name, &sub_next) {
                    scan.report.excluded(sys::stat_desc(&st), &path_next);
                } else {
                    tracing::warn!(
                        "ignoring special {} file '{}'",
                        sys::stat_desc(&st),
                        path_next.display()
                    );
                }
            }
        }
    }

    stream
        .close()
        .map_err(|e| dir_io("closing directory", &dir_path, sub, e))?;
    Ok(processed)
}

fn read_link_target(
    stream: &mut sys::DirStream,
    name: &CStr,
    path_next: &Path,
) -> Result<PathBuf, ScanError> {
    let target = sys::readlink_at(stream.dir_fd(), name).map_err(|e| ScanError::Io {
        op: "reading link",
        path: path_next.to_path_buf(),
        source: e,
    })?;
    if target.len() >= sys::PATH_MAX {
        return Err(ScanError::SymlinkTooLong {
            path: path_next.to_path_buf(),
        });
    }
    Ok(PathBuf::from(std::ffi::OsString::from_vec(target.to_vec())))
}
