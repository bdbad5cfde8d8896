use std::path::PathBuf;

use nix::errno::Errno;

/// Fatal scan failures. None of these are recoverable within a run: the
/// catalog may be half-mutated, so the caller must discard it and exit.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// A syscall on a directory failed. The hint matters: a dead subtree
    /// (failing mount, foreign fs) is usually something the user wants to
    /// exclude rather than fix.
    #[error(
        "error {op} '{}': {source}\nyou can exclude it in the config file with:\n\texclude /{}",
        .path.display(),
        .sub.display()
    )]
    DirIo {
        op: &'static str,
        path: PathBuf,
        sub: PathBuf,
        source: Errno,
    },

    /// Any other syscall failure (stat, readlink).
    #[error("error {op} '{}': {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        source: Errno,
    },

    /// The content file format cannot represent this name (empty,
    /// embedded newline, or trailing carriage return).
    #[error("unsupported name in file '{}'", .path.display())]
    NameUnsupported { path: PathBuf },

    #[error("symlink '{}' target is too long", .path.display())]
    SymlinkTooLong { path: PathBuf },

    /// A file went from non-zero to zero size under the same name. This
    /// is the classic post-crash truncation; refusing to record it keeps
    /// the parity able to recover the old content.
    #[error(
        "file '{}' has unexpected zero size\n\
         if this is expected, run again with --force-zero\n\
         otherwise the file may have been lost in a crash; recover it with a filtered fix first",
        .path.display()
    )]
    ZeroSizeRegression { path: PathBuf },

    /// Every previously recorded entry on these disks is gone. Almost
    /// always an unmounted disk, not a mass delete.
    #[error(
        "all files previously present on disks [{}] are now missing or rewritten\n\
         if you really removed or rewrote everything, run again with --force-empty\n\
         otherwise check for disks that are not mounted",
        .disks.join(", ")
    )]
    EmptyDisks { disks: Vec<String> },

    /// Catalog invariant violation. Indicates a bug or corrupted state.
    #[error("internal inconsistency: {0}")]
    Inconsistency(String),
}

impl ScanError {
    pub fn inconsistency(msg: impl Into<String>) -> Self {
        ScanError::Inconsistency(msg.into())
    }
}
