//! Diff engine and scan driver.
//!
//! For each disk the live tree is walked and every entry is compared
//! against the catalog, classifying it as equal, moved, updated,
//! inserted, or (at sweep time) removed. Mutations to the parity slot
//! array are two-phased: all removals happen before any insertion, so
//! freed slots and their tombstones can be reused by the files inserted
//! in the same scan. This ordering is a correctness requirement, not an
//! optimization.

use std::path::PathBuf;

use generational_arena::Index;

use crate::disk::Disk;
use crate::entry::{same_sub, EmptyDirEntry, FileEntry, LinkEntry, LinkKind, NSEC_INVALID};
use crate::error::ScanError;
use crate::filter::Filters;
use crate::report::Reporter;
use crate::state::{ScanOptions, State};
use crate::{sys, walk};

/// Change counters for one disk (or summed over all of them).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCounts {
    pub equal: u32,
    pub moved: u32,
    pub changed: u32,
    pub removed: u32,
    pub added: u32,
}

impl ScanCounts {
    pub fn merge(&mut self, other: &ScanCounts) {
        self.equal += other.equal;
        self.moved += other.moved;
        self.changed += other.changed;
        self.removed += other.removed;
        self.added += other.added;
    }

    pub fn no_difference(&self) -> bool {
        self.moved == 0 && self.changed == 0 && self.removed == 0 && self.added == 0
    }
}

/// Per-disk scan bookkeeping: counters plus the deferred-insert lists.
/// Staged files are already in the catalog's indexes (so hardlink
/// aliases discovered later in the walk resolve against them) but get
/// their parity slots only after the removal sweep.
pub(crate) struct DiskScan<'a> {
    pub(crate) opts: &'a ScanOptions,
    pub(crate) filters: &'a Filters,
    pub(crate) report: &'a mut Reporter,
    pub(crate) disk: &'a mut Disk,
    pub(crate) need_write: &'a mut bool,
    pub(crate) counts: ScanCounts,
    file_inserts: Vec<Index>,
    link_inserts: Vec<LinkEntry>,
    dir_inserts: Vec<EmptyDirEntry>,
}

impl<'a> DiskScan<'a> {
    pub(crate) fn new(
        opts: &'a ScanOptions,
        filters: &'a Filters,
        report: &'a mut Reporter,
        disk: &'a mut Disk,
        need_write: &'a mut bool,
    ) -> Self {
        DiskScan {
            opts,
            filters,
            report,
            disk,
            need_write,
            counts: ScanCounts::default(),
            file_inserts: Vec::new(),
            link_inserts: Vec::new(),
            dir_inserts: Vec::new(),
        }
    }

    /// Process one regular file found on disk.
    pub(crate) fn scan_file(&mut self, sub: PathBuf, st: &libc::stat) -> Result<(), ScanError> {
        let st_size = st.st_size as u64;
        let st_mtime_sec = st.st_mtime;
        let st_mtime_nsec = sys::stat_mtime_nsec(st);
        let st_inode = st.st_ino;

        let found = if self.opts.find_by_name {
            self.disk.find_file_by_path(&sub)
        } else {
            self.disk.find_file_by_inode(st_inode)
        };

        if let Some(id) = found {
            let (present, size, mtime_sec, mtime_nsec, inode, old_sub) = {
                let f = self
                    .disk
                    .file(id)
                    .ok_or_else(|| ScanError::inconsistency("file index points at a removed file"))?;
                (
                    f.present,
                    f.size,
                    f.mtime_sec,
                    f.mtime_nsec,
                    f.inode,
                    f.sub.clone(),
                )
            };

            if present {
                // the inode is being seen a second time this walk; only
                // hardlink aliasing explains that
                if st.st_nlink > 1 {
                    return self.scan_link(sub, old_sub, LinkKind::Hardlink);
                }
                return Err(ScanError::inconsistency(format!(
                    "inode {st_inode} encountered twice for file '{}'",
                    self.disk.dir.join(&sub).display()
                )));
            }

            let unchanged = size == st_size
                && mtime_sec == st_mtime_sec
                && (mtime_nsec == st_mtime_nsec || mtime_nsec == NSEC_INVALID);

            if unchanged {
                {
                    let f = self.disk.file_mut(id).ok_or_else(|| {
                        ScanError::inconsistency("file index points at a removed file")
                    })?;
                    f.present = true;
                    // catalogs written by older versions lack nanoseconds
                    if f.mtime_nsec == NSEC_INVALID && st_mtime_nsec != NSEC_INVALID {
                        f.mtime_nsec = st_mtime_nsec;
                        *self.need_write = true;
                    }
                }

                if !same_sub(&old_sub, &sub) {
                    // same inode under a new name: a rename
                    if inode != st_inode {
                        return Err(ScanError::inconsistency(format!(
                            "inode mismatch renaming '{}'",
                            self.disk.dir.join(&sub).display()
                        )));
                    }
                    self.counts.moved += 1;
                    self.report
                        .moved(&self.disk.name, &self.disk.dir, &old_sub, &sub);
                    self.disk.reindex_file_path(id, sub)?;
                    *self.need_write = true;
                } else if inode != st_inode {
                    // same name, same metadata, new inode: rewritten in
                    // place (say, restored from a backup)
                    self.counts.moved += 1;
                    self.report
                        .moved(&self.disk.name, &self.disk.dir, &old_sub, &sub);
                    self.disk.reindex_file_inode(id, st_inode)?;
                    *self.need_write = true;
                } else {
                    self.counts.equal += 1;
                    self.report.equal(&self.disk.name, &old_sub);
                }
                return Ok(());
            }

            // changed. a zero-size regression under the same name is the
            // ext4 post-crash truncation signature; refuse to record it
            // unless overridden. a changed name is a legitimate
            // delete-and-recreate, so no guard there.
            if size != 0 && st_size == 0 && same_sub(&old_sub, &sub) && !self.opts.force_zero {
                return Err(ScanError::ZeroSizeRegression {
                    path: self.disk.dir.join(&sub),
                });
            }

            if same_sub(&old_sub, &sub) {
                self.counts.changed += 1;
                self.report.update(&self.disk.name, &self.disk.dir, &old_sub);
            } else {
                // the inode was reused for a different file
                self.counts.removed += 1;
                self.counts.added += 1;
                self.report.remove(&self.disk.name, &self.disk.dir, &old_sub);
                self.report.add(&self.disk.name, &self.disk.dir, &sub);
            }

            self.disk.remove_file(id)?;
            *self.need_write = true;
            // fall through to reinsert under the new identity
        } else {
            self.counts.added += 1;
            self.report.add(&self.disk.name, &self.disk.dir, &sub);
        }

        let mut file = FileEntry::new(
            self.opts.block_size,
            sub,
            st_size,
            st_mtime_sec,
            st_mtime_nsec,
            st_inode,
        );
        file.present = true;
        // indexed now so duplicate hardlinks resolve; slots come later
        let id = self.disk.add_file(file);
        self.file_inserts.push(id);
        *self.need_write = true;
        Ok(())
    }

    /// Process a symlink, or a hardlink alias forwarded by `scan_file`.
    pub(crate) fn scan_link(
        &mut self,
        sub: PathBuf,
        target: PathBuf,
        kind: LinkKind,
    ) -> Result<(), ScanError> {
        if let Some(id) = self.disk.find_link(&sub) {
            let (present, equal) = {
                let l = self
                    .disk
                    .link(id)
                    .ok_or_else(|| ScanError::inconsistency("link index points at a removed link"))?;
                (l.present, same_sub(&l.target, &target) && l.kind == kind)
            };
            if present {
                return Err(ScanError::inconsistency(format!(
                    "link '{}' encountered twice",
                    self.disk.dir.join(&sub).display()
                )));
            }
            {
                let l = self.disk.link_mut(id).ok_or_else(|| {
                    ScanError::inconsistency("link index points at a removed link")
                })?;
                l.present = true;
                if !equal {
                    l.target = target;
                    l.kind = kind;
                }
            }
            if equal {
                self.counts.equal += 1;
                self.report.equal(&self.disk.name, &sub);
            } else {
                self.counts.changed += 1;
                self.report.update(&self.disk.name, &self.disk.dir, &sub);
                *self.need_write = true;
            }
            return Ok(());
        }

        self.counts.added += 1;
        self.report.add(&self.disk.name, &self.disk.dir, &sub);
        let mut link = LinkEntry::new(sub, target, kind);
        link.present = true;
        self.link_inserts.push(link);
        Ok(())
    }

    /// Process a directory whose walk found nothing to record.
    pub(crate) fn scan_empty_dir(&mut self, sub: PathBuf) -> Result<(), ScanError> {
        if let Some(id) = self.disk.find_dir(&sub) {
            let present = self
                .disk
                .dir(id)
                .ok_or_else(|| ScanError::inconsistency("dir index points at a removed dir"))?
                .present;
            if present {
                return Err(ScanError::inconsistency(format!(
                    "dir '{}' encountered twice",
                    self.disk.dir.join(&sub).display()
                )));
            }
            if let Some(d) = self.disk.dir_mut(id) {
                d.present = true;
            }
            self.counts.equal += 1;
            self.report.equal(&self.disk.name, &sub);
            return Ok(());
        }

        self.counts.added += 1;
        self.report.add(&self.disk.name, &self.disk.dir, &sub);
        let mut dir = EmptyDirEntry::new(sub);
        dir.present = true;
        self.dir_inserts.push(dir);
        Ok(())
    }

    /// Remove every catalog entry the walk did not mark present.
    pub(crate) fn sweep_removed(&mut self) -> Result<(), ScanError> {
        for id in self.disk.file_ids() {
            let sub = match self.disk.file(id) {
                // staged inserts are not listed yet; stale ids are
                // leftovers of mid-walk updates
                None => continue,
                Some(f) if f.present => continue,
                Some(f) => f.sub.clone(),
            };
            self.counts.removed += 1;
            self.report.remove(&self.disk.name, &self.disk.dir, &sub);
            self.disk.remove_file(id)?;
            *self.need_write = true;
        }

        for id in self.disk.link_ids() {
            let sub = match self.disk.link(id) {
                None => continue,
                Some(l) if l.present => continue,
                Some(l) => l.sub.clone(),
            };
            self.counts.removed += 1;
            self.report.remove(&self.disk.name, &self.disk.dir, &sub);
            self.disk.remove_link(id)?;
            *self.need_write = true;
        }

        for id in self.disk.dir_ids() {
            let sub = match self.disk.dir(id) {
                None => continue,
                Some(d) if d.present => continue,
                Some(d) => d.sub.clone(),
            };
            self.counts.removed += 1;
            self.report.remove(&self.disk.name, &self.disk.dir, &sub);
            self.disk.remove_dir(id)?;
            *self.need_write = true;
        }

        Ok(())
    }

    /// Apply the deferred inserts: files first (so they pick up the
    /// slots the sweep just freed), then links, then dirs.
    pub(crate) fn apply_inserts(&mut self) -> Result<(), ScanError> {
        for id in std::mem::take(&mut self.file_inserts) {
            self.disk.attach_file_blocks(id)?;
        }
        for link in std::mem::take(&mut self.link_inserts) {
            self.disk.insert_link(link);
            *self.need_write = true;
        }
        for dir in std::mem::take(&mut self.dir_inserts) {
            self.disk.insert_dir(dir);
            *self.need_write = true;
        }
        Ok(())
    }
}

/// Scan every configured disk, mutating the catalog in place.
///
/// Returns the summed counters. Any error is fatal for the run: the
/// catalog may be half-updated and must not be serialized.
pub fn state_scan(state: &mut State, report: &mut Reporter) -> Result<ScanCounts, ScanError> {
    let State {
        opts,
        filters,
        disks,
        need_write,
    } = state;

    let mut per_disk = Vec::with_capacity(disks.len());
    for disk in disks.iter_mut() {
        report.scanning(&disk.name);
        tracing::info!(disk = %disk.name, dir = %disk.dir.display(), "scanning");
        disk.clear_present();

        let counts = {
            let mut scan = DiskScan::new(opts, filters, report, disk, need_write);
            walk::walk_disk(&mut scan)?;
            scan.sweep_removed()?;
            scan.apply_inserts()?;
            scan.counts
        };
        disk.compact_lists();
        per_disk.push(counts);
    }

    // a disk where nothing matched but things were removed is most
    // likely unmounted, not emptied on purpose
    if !opts.force_empty {
        let wiped: Vec<String> = disks
            .iter()
            .zip(&per_disk)
            .filter(|(_, c)| c.equal == 0 && c.moved == 0 && c.removed != 0)
            .map(|(d, _)| d.name.clone())
            .collect();
        if !wiped.is_empty() {
            return Err(ScanError::EmptyDisks { disks: wiped });
        }
    }

    let mut total = ScanCounts::default();
    for c in &per_disk {
        total.merge(c);
    }
    report.totals(&total);
    Ok(total)
}
