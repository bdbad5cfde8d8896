/*
 * drift
 * catalog/disk difference scanner for snapshot parity arrays
 *
 * given a catalog of what each protected disk held at the last sync,
 * the scan walks the live trees and folds additions, removals, updates,
 * renames, hardlinks, and symlinks back into the catalog, reassigning
 * parity slots so the parity on disk keeps covering a known hash
 * sequence. it never reads file data and never touches parity itself.
 */

pub mod block;
pub mod disk;
pub mod entry;
pub mod error;
pub mod filter;
pub mod report;
pub mod scan;
pub mod state;
pub mod sys;
pub mod walk;

pub use disk::Disk;
pub use error::ScanError;
pub use filter::Filters;
pub use report::Reporter;
pub use scan::{state_scan, ScanCounts};
pub use state::{ScanOptions, State};
