//! Free space on the volume holding the index.

use std::path::Path;
use sysinfo::Disks;

/// Available and total bytes of the filesystem `path` lives on, from the
/// deepest mount point containing it.
pub(super) fn usage(path: &Path) -> Option<(u64, u64)> {
    let path = path
        .canonicalize()
        .or_else(|_| path.parent().unwrap_or(path).canonicalize())
        .ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().components().count())
        .map(|disk| (disk.available_space(), disk.total_space()))
}
