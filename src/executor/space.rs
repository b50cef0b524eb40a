use std::path::{Path, PathBuf};
use sysinfo::Disks;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::planner::OrganizationPlan;

/// Free bytes on the volume holding `path`, or `None` when no mounted disk
/// could be matched. `path` need not exist yet: its nearest existing
/// ancestor decides the volume.
pub fn available_space(path: &Path) -> Option<u64> {
    let anchor = existing_ancestor(path)?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| anchor.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

fn existing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .and_then(|p| p.canonicalize().ok())
}

/// Refuse a batch whose copies cannot fit in `available` bytes. Unknown free
/// space lets the batch run; running out midway is still caught per entry.
pub fn ensure_space(plan: &OrganizationPlan, available: Option<u64>) -> Result<()> {
    let needed = plan.copy_bytes();
    if needed == 0 {
        return Ok(());
    }
    let Some(available) = available else {
        warn!(
            "Could not determine free space under {}",
            plan.destination_root().display()
        );
        return Ok(());
    };
    debug!(
        "Batch {} needs {} bytes, {} available",
        plan.batch_id(),
        needed,
        available
    );
    if needed > available {
        return Err(Error::BatchFatal(format!(
            "{} needs {} bytes but only {} are free",
            plan.destination_root().display(),
            needed,
            available
        )));
    }
    Ok(())
}
