//! Descriptor files on disk: `state-<entity id>.yaml` in a descriptor directory.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::builder::RuntimeDescriptor;
use crate::error::DescriptorResult;

/// Path of the descriptor file for `entity_id` under `dir`.
pub fn descriptor_path(dir: &Path, entity_id: &str) -> PathBuf {
    dir.join(format!("state-{entity_id}.yaml"))
}

/// Write `descriptor` for `entity_id`, creating `dir` if needed.
pub fn write_descriptor(
    dir: &Path,
    entity_id: &str,
    descriptor: &RuntimeDescriptor,
) -> DescriptorResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = descriptor_path(dir, entity_id);
    std::fs::write(&path, descriptor.to_yaml()?)?;
    debug!(entity = %entity_id, path = %path.display(), "descriptor written");
    Ok(path)
}

/// Remove a descriptor file. A file that is already gone is not an error.
pub fn remove_descriptor(path: &Path) -> DescriptorResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
