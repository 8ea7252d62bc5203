//! Manifest serialization and the atomic publish protocol (§4.7).
//!
//! Mirrors the teacher's rename-then-fsync-directory publish pattern for
//! durable metadata (seen in the segment/shard writers), specialized to
//! the spec's own `manifest.<N>` naming and header-map shape.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::storage::types::{SegmentDescriptor, Version, MANIFEST_FORMAT_VERSION, MANIFEST_MAGIC};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestHeader {
    #[serde(rename = "0")]
    magic: u32,
    #[serde(rename = "1")]
    format_version: u16,
    #[serde(rename = "2")]
    index_version: Version,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    header: ManifestHeader,
    pub segments: Vec<SegmentDescriptor>,
}

impl Manifest {
    pub fn new(index_version: Version, segments: Vec<SegmentDescriptor>) -> Self {
        Self {
            header: ManifestHeader { magic: MANIFEST_MAGIC, format_version: MANIFEST_FORMAT_VERSION, index_version },
            segments,
        }
    }

    pub fn index_version(&self) -> Version {
        self.header.index_version
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let manifest: Manifest = rmp_serde::from_slice(bytes)?;
        if manifest.header.magic != MANIFEST_MAGIC {
            return Err(IndexError::CorruptSegment("manifest".into(), "bad magic".into()));
        }
        Ok(manifest)
    }
}

fn manifest_file_name(n: u64) -> String {
    format!("manifest.{n}")
}

/// Scan `dir` for `manifest.<N>` files and return the highest `N`.
pub fn highest_manifest_number(dir: &Path) -> Result<Option<u64>> {
    let mut highest = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(n_str) = name.strip_prefix("manifest.") {
                if let Ok(n) = n_str.parse::<u64>() {
                    highest = Some(highest.map_or(n, |h: u64| h.max(n)));
                }
            }
        }
    }
    Ok(highest)
}

/// Read and validate the manifest numbered `n` in `dir`.
pub fn read_manifest(dir: &Path, n: u64) -> Result<Manifest> {
    let bytes = fs::read(dir.join(manifest_file_name(n)))?;
    Manifest::from_bytes(&bytes)
}

/// Publish `manifest` as number `n`, following §4.7's tmp/fsync/rename/fsync-dir
/// protocol. Returns the path of the newly-current manifest file.
pub fn publish(dir: &Path, n: u64, manifest: &Manifest) -> Result<PathBuf> {
    let final_path = dir.join(manifest_file_name(n));
    let tmp_path = dir.join(format!("{}.tmp", manifest_file_name(n)));

    {
        let mut tmp_file = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp_path)?;
        tmp_file.write_all(&manifest.to_bytes()?)?;
        tmp_file.sync_all()?;
    }

    fs::rename(&tmp_path, &final_path)?;
    fsync_dir(dir)?;
    Ok(final_path)
}

/// Remove manifest `n`, ignoring a missing file (already deleted, or
/// never published due to a crash between write and rename).
pub fn delete_manifest(dir: &Path, n: u64) -> Result<()> {
    let path = dir.join(manifest_file_name(n));
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> Result<()> {
    let dir_file = File::open(dir)?;
    dir_file.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
