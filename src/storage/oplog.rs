//! Append-only write-ahead log (§4.4).
//!
//! Records are written as `len:u32 | crc32c:u32 | version:u64 | body:msgpack(UpdateBatch)`,
//! split across files rotated by size and named by the first version they
//! contain (`<first_version>.oplog`). A partial record at the tail of the
//! newest file — the signature of a crash mid-append — is detected by a
//! length or CRC mismatch and truncated away on open.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};
use crate::storage::types::{UpdateBatch, Version};

const RECORD_PREFIX_LEN: usize = 4 + 4 + 8; // len, crc32c, version

fn record_crc(version: Version, body: &[u8]) -> u32 {
    let mut crc = crc32c::crc32c(&version.to_le_bytes());
    crc = crc32c::crc32c_append(crc, body);
    crc
}

fn encode_record(version: Version, batch: &UpdateBatch) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec(batch)?;
    let mut record = Vec::with_capacity(RECORD_PREFIX_LEN + body.len());
    record.extend_from_slice(&(body.len() as u32).to_le_bytes());
    let crc = record_crc(version, &body);
    record.extend_from_slice(&crc.to_le_bytes());
    record.extend_from_slice(&version.to_le_bytes());
    record.extend_from_slice(&body);
    Ok(record)
}

/// One rotated log file, named by the first version it holds.
struct OplogFile {
    first_version: Version,
    path: PathBuf,
    file: File,
    size: u64,
}

impl OplogFile {
    fn create(dir: &Path, first_version: Version) -> Result<Self> {
        let path = dir.join(format!("{first_version}.oplog"));
        let file = OpenOptions::new().create(true).append(true).read(true).open(&path)?;
        Ok(Self { first_version, path, file, size: 0 })
    }

    fn open_existing(path: PathBuf, first_version: Version) -> Result<Self> {
        let file = OpenOptions::new().append(true).read(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self { first_version, path, file, size })
    }
}

/// The write-ahead log for one index.
pub struct Oplog {
    dir: PathBuf,
    files: Vec<OplogFile>,
    rotate_threshold: u64,
    fsync_on_append: bool,
}

impl Oplog {
    /// Open (creating if needed) the oplog directory, replaying and
    /// truncating a torn tail from the newest file if one exists.
    pub fn open(dir: &Path, rotate_threshold: u64, fsync_on_append: bool) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut file_versions: Vec<Version> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name();
                let name = name.to_str()?;
                name.strip_suffix(".oplog")?.parse::<Version>().ok()
            })
            .collect();
        file_versions.sort_unstable();

        let mut files = Vec::with_capacity(file_versions.len().max(1));
        for first_version in &file_versions {
            let path = dir.join(format!("{first_version}.oplog"));
            files.push(OplogFile::open_existing(path, *first_version)?);
        }

        let mut oplog = Self { dir: dir.to_path_buf(), files, rotate_threshold, fsync_on_append };
        if let Some(last) = oplog.files.last_mut() {
            truncate_torn_tail(last)?;
        } else {
            oplog.files.push(OplogFile::create(dir, 0)?);
        }
        Ok(oplog)
    }

    /// Append `batch` under `version`, fsyncing per the configured policy.
    pub fn append(&mut self, version: Version, batch: &UpdateBatch) -> Result<()> {
        let record = encode_record(version, batch)?;
        self.maybe_rotate(version)?;
        let file = self.files.last_mut().expect("oplog always has at least one file");
        file.file.write_all(&record)?;
        if self.fsync_on_append {
            file.file.sync_data()?;
        }
        file.size += record.len() as u64;
        Ok(())
    }

    fn maybe_rotate(&mut self, next_version: Version) -> Result<()> {
        let needs_rotation = match self.files.last() {
            Some(f) => f.size >= self.rotate_threshold,
            None => true,
        };
        if needs_rotation {
            self.files.push(OplogFile::create(&self.dir, next_version)?);
        }
        Ok(())
    }

    /// Iterate all records with `version >= from`, in ascending order.
    pub fn iter_from(&mut self, from: Version) -> Result<Vec<(Version, UpdateBatch)>> {
        let mut out = Vec::new();
        for f in &mut self.files {
            if let Some(&next) = self.files_first_version_after(f.first_version).as_ref() {
                if next <= from {
                    continue;
                }
            }
            f.file.seek(SeekFrom::Start(0))?;
            let mut buf = Vec::new();
            f.file.read_to_end(&mut buf)?;
            let records = decode_all_records(&buf)?;
            for (version, batch) in records {
                if version >= from {
                    out.push((version, batch));
                }
            }
        }
        out.sort_by_key(|(v, _)| *v);
        Ok(out)
    }

    fn files_first_version_after(&self, first_version: Version) -> Option<Version> {
        self.files.iter().map(|f| f.first_version).filter(|&v| v > first_version).min()
    }

    /// Paths of every oplog file currently on disk, oldest first. Used to
    /// build a snapshot's oplog tail (§4.10).
    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    /// Delete whole files whose every record has `version < target`.
    pub fn truncate_before(&mut self, target: Version) -> Result<()> {
        let keep_from_index = {
            let mut idx = 0;
            for (i, f) in self.files.iter().enumerate() {
                if f.first_version < target {
                    idx = i;
                } else {
                    break;
                }
            }
            idx
        };
        let to_remove: Vec<PathBuf> =
            self.files.drain(..keep_from_index).map(|f| f.path).collect();
        for path in to_remove {
            let _ = std::fs::remove_file(path);
        }
        if self.files.is_empty() {
            self.files.push(OplogFile::create(&self.dir, target)?);
        }
        Ok(())
    }
}

fn decode_all_records(buf: &[u8]) -> Result<Vec<(Version, UpdateBatch)>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < buf.len() {
        match decode_one_record(buf, pos) {
            Some((version, batch, consumed)) => {
                out.push((version, batch));
                pos += consumed;
            }
            None => break, // torn tail; stop, caller truncates on open
        }
    }
    Ok(out)
}

/// Returns `(version, batch, bytes_consumed)` or `None` if the remaining
/// bytes don't form a complete, checksum-valid record.
fn decode_one_record(buf: &[u8], pos: usize) -> Option<(Version, UpdateBatch, usize)> {
    if pos + RECORD_PREFIX_LEN > buf.len() {
        return None;
    }
    let len = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
    let crc = u32::from_le_bytes(buf[pos + 4..pos + 8].try_into().unwrap());
    let version = u64::from_le_bytes(buf[pos + 8..pos + 16].try_into().unwrap());
    let body_start = pos + RECORD_PREFIX_LEN;
    let body_end = body_start + len;
    if body_end > buf.len() {
        return None;
    }
    let body = &buf[body_start..body_end];
    let computed_crc = record_crc(version, body);
    if computed_crc != crc {
        return None;
    }
    let batch: UpdateBatch = rmp_serde::from_slice(body).ok()?;
    Some((version, batch, RECORD_PREFIX_LEN + len))
}

fn truncate_torn_tail(file: &mut OplogFile) -> Result<()> {
    file.file.seek(SeekFrom::Start(0))?;
    let mut buf = Vec::new();
    file.file.read_to_end(&mut buf)?;

    let mut pos = 0usize;
    while pos < buf.len() {
        match decode_one_record(&buf, pos) {
            Some((_, _, consumed)) => pos += consumed,
            None => break,
        }
    }
    if pos != buf.len() {
        file.file.set_len(pos as u64)?;
        file.file.seek(SeekFrom::End(0))?;
    }
    file.size = pos as u64;
    Ok(())
}
