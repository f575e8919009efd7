use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::warn;
use serde_json::Value;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::record::ValuationRecord;

/// Write records as gzip-compressed JSON.
///
/// The snapshot is written next to `path` and renamed over it, so a failed
/// write leaves the previous snapshot in place.
pub fn save_records(path: impl AsRef<Path>, records: &[ValuationRecord]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let staging = staging_path(path);
    if let Err(err) = write_snapshot(&staging, records) {
        let _ = fs::remove_file(&staging);
        return Err(err);
    }
    fs::rename(&staging, path)?;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_snapshot(path: &Path, records: &[ValuationRecord]) -> Result<()> {
    let file = File::create(path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = BufWriter::new(encoder);
    serde_json::to_writer(&mut writer, records)?;

    let encoder = writer.into_inner().map_err(|e| e.into_error())?;
    let file = encoder.finish()?;
    file.sync_all()?;
    Ok(())
}

/// Read a snapshot written by [`save_records`]. A missing file is an empty list.
pub fn load_records(path: impl AsRef<Path>) -> Result<Vec<ValuationRecord>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    let reader = BufReader::new(GzDecoder::new(file));
    Ok(serde_json::from_reader(reader)?)
}

/// Read a plain JSON array as returned by a list endpoint.
///
/// Entries that are not records are skipped with a warning.
pub fn read_record_dump(path: impl AsRef<Path>) -> Result<Vec<ValuationRecord>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let entries: Vec<Value> = serde_json::from_reader(reader)?;

    let records = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!("{}: skipping entry {}: {}", path.display(), index, err);
                None
            }
        })
        .collect();
    Ok(records)
}
