use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use simpipe_core::error::{ConfigError, CoreError};
use simpipe_core::fsio::atomic_write_bytes;
use simpipe_core::MetadataRecord;

/// Extracts the 4-digit output index encoded at the end of a snapshot file
/// stem (`snapshot_0003.hdf5` -> `0003`).
pub fn snapshot_index(snapshot: &str) -> Result<String, ConfigError> {
    let stem = Path::new(snapshot)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    // get() rather than slicing: the 4-byte offset may fall inside a
    // multi-byte character, which is just another malformed name.
    if stem.len() >= 4 {
        if let Some(tail) = stem.get(stem.len() - 4..) {
            if tail.bytes().all(|b| b.is_ascii_digit()) {
                return Ok(tail.to_string());
            }
        }
    }
    Err(ConfigError::InvalidSnapshotName(snapshot.to_string()))
}

/// Deterministic per-run metadata location:
/// `<input_dir>/<base>_<index>[_<special_mode>].yml`.
pub fn metadata_path(
    input_directory: &Path,
    base_name: &str,
    snapshot: &str,
    special_mode: Option<&str>,
) -> Result<PathBuf, ConfigError> {
    let index = snapshot_index(snapshot)?;
    let filename = match special_mode {
        Some(mode) => format!("{base_name}_{index}_{mode}.yml"),
        None => format!("{base_name}_{index}.yml"),
    };
    Ok(input_directory.join(filename))
}

/// Persists one run's record. Exactly one write attempt is made; failures
/// propagate to the caller, which downgrades them to a warning because the
/// figures already produced remain valid without the record.
pub fn write_record(path: &Path, record: &MetadataRecord) -> Result<(), CoreError> {
    let yaml = serde_yaml::to_string(record).map_err(|e| CoreError::Serialise {
        what: "metadata record",
        source: e,
    })?;
    atomic_write_bytes(path, yaml.as_bytes())
}

/// Reads the expected records for comparison mode. A missing or unparsable
/// file yields `None` for that run: it most likely never ran in standalone
/// mode, and reconciliation simply proceeds without its data.
pub fn read_records(paths: &[PathBuf]) -> Vec<Option<MetadataRecord>> {
    paths
        .iter()
        .map(|path| {
            let raw = match fs::read_to_string(path) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        %err,
                        "metadata record missing; run likely never executed in single-run mode"
                    );
                    return None;
                }
            };
            match serde_yaml::from_str::<MetadataRecord>(&raw) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping malformed metadata record");
                    None
                }
            }
        })
        .collect()
}
