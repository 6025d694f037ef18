use std::path::PathBuf;

use simpipe_core::ConfigError;

/// Which terminal path the orchestrator takes. Chosen once from the run
/// count and never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    SingleRun,
    Comparison,
}

/// Immutable invocation description. Built once by the CLI, validated before
/// any I/O, then passed by reference into each component.
#[derive(Debug, Clone)]
pub struct PipelineArgs {
    pub config_directory: PathBuf,
    /// Catalogue filenames, one per run, without directory.
    pub catalogues: Vec<String>,
    /// Snapshot filenames, one per run, without directory. Each must encode
    /// a 4-digit index immediately before the extension.
    pub snapshots: Vec<String>,
    /// Directories containing the corresponding snapshot and catalogue.
    pub input_directories: Vec<PathBuf>,
    pub output_directory: PathBuf,
    /// Explicit run names; overrides derivation when supplied.
    pub run_names: Option<Vec<String>>,
    /// Base name for the persisted metadata file.
    pub metadata_base: String,
    /// Worker budget for the script dispatcher; `None` means all cores.
    pub jobs: Option<usize>,
    /// Alternate named pipeline configuration, appended to metadata
    /// filenames.
    pub special_mode: Option<String>,
    /// Skip the external script dispatch entirely.
    pub fast: bool,
    /// Skip rendering and page assembly; persist metadata only.
    pub no_plots: bool,
    pub debug: bool,
}

impl PipelineArgs {
    pub fn run_count(&self) -> usize {
        self.snapshots.len()
    }

    pub fn mode(&self) -> Mode {
        if self.run_count() == 1 {
            Mode::SingleRun
        } else {
            Mode::Comparison
        }
    }

    /// Rejects incompatible flag combinations and mismatched list lengths.
    /// Must pass before the pipeline touches the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.snapshots.is_empty() {
            return Err(ConfigError::NoRuns);
        }
        if self.snapshots.len() != self.catalogues.len()
            || self.snapshots.len() != self.input_directories.len()
        {
            return Err(ConfigError::MismatchedInputLists {
                snapshots: self.snapshots.len(),
                catalogues: self.catalogues.len(),
                directories: self.input_directories.len(),
            });
        }
        if let Some(names) = &self.run_names {
            if names.len() != self.run_count() {
                return Err(ConfigError::MismatchedRunNames {
                    supplied: names.len(),
                    runs: self.run_count(),
                });
            }
        }
        if self.no_plots && !self.fast {
            return Err(ConfigError::NoPlotsWithoutFast);
        }
        if self.no_plots && self.mode() == Mode::Comparison {
            return Err(ConfigError::NoPlotsInComparison);
        }
        // Fail on malformed snapshot names up front; the metadata store
        // relies on the embedded index for deterministic paths.
        for snapshot in &self.snapshots {
            crate::store::snapshot_index(snapshot)?;
        }
        Ok(())
    }
}
