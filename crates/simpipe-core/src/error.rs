use std::path::PathBuf;

use thiserror::Error;

/// Fatal configuration problems. These are raised before any pipeline I/O
/// happens; everything else in the pipeline is recoverable and reported.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("snapshot, catalogue and input directory lists must have equal lengths (got {snapshots}, {catalogues}, {directories})")]
    MismatchedInputLists {
        snapshots: usize,
        catalogues: usize,
        directories: usize,
    },

    #[error("at least one snapshot/catalogue pair is required")]
    NoRuns,

    #[error("{supplied} run names supplied for {runs} runs")]
    MismatchedRunNames { supplied: usize, runs: usize },

    #[error("--no-plots requires --fast")]
    NoPlotsWithoutFast,

    #[error("--no-plots is only valid for a single run; comparison mode has no single metadata file to finalise")]
    NoPlotsInComparison,

    #[error("snapshot name '{0}' does not end in a 4-digit index before its extension")]
    InvalidSnapshotName(String),

    #[error("config file not found or unreadable: {path}")]
    ConfigUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config does not define a plotter_command; cannot compute figures")]
    MissingPlotterCommand,
}

/// Errors from core helpers that callers either propagate or downgrade to a
/// warning, depending on the pipeline's error taxonomy.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialise {what}")]
    Serialise {
        what: &'static str,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to parse {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl CoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.into(),
            source,
        }
    }
}
