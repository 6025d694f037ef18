use serde::{Deserialize, Serialize};

/// One numeric series, enough to redraw a figure line without touching the
/// raw simulation data again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSeries {
    #[serde(default)]
    pub label: Option<String>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// One figure in the merged output set. `filename` is the output name
/// without extension and must be unique across the whole pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotDefinition {
    pub filename: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub section: String,
    /// Producing script name, or the plotter's own tag for directly
    /// computed figures.
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub lines: Vec<LineSeries>,
}

/// Identity of the run a metadata record was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub name: String,
    pub redshift: f64,
    pub snapshot: String,
    pub catalogue: String,
}

/// Persisted per-run record: everything needed to re-render the run's
/// figures in comparison mode without recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub run: RunInfo,
    pub plots: Vec<PlotDefinition>,
}
