use std::collections::BTreeMap;
use std::path::Path;

use tracing::warn;

use simpipe_core::{LineSeries, MetadataRecord, PlotDefinition};

use crate::engine::FigureEngine;

/// One logical figure merged across runs: the definition (from the first
/// record that declares it) plus every run's line data for it.
#[derive(Debug, Clone)]
pub struct MergedPlot {
    pub plot: PlotDefinition,
    pub runs: Vec<(String, Vec<LineSeries>)>,
}

/// Result of a comparison reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    /// Definitions of every figure that was successfully recreated, for page
    /// assembly.
    pub plots: Vec<PlotDefinition>,
    /// Figures skipped because recreation failed.
    pub skipped: Vec<String>,
}

/// Groups the plot sets of N records by logical plot identity (the output
/// filename). Absent records contribute nothing; the remaining runs still
/// produce a partial comparison.
pub fn merge_records(records: &[Option<MetadataRecord>]) -> Vec<MergedPlot> {
    let mut merged: BTreeMap<String, MergedPlot> = BTreeMap::new();
    for record in records.iter().flatten() {
        for plot in &record.plots {
            let entry = merged
                .entry(plot.filename.clone())
                .or_insert_with(|| MergedPlot {
                    plot: PlotDefinition {
                        lines: Vec::new(),
                        ..plot.clone()
                    },
                    runs: Vec::new(),
                });
            entry
                .runs
                .push((record.run.name.clone(), plot.lines.clone()));
        }
    }
    merged.into_values().collect()
}

/// Post-hoc overwrite-hazard check over the full merged plot set. Returns
/// each offending filename exactly once with its occurrence count; callers
/// report these, they are never silently deduplicated.
pub fn duplicate_filenames<'a>(filenames: impl Iterator<Item = &'a str>) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for filename in filenames {
        *counts.entry(filename).or_default() += 1;
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(filename, count)| (filename.to_string(), count))
        .collect()
}

/// Recreates every merged figure from persisted line data alone. A figure
/// whose recreation fails is skipped and reported; the rest of the set is
/// unaffected.
pub fn recreate_figures(
    merged: Vec<MergedPlot>,
    engine: &dyn FigureEngine,
    output_directory: &Path,
) -> ReconcileOutcome {
    let mut plots = Vec::with_capacity(merged.len());
    let mut skipped = Vec::new();
    for entry in merged {
        match engine.recreate_figure(&entry.plot, &entry.runs, output_directory) {
            Ok(()) => plots.push(entry.plot),
            Err(err) => {
                warn!(
                    figure = %entry.plot.filename,
                    %err,
                    "skipping figure that could not be recreated"
                );
                skipped.push(entry.plot.filename);
            }
        }
    }
    ReconcileOutcome { plots, skipped }
}
