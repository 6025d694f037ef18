use anyhow::Result;

use crate::args::PipelineArgs;
use crate::engine::RunMetadataLoader;

/// A run's presentation identity after reconciliation across the whole set.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRun {
    pub name: String,
    pub redshift: f64,
}

/// Derives one display name per run.
///
/// Explicit `--run-names` are used verbatim. Otherwise names come from the
/// run metadata loader; when the runs span more than one redshift, every
/// name is annotated with `(z=...)` so figure legends stay consistent, even
/// for names that are not themselves ambiguous.
pub fn resolve_run_names(
    args: &PipelineArgs,
    loader: &dyn RunMetadataLoader,
) -> Result<Vec<ResolvedRun>> {
    let mut loaded = Vec::with_capacity(args.run_count());
    for ((directory, catalogue), snapshot) in args
        .input_directories
        .iter()
        .zip(&args.catalogues)
        .zip(&args.snapshots)
    {
        loaded.push(loader.load(directory, catalogue, snapshot)?);
    }

    if let Some(names) = &args.run_names {
        return Ok(names
            .iter()
            .zip(&loaded)
            .map(|(name, metadata)| ResolvedRun {
                name: name.clone(),
                redshift: metadata.redshift,
            })
            .collect());
    }

    // Redshifts are compared at presentation precision; runs that agree to
    // three decimals are treated as one epoch.
    let tags: Vec<String> = loaded.iter().map(|m| redshift_tag(m.redshift)).collect();
    let uniform = tags.windows(2).all(|pair| pair[0] == pair[1]);

    Ok(loaded
        .iter()
        .zip(&tags)
        .map(|(metadata, tag)| ResolvedRun {
            name: if uniform {
                metadata.name.clone()
            } else {
                format!("{} (z={tag})", metadata.name)
            },
            redshift: metadata.redshift,
        })
        .collect())
}

pub fn redshift_tag(redshift: f64) -> String {
    format!("{redshift:.3}")
}
