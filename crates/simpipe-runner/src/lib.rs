pub mod args;
pub mod dispatch;
pub mod engine;
pub mod identity;
pub mod orchestrate;
pub mod reconcile;
pub mod store;

pub use args::{Mode, PipelineArgs};
pub use dispatch::{DispatchReport, ScriptJob, ScriptResult};
pub use engine::{
    FigureEngine, PlotterProcess, RunMetadata, RunMetadataLoader, SidecarMetadataLoader,
};
pub use orchestrate::{run_pipeline, PipelineSummary};
