pub mod config;
pub mod error;
pub mod fsio;
pub mod plot;

pub use config::{Config, ScriptConfig};
pub use error::{ConfigError, CoreError};
pub use plot::{LineSeries, MetadataRecord, PlotDefinition, RunInfo};
