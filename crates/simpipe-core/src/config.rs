use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// One external figure script declared in `config.yml::scripts`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptConfig {
    /// Script path, relative to the configuration directory.
    pub filename: String,
    #[serde(default)]
    pub caption: String,
    /// Output figure name (no extension); must be disjoint from every other
    /// script's output so parallel jobs never collide.
    #[serde(default)]
    pub output_file: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_true")]
    pub show_on_webpage: bool,
    #[serde(default)]
    pub additional_arguments: BTreeMap<String, serde_yaml::Value>,
    /// Scripts may opt out of comparison mode for performance reasons.
    #[serde(default = "default_true")]
    pub use_for_comparison: bool,
}

fn default_true() -> bool {
    true
}

impl ScriptConfig {
    /// Additional arguments as a `--key value` argv tail.
    pub fn additional_argument_list(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (key, value) in &self.additional_arguments {
            args.push(format!("--{key}"));
            args.push(yaml_scalar_to_string(value));
        }
        args
    }
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Pipeline configuration read from `<config_directory>/config.yml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auto_plotter_directory: Option<String>,
    #[serde(default)]
    pub auto_plotter_registration: Option<String>,
    #[serde(default)]
    pub observational_data_directory: Option<String>,
    #[serde(default = "default_stylesheet")]
    pub matplotlib_stylesheet: String,
    /// Template (relative to the config directory) rendered per run at the
    /// top of the webpage.
    #[serde(default)]
    pub description_template: Option<String>,
    #[serde(default)]
    pub custom_css: Option<String>,
    /// Argv prefix for the figure-engine subprocess.
    #[serde(default)]
    pub plotter_command: Option<Vec<String>>,
    /// Extension of the rendered figure files.
    #[serde(default = "default_figure_format")]
    pub figure_format: String,
    #[serde(default)]
    pub scripts: Vec<ScriptConfig>,

    #[serde(skip)]
    pub config_directory: PathBuf,
}

fn default_stylesheet() -> String {
    "default".to_string()
}

fn default_figure_format() -> String {
    "png".to_string()
}

impl Config {
    pub fn load(config_directory: &Path) -> Result<Config, ConfigError> {
        let path = config_directory.join("config.yml");
        let raw = fs::read_to_string(&path).map_err(|e| ConfigError::ConfigUnreadable {
            path: path.clone(),
            source: e,
        })?;
        let mut config: Config =
            serde_yaml::from_str(&raw).map_err(|e| ConfigError::ConfigParse { path, source: e })?;
        config.config_directory = config_directory.to_path_buf();
        Ok(config)
    }

    /// Scripts that participate in comparison mode.
    pub fn comparison_scripts(&self) -> Vec<&ScriptConfig> {
        self.scripts
            .iter()
            .filter(|script| script.use_for_comparison)
            .collect()
    }

    pub fn stylesheet_location(&self) -> PathBuf {
        self.config_directory.join(&self.matplotlib_stylesheet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = "\
matplotlib_stylesheet: mnras.mplstyle
description_template: description.html
plotter_command: [python3, plot_all.py]
scripts:
  - filename: scripts/density_temperature.py
    output_file: density_temperature
    section: Gas
    title: Density-Temperature
    caption: Phase diagram of all gas particles.
    additional_arguments:
      quantity: masses
      limit: 8
  - filename: scripts/expensive_projection.py
    output_file: projection
    section: Images
    title: Projection
    use_for_comparison: false
    show_on_webpage: false
";

    fn write_config(dir: &Path, contents: &str) {
        fs::write(dir.join("config.yml"), contents).expect("write config.yml");
    }

    #[test]
    fn loads_scripts_with_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        write_config(dir.path(), EXAMPLE);
        let config = Config::load(dir.path()).expect("load");

        assert_eq!(config.matplotlib_stylesheet, "mnras.mplstyle");
        assert_eq!(config.scripts.len(), 2);
        assert!(config.scripts[0].show_on_webpage);
        assert!(config.scripts[0].use_for_comparison);
        assert!(!config.scripts[1].show_on_webpage);
        assert_eq!(
            config.plotter_command.as_deref(),
            Some(&["python3".to_string(), "plot_all.py".to_string()][..])
        );
    }

    #[test]
    fn comparison_scripts_filters_opt_outs() {
        let dir = tempfile::tempdir().expect("temp dir");
        write_config(dir.path(), EXAMPLE);
        let config = Config::load(dir.path()).expect("load");

        let comparison = config.comparison_scripts();
        assert_eq!(comparison.len(), 1);
        assert_eq!(comparison[0].output_file, "density_temperature");
    }

    #[test]
    fn additional_arguments_become_flag_pairs() {
        let dir = tempfile::tempdir().expect("temp dir");
        write_config(dir.path(), EXAMPLE);
        let config = Config::load(dir.path()).expect("load");

        let args = config.scripts[0].additional_argument_list();
        assert_eq!(args, vec!["--limit", "8", "--quantity", "masses"]);
    }

    #[test]
    fn missing_config_is_a_config_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = Config::load(dir.path()).expect_err("must fail");
        assert!(matches!(err, ConfigError::ConfigUnreadable { .. }));
    }
}
