//! Webpage assembly: turns the merged plot set plus run metadata into a
//! single static `index.html` in the output directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::warn;

use simpipe_core::{Config, PlotDefinition, ScriptConfig};

const PIPELINE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone)]
struct PagePlot {
    filename: String,
    title: String,
    caption: String,
}

#[derive(Debug, Clone)]
struct PageRun {
    name: String,
    redshift: f64,
    description: Option<String>,
}

/// Collects sections of plots and run metadata, then renders them. Ordering
/// on the page is an explicit sort by title (sections and plots alike),
/// applied once at render time.
pub struct WebpageCreator {
    page_name: String,
    figure_extension: String,
    sections: BTreeMap<String, Vec<PagePlot>>,
    runs: Vec<PageRun>,
    custom_css: Option<String>,
}

impl WebpageCreator {
    pub fn new(page_name: &str, figure_extension: &str) -> WebpageCreator {
        WebpageCreator {
            page_name: page_name.to_string(),
            figure_extension: figure_extension.to_string(),
            sections: BTreeMap::new(),
            runs: Vec::new(),
            custom_css: None,
        }
    }

    /// Adds directly computed or reconciled figures. The plot's `filename`
    /// has no extension; the page links `<filename>.<figure_extension>`.
    pub fn add_plots(&mut self, plots: &[PlotDefinition]) {
        for plot in plots {
            self.sections
                .entry(section_or_default(&plot.section))
                .or_default()
                .push(PagePlot {
                    filename: format!("{}.{}", plot.filename, self.figure_extension),
                    title: plot.title.clone(),
                    caption: plot.caption.clone(),
                });
        }
    }

    /// Adds the figures promised by the configured external scripts.
    pub fn add_scripts<'a>(&mut self, scripts: impl IntoIterator<Item = &'a ScriptConfig>) {
        for script in scripts {
            if !script.show_on_webpage {
                continue;
            }
            self.sections
                .entry(section_or_default(&script.section))
                .or_default()
                .push(PagePlot {
                    filename: format!("{}.{}", script.output_file, self.figure_extension),
                    title: script.title.clone(),
                    caption: script.caption.clone(),
                });
        }
    }

    /// Adds one run's header block. The optional description template is a
    /// plain HTML fragment in the config directory with `{name}` and
    /// `{redshift}` placeholders. An unreadable template costs only the
    /// description block, never the page.
    pub fn add_run(&mut self, config: &Config, name: &str, redshift: f64) {
        let description = config.description_template.as_ref().and_then(|template| {
            let path = config.config_directory.join(template);
            match fs::read_to_string(&path) {
                Ok(raw) => Some(
                    raw.replace("{name}", &escape(name))
                        .replace("{redshift}", &format!("{redshift:.3}")),
                ),
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        %err,
                        "description template unreadable; omitting run description"
                    );
                    None
                }
            }
        });
        self.runs.push(PageRun {
            name: name.to_string(),
            redshift,
            description,
        });
    }

    pub fn add_custom_css(&mut self, config: &Config) {
        if let Some(css) = &config.custom_css {
            let path = config.config_directory.join(css);
            match fs::read_to_string(&path) {
                Ok(raw) => self.custom_css = Some(raw),
                Err(err) => warn!(
                    path = %path.display(),
                    %err,
                    "custom css unreadable; falling back to base styles"
                ),
            }
        }
    }

    pub fn render(&self) -> String {
        let mut html = String::with_capacity(16 * 1024);
        html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
        html.push_str("<meta charset=\"utf-8\">\n");
        html.push_str(&format!("<title>{}</title>\n", escape(&self.page_name)));
        html.push_str("<style>\n");
        html.push_str(BASE_CSS);
        if let Some(css) = &self.custom_css {
            html.push_str(css);
            html.push('\n');
        }
        html.push_str("</style>\n</head>\n<body>\n");
        html.push_str(&format!("<h1>{}</h1>\n", escape(&self.page_name)));

        if !self.runs.is_empty() {
            html.push_str("<div class=\"runs\">\n");
            for run in &self.runs {
                html.push_str(&format!(
                    "<div class=\"run\"><h2>{} <span class=\"redshift\">z={:.3}</span></h2>\n",
                    escape(&run.name),
                    run.redshift
                ));
                if let Some(description) = &run.description {
                    html.push_str(description);
                    html.push('\n');
                }
                html.push_str("</div>\n");
            }
            html.push_str("</div>\n");
        }

        // BTreeMap iteration gives the declared sort-by-title section order.
        for (section, plots) in &self.sections {
            html.push_str(&format!("<h2 class=\"section\">{}</h2>\n", escape(section)));
            html.push_str("<div class=\"plots\">\n");
            let mut sorted: Vec<&PagePlot> = plots.iter().collect();
            sorted.sort_by(|a, b| a.title.cmp(&b.title));
            for plot in sorted {
                html.push_str(&format!(
                    "<figure>\n<a href=\"{file}\"><img src=\"{file}\" alt=\"{title}\"></a>\n\
                     <figcaption><strong>{title}</strong> {caption}</figcaption>\n</figure>\n",
                    file = escape(&plot.filename),
                    title = escape(&plot.title),
                    caption = escape(&plot.caption),
                ));
            }
            html.push_str("</div>\n");
        }

        html.push_str(&format!(
            "<footer>Generated by simpipe {} on {}</footer>\n",
            PIPELINE_VERSION,
            Local::now().format("%Y-%m-%d")
        ));
        html.push_str("</body>\n</html>\n");
        html
    }

    pub fn save(&self, output_directory: &Path) -> Result<std::path::PathBuf> {
        let path = output_directory.join("index.html");
        fs::write(&path, self.render())
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

fn section_or_default(section: &str) -> String {
    if section.is_empty() {
        "Uncategorised".to_string()
    } else {
        section.to_string()
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const BASE_CSS: &str = "\
body { font-family: sans-serif; margin: 2em; }
.plots { display: flex; flex-wrap: wrap; gap: 1em; }
figure { margin: 0; max-width: 28em; }
figure img { width: 100%; }
.redshift { color: #666; font-size: 0.8em; }
footer { margin-top: 3em; color: #888; font-size: 0.8em; }
";
