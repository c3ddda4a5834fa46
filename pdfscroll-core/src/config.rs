use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::error::{ViewerError, ViewerResult};

/// Tunables for layout, hit-testing and input handling. Every field has a
/// default, so a config file only needs to name what it overrides.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Vertical gap between pages, also used above the first page.
    pub page_gap: f32,
    /// Horizontal room left free when fitting the first page to the viewport.
    pub fit_margin: f32,
    pub zoom_increment: f32,
    pub min_zoom: f32,
    /// Extra canvas units around each glyph that still count as a hit.
    pub hit_halo: f32,
    pub hit_cell_size: f32,
    /// Cutoff for the nearest-glyph fallback, in canvas units.
    pub hit_max_distance: f32,
    pub hit_vertical_weight: f32,
    /// Two glyphs whose vertical centres differ by at most this share a line.
    pub line_tolerance: f32,
    pub selection_run_gap: f32,
    pub word_gap: f32,
    pub scroll_step: f32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "resize_debounce_ms")]
    pub resize_debounce: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "initial_load_delay_ms")]
    pub initial_load_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "initial_search_delay_ms")]
    pub initial_search_delay: Duration,
    pub allowed_link_schemes: Vec<String>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            page_gap: 10.0,
            fit_margin: 40.0,
            zoom_increment: 0.1,
            min_zoom: 0.1,
            hit_halo: 2.0,
            hit_cell_size: 8.0,
            hit_max_distance: 50.0,
            hit_vertical_weight: 2.0,
            line_tolerance: 5.0,
            selection_run_gap: 10.0,
            word_gap: 3.0,
            scroll_step: 40.0,
            resize_debounce: Duration::from_millis(300),
            initial_load_delay: Duration::from_millis(100),
            initial_search_delay: Duration::from_millis(150),
            allowed_link_schemes: ["http", "https", "mailto", "ftp"]
                .iter()
                .map(|scheme| scheme.to_string())
                .collect(),
        }
    }
}

impl ViewerConfig {
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let config = toml::from_str(raw).context("failed to parse viewer config")?;
        Ok(config)
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> ViewerResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let config = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))
            .and_then(|raw| Self::from_toml_str(&raw))
            .map_err(|source| ViewerError::Config {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(config)
    }
}
