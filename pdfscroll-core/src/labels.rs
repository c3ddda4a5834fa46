use std::collections::HashMap;

use tracing::{debug, warn};

use crate::backend::DocumentBackend;

/// Logical page names, built once when the document is opened. Pages
/// without a label use their 1-based physical number.
#[derive(Debug, Clone, Default)]
pub struct PageLabels {
    labels: Vec<String>,
    by_name: HashMap<String, usize>,
}

impl PageLabels {
    pub fn load(backend: &dyn DocumentBackend) -> Self {
        let labels = (0..backend.page_count())
            .map(|page| {
                backend
                    .page_label(page)
                    .filter(|label| !label.trim().is_empty())
                    .unwrap_or_else(|| (page + 1).to_string())
            })
            .collect();
        Self::from_labels(labels)
    }

    pub fn from_labels(labels: Vec<String>) -> Self {
        let mut by_name = HashMap::with_capacity(labels.len());
        for (page, label) in labels.iter().enumerate() {
            // First page carrying a duplicated label wins.
            by_name.entry(label.to_lowercase()).or_insert(page);
        }
        debug!(pages = labels.len(), "page labels loaded");
        Self { labels, by_name }
    }

    pub fn label(&self, page: usize) -> Option<&str> {
        self.labels.get(page).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Case-insensitive label match, then a 1-based physical page number.
    pub fn resolve(&self, input: &str) -> Option<usize> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        if let Some(&page) = self.by_name.get(&input.to_lowercase()) {
            return Some(page);
        }
        input
            .parse::<usize>()
            .ok()
            .filter(|number| (1..=self.labels.len()).contains(number))
            .map(|number| number - 1)
    }

    /// Like [`PageLabels::resolve`] but lands on the first page when the
    /// input is missing or cannot be resolved.
    pub fn resolve_or_first(&self, input: Option<&str>) -> usize {
        match input {
            Some(input) => self.resolve(input).unwrap_or_else(|| {
                warn!(input, "unknown page, starting at the first page");
                0
            }),
            None => 0,
        }
    }
}
