//! Class label table.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Class index -> human-readable name, read once from a JSON object keyed by
/// the stringified index (`{"0": "Acartia", "1": "Calanus", ...}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    labels: HashMap<String, String>,
}

impl LabelTable {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let labels: HashMap<String, String> = serde_json::from_str(&content)?;
        if labels.is_empty() {
            return Err(Error::Runtime(format!(
                "Label table {} is empty",
                path.display()
            )));
        }
        log::info!("Loaded {} class labels from {}", labels.len(), path.display());
        Ok(Self { labels })
    }

    pub fn from_map(labels: HashMap<String, String>) -> Self {
        Self { labels }
    }

    /// Name of class `index`.
    pub fn get(&self, index: usize) -> Result<&str> {
        self.labels
            .get(&index.to_string())
            .map(String::as_str)
            .ok_or_else(|| Error::Runtime(format!("No label for class index {}", index)))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl<const N: usize> From<[(usize, &str); N]> for LabelTable {
    fn from(entries: [(usize, &str); N]) -> Self {
        Self::from_map(
            entries
                .into_iter()
                .map(|(i, name)| (i.to_string(), name.to_string()))
                .collect(),
        )
    }
}
