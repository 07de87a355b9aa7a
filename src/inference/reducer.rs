//! Result reducer: raw score row -> ranked classification.

use std::time::Duration;

use ndarray::Array2;
use serde::{Serialize, Serializer};

use crate::defaults;
use crate::error::{Error, Result};
use crate::model::LabelTable;

/// Serialize a duration as fractional milliseconds.
pub(crate) fn as_millis<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

/// One ranked class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassScore {
    pub label: String,
    /// Raw model score, expected in [0, 1]
    pub confidence: f32,
    /// `confidence` scaled to percent
    pub percentage: f32,
}

/// Wall-clock time per pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageTimings {
    /// Cache lookup plus artifact load on a miss
    #[serde(serialize_with = "as_millis")]
    pub model_load: Duration,
    #[serde(serialize_with = "as_millis")]
    pub preprocessing: Duration,
    #[serde(serialize_with = "as_millis")]
    pub inference: Duration,
    #[serde(serialize_with = "as_millis")]
    pub postprocessing: Duration,
    #[serde(serialize_with = "as_millis")]
    pub total: Duration,
    /// Whether the model was already resident
    pub cache_hit: bool,
}

/// Ranked result of one classification request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub model_id: String,
    pub architecture: String,
    pub predicted_class: String,
    pub confidence: f32,
    /// Highest scores first
    pub top_k: Vec<ClassScore>,
    /// Human-readable summary of the top class
    pub message: String,
    pub performance: StageTimings,
}

/// Ranked classes without request metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    pub top_k: Vec<ClassScore>,
    pub message: String,
}

impl Ranking {
    pub fn predicted(&self) -> &ClassScore {
        // `reduce` never builds an empty ranking.
        &self.top_k[0]
    }
}

/// Pick the `TOP_K` highest scores of the single row in `scores`.
///
/// Ties keep the lower class index first.
pub fn reduce(scores: &Array2<f32>, labels: &LabelTable) -> Result<Ranking> {
    if scores.nrows() == 0 || scores.ncols() == 0 {
        return Err(Error::Runtime("model produced no predictions".into()));
    }

    let row = scores.row(0);
    if row.iter().any(|score| !score.is_finite()) {
        return Err(Error::Runtime("model produced non-finite scores".into()));
    }
    let mut ranked: Vec<(usize, f32)> = row.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(defaults::TOP_K);

    let top_k = ranked
        .into_iter()
        .map(|(index, confidence)| {
            Ok(ClassScore {
                label: labels.get(index)?.to_string(),
                confidence,
                percentage: confidence * 100.0,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let message = format!(
        "Prediction result: {} ({:.2}%)",
        top_k[0].label,
        top_k[0].percentage
    );

    Ok(Ranking { top_k, message })
}
