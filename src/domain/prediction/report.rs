//! Ranked classification results

use serde::Serialize;

use crate::domain::labels::ClassLabels;
use crate::domain::DomainError;

/// One (label, probability) pair at its display rank
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPrediction {
    /// 1-based position in the ranking
    pub rank: usize,
    /// Position in the model's output vector
    pub index: usize,
    pub label: String,
    pub probability: f32,
}

/// Result of classifying one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub predicted_index: usize,
    pub predicted_label: String,
    pub confidence: f32,
    /// Confidence as a percentage with two decimals, e.g. `60.00%`
    pub confidence_display: String,
    /// Sorted by probability, highest first; ties keep output order
    pub ranking: Vec<RankedPrediction>,
}

impl ClassificationReport {
    /// Pair `probabilities` with `labels` by index and rank them.
    ///
    /// Fails with [`DomainError::LabelMismatch`] when the label count differs
    /// from the number of model outputs.
    pub fn build(probabilities: &[f32], labels: &ClassLabels) -> Result<Self, DomainError> {
        if probabilities.len() != labels.len() {
            return Err(DomainError::label_mismatch(labels.len(), probabilities.len()));
        }

        let predicted_index = argmax(probabilities)
            .ok_or_else(|| DomainError::inference("Model returned no probabilities"))?;

        let mut order: Vec<usize> = (0..probabilities.len()).collect();
        // sort_by is stable, equal probabilities keep their index order
        order.sort_by(|a, b| probabilities[*b].total_cmp(&probabilities[*a]));

        let ranking = order
            .into_iter()
            .enumerate()
            .map(|(rank, index)| RankedPrediction {
                rank: rank + 1,
                index,
                label: labels.as_slice()[index].clone(),
                probability: probabilities[index],
            })
            .collect();

        let confidence = probabilities[predicted_index];

        Ok(Self {
            predicted_index,
            predicted_label: labels.as_slice()[predicted_index].clone(),
            confidence,
            confidence_display: format_percent(confidence),
            ranking,
        })
    }
}

/// Index of the largest value, the first one on ties
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;

    for (i, value) in values.iter().copied().enumerate() {
        match best {
            Some((_, current)) if value.total_cmp(&current).is_le() => {}
            _ => best = Some((i, value)),
        }
    }

    best.map(|(i, _)| i)
}

pub fn format_percent(probability: f32) -> String {
    format!("{:.2}%", f64::from(probability) * 100.0)
}
