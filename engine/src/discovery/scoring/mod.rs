//! Scoring of candidate devices against the criteria of a device template

pub mod bm25;
pub mod text;

use crate::discovery::scoring::bm25::ImprovedBm25;
use crate::discovery::scoring::text::{tokenize, TextIndex};
use crate::models::description::DeviceDescription;
use crate::models::template::{ScoringCriterion, DeviceTemplate};

/// Per-batch scoring state; owns the text index of the batch's descriptions
#[derive(Debug)]
pub struct ScoringContext {
    index: TextIndex,
    bm25: ImprovedBm25,
}

impl ScoringContext {
    /// Indexes the descriptions; candidates are later addressed by their position in `batch`
    pub fn new(batch: &[&DeviceDescription]) -> Self {
        Self::with_ranker(batch, ImprovedBm25::default())
    }

    pub fn with_ranker(batch: &[&DeviceDescription], bm25: ImprovedBm25) -> Self {
        let index = TextIndex::build(batch.iter().map(|d| d.description.as_deref()));
        Self { index, bm25 }
    }

    /// Sum of all criterion increments; NaN and negative totals become zero
    pub fn total_score(&self, template: &DeviceTemplate, position: usize, device: &DeviceDescription) -> f64 {
        let sum: f64 = template
            .scoring_criteria
            .iter()
            .map(|c| self.score_increment(c, position, device))
            .sum();
        if sum.is_nan() || sum < 0.0 {
            0.0
        } else {
            sum
        }
    }

    pub fn score_increment(&self, criterion: &ScoringCriterion, position: usize, device: &DeviceDescription) -> f64 {
        match criterion {
            ScoringCriterion::Description {
                query,
                exact_match_score,
            } => self.description_score(query, position) * exact_match_score,
            ScoringCriterion::Term {
                field,
                operator,
                pattern,
                score_increment,
            } => {
                if operator.apply(field.get(device), pattern) {
                    *score_increment
                } else {
                    0.0
                }
            }
            ScoringCriterion::StringCapability {
                capability_name,
                operator,
                pattern,
                score_increment,
            } => {
                let value = device.capability(capability_name).map(|v| v.as_text());
                if operator.apply(value.as_deref(), pattern) {
                    *score_increment
                } else {
                    0.0
                }
            }
            ScoringCriterion::NumberCapability {
                capability_name,
                operator,
                threshold,
                score_increment,
            } => match device.capability(capability_name).and_then(|v| v.as_number()) {
                Some(value) if operator.apply(value, *threshold) => *score_increment,
                _ => 0.0,
            },
            ScoringCriterion::BooleanCapability {
                capability_name,
                true_score_increment,
                false_score_increment,
            } => match device.capability(capability_name).and_then(|v| v.as_bool()) {
                Some(true) => *true_score_increment,
                Some(false) => *false_score_increment,
                None => 0.0,
            },
        }
    }

    /// Relevance of the document at `position` relative to a perfect match, in `[0, 1]`
    pub fn description_score(&self, query: &str, position: usize) -> f64 {
        let Some(doc) = self.index.document(position) else {
            return 0.0;
        };
        if doc.is_empty() {
            return 0.0;
        }

        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();
        if terms.is_empty() {
            return 0.0;
        }

        let perfect = self.bm25.perfect_match_score(&self.index, &terms);
        if perfect <= 0.0 {
            return 0.0;
        }
        let raw = self.bm25.score_document(&self.index, doc, &terms);
        (raw / perfect).min(1.0)
    }
}
