//! BM25 variant with a smoothed, never negative inverse document frequency

use crate::discovery::scoring::text::{DocumentTerms, TextIndex};
use crate::errors::DiscoveryError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImprovedBm25 {
    k1: f64,
    b: f64,
    delta: f64,
}

impl Default for ImprovedBm25 {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            delta: 1.0,
        }
    }
}

impl ImprovedBm25 {
    pub fn new(k1: f64, b: f64, delta: f64) -> Result<Self, DiscoveryError> {
        if !(k1 >= 0.0) {
            return Err(DiscoveryError::invalid_argument(format!("negative k1 = {}", k1)));
        }
        if !(0.0..=1.0).contains(&b) {
            return Err(DiscoveryError::invalid_argument(format!("invalid b = {}", b)));
        }
        if !(delta >= 0.0) {
            return Err(DiscoveryError::invalid_argument(format!("invalid delta = {}", delta)));
        }
        Ok(Self { k1, b, delta })
    }

    /// `ln((N - n + 0.5) / (n + 0.5) + 1)`, strictly positive for `n <= N`
    pub fn idf(&self, documents: usize, containing: usize) -> f64 {
        let n_docs = documents as f64;
        let n = containing as f64;
        ((n_docs - n + 0.5) / (n + 0.5) + 1.0).ln()
    }

    /// Score of a single term occurring `freq` times in a document of `doc_len` terms
    pub fn score(
        &self,
        freq: f64,
        doc_len: f64,
        avg_doc_len: f64,
        documents: usize,
        containing: usize,
    ) -> f64 {
        if freq <= 0.0 {
            return 0.0;
        }
        let length_ratio = if avg_doc_len > 0.0 {
            doc_len / avg_doc_len
        } else {
            1.0
        };
        let tf = freq * (self.k1 + 1.0) / (freq + self.k1 * (1.0 - self.b + self.b * length_ratio));
        (tf + self.delta) * self.idf(documents, containing)
    }

    /// Sum of term scores of a document for the distinct query terms
    pub fn score_document(&self, index: &TextIndex, doc: &DocumentTerms, query_terms: &[String]) -> f64 {
        let documents = index.documents_count();
        let avg = index.average_length();
        query_terms
            .iter()
            .map(|term| {
                self.score(
                    doc.frequency(term) as f64,
                    doc.len() as f64,
                    avg,
                    documents,
                    index.document_frequency(term),
                )
            })
            .sum()
    }

    /// Score of an ideal document holding every query term once at average length
    pub fn perfect_match_score(&self, index: &TextIndex, query_terms: &[String]) -> f64 {
        let documents = index.documents_count();
        let avg = index.average_length();
        query_terms
            .iter()
            .map(|term| self.score(1.0, avg, avg, documents, index.document_frequency(term)))
            .sum()
    }
}
