//! Okapi BM25 over pre-tokenized documents.

use std::collections::{HashMap, HashSet};

/// Term-frequency saturation.
pub const K1: f64 = 1.5;
/// Document-length normalization.
pub const B: f64 = 0.75;

#[derive(Debug, Clone, Default)]
pub struct Bm25Index {
    term_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    doc_freqs: HashMap<String, usize>,
    avg_len: f64,
}

impl Bm25Index {
    pub fn new(docs: impl IntoIterator<Item = Vec<String>>) -> Self {
        let mut index = Self::default();
        for tokens in docs {
            let mut freqs: HashMap<String, usize> = HashMap::new();
            for token in &tokens {
                *freqs.entry(token.clone()).or_default() += 1;
            }
            for term in freqs.keys() {
                *index.doc_freqs.entry(term.clone()).or_default() += 1;
            }
            index.doc_lens.push(tokens.len());
            index.term_freqs.push(freqs);
        }

        let total: usize = index.doc_lens.iter().sum();
        if !index.doc_lens.is_empty() {
            index.avg_len = total as f64 / index.doc_lens.len() as f64;
        }
        index
    }

    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    /// Lucene-style IDF; always positive, zero contribution for unseen terms.
    pub fn idf(&self, term: &str) -> f64 {
        let n = self.len() as f64;
        match self.doc_freqs.get(term) {
            Some(&df) => ((n - df as f64 + 0.5) / (df as f64 + 0.5) + 1.0).ln(),
            None => 0.0,
        }
    }

    /// Relevance of document `doc` to `query`. Repeated query terms count once.
    pub fn score(&self, query: &[String], doc: usize) -> f64 {
        let (Some(freqs), Some(&len)) = (self.term_freqs.get(doc), self.doc_lens.get(doc)) else {
            return 0.0;
        };
        if self.avg_len == 0.0 {
            return 0.0;
        }

        let norm = K1 * (1.0 - B + B * len as f64 / self.avg_len);
        let mut seen = HashSet::new();
        query
            .iter()
            .filter(|term| seen.insert(term.as_str()))
            .filter_map(|term| freqs.get(term).map(|&tf| (term, tf as f64)))
            .map(|(term, tf)| self.idf(term) * tf * (K1 + 1.0) / (tf + norm))
            .sum()
    }
}
