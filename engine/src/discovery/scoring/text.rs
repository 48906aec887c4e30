//! Text pre-processing and the inverted index used for description scoring

use std::collections::HashMap;

const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him", "his",
    "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just", "me", "more", "most",
    "my", "no", "nor", "not", "now", "of", "off", "on", "once", "only", "or", "other", "our",
    "ours", "out", "over", "own", "same", "she", "should", "so", "some", "such", "than", "that",
    "the", "their", "theirs", "them", "then", "there", "these", "they", "this", "those",
    "through", "to", "too", "under", "until", "up", "very", "was", "we", "were", "what", "when",
    "where", "which", "while", "who", "whom", "why", "will", "with", "would", "you", "your",
    "yours",
];

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.binary_search(&word).is_ok()
}

/// Reduces inflected English words to a common stem.
///
/// Deliberately light: only frequent suffixes are stripped and short words are
/// left untouched, so that identifiers and model names survive.
pub fn stem(word: &str) -> String {
    let len = word.chars().count();
    if len <= 3 || !word.chars().all(|c| c.is_ascii_alphabetic()) {
        return word.to_string();
    }

    let rules: &[(&str, &str, usize)] = &[
        ("ational", "ate", 8),
        ("ization", "ize", 8),
        ("fulness", "ful", 8),
        ("ments", "", 7),
        ("ment", "", 7),
        ("ingly", "", 7),
        ("edly", "", 6),
        ("sses", "ss", 5),
        ("ies", "y", 5),
        ("ing", "", 6),
        ("ed", "", 6),
        ("ly", "", 5),
        ("s", "", 4),
    ];

    for (suffix, replacement, min_len) in rules {
        if len >= *min_len && word.ends_with(suffix) {
            if *suffix == "s" && (word.ends_with("ss") || word.ends_with("us") || word.ends_with("is")) {
                return word.to_string();
            }
            let base = &word[..word.len() - suffix.len()];
            return format!("{}{}", base, replacement);
        }
    }
    word.to_string()
}

/// Lowercases, strips punctuation, drops stop words and stems
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .filter(|t| !is_stop_word(t))
        .map(stem)
        .collect()
}

/// Term statistics of one indexed document
#[derive(Debug, Clone, Default)]
pub struct DocumentTerms {
    frequencies: HashMap<String, usize>,
    length: usize,
}

impl DocumentTerms {
    pub fn from_tokens(tokens: Vec<String>) -> Self {
        let length = tokens.len();
        let mut frequencies = HashMap::new();
        for token in tokens {
            *frequencies.entry(token).or_insert(0) += 1;
        }
        Self {
            frequencies,
            length,
        }
    }

    pub fn frequency(&self, term: &str) -> usize {
        self.frequencies.get(term).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Inverted index over a batch of documents
#[derive(Debug, Clone, Default)]
pub struct TextIndex {
    documents: Vec<DocumentTerms>,
    /// term -> number of documents containing it
    document_frequencies: HashMap<String, usize>,
    total_length: usize,
}

impl TextIndex {
    /// Indexes documents in order; `None` stands for a document without text
    pub fn build<'a>(texts: impl IntoIterator<Item = Option<&'a str>>) -> Self {
        let mut index = TextIndex::default();
        for text in texts {
            index.add(text.map(tokenize).unwrap_or_default());
        }
        index
    }

    fn add(&mut self, tokens: Vec<String>) {
        let doc = DocumentTerms::from_tokens(tokens);
        for term in doc.frequencies.keys() {
            *self.document_frequencies.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_length += doc.length;
        self.documents.push(doc);
    }

    pub fn document(&self, index: usize) -> Option<&DocumentTerms> {
        self.documents.get(index)
    }

    pub fn documents_count(&self) -> usize {
        self.documents.len()
    }

    pub fn document_frequency(&self, term: &str) -> usize {
        self.document_frequencies.get(term).copied().unwrap_or(0)
    }

    pub fn average_length(&self) -> f64 {
        if self.documents.is_empty() {
            return 0.0;
        }
        self.total_length as f64 / self.documents.len() as f64
    }
}
