//! TF-IDF over item text

use crate::config::FeatureConfig;
use crate::types::ItemRecord;
use ndarray::Array2;
use std::collections::{BTreeMap, HashMap, HashSet};

const TITLE_REPEAT: usize = 3;
const CATEGORY_REPEAT: usize = 2;
const MIN_TOKEN_LEN: usize = 2;

const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "either",
    "else", "etc", "even", "ever", "every", "few", "for", "from", "further", "had", "has", "have",
    "having", "he", "her", "here", "hers", "herself", "him", "himself", "his", "how", "however",
    "if", "in", "into", "is", "it", "its", "itself", "just", "least", "less", "many", "may", "me",
    "might", "more", "most", "much", "must", "my", "myself", "neither", "no", "nor", "not", "now",
    "of", "off", "often", "on", "once", "only", "or", "other", "our", "ours", "ourselves", "out",
    "over", "own", "per", "perhaps", "rather", "same", "she", "should", "since", "so", "some",
    "still", "such", "than", "that", "the", "their", "theirs", "them", "themselves", "then",
    "there", "these", "they", "this", "those", "though", "through", "thus", "to", "too", "under",
    "until", "up", "upon", "us", "very", "was", "we", "well", "were", "what", "whatever", "when",
    "where", "whether", "which", "while", "who", "whom", "whose", "why", "will", "with", "within",
    "without", "would", "yet", "you", "your", "yours", "yourself", "yourselves",
];

/// Weighted text document for an item
pub fn item_document(item: &ItemRecord) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for _ in 0..TITLE_REPEAT {
        parts.push(&item.title);
    }
    parts.push(&item.description);
    parts.extend(item.tags.iter().map(String::as_str));
    if let Some(category) = item.category.as_deref() {
        for _ in 0..CATEGORY_REPEAT {
            parts.push(category);
        }
    }
    parts.join(" ")
}

/// Lowercase, turn non-alphanumerics into separators, drop short tokens
pub fn tokenize(text: &str, stop_words: Option<&HashSet<&'static str>>) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN)
        .filter(|t| stop_words.map_or(true, |sw| !sw.contains(*t)))
        .map(str::to_string)
        .collect()
}

fn ngrams(tokens: &[String], min_n: usize, max_n: usize) -> Vec<String> {
    let mut terms = Vec::new();
    for n in min_n..=max_n {
        if n == 0 || n > tokens.len() {
            continue;
        }
        for window in tokens.windows(n) {
            terms.push(window.join(" "));
        }
    }
    terms
}

/// Fitted TF-IDF vocabulary with smoothed inverse document frequencies
#[derive(Debug, Clone, PartialEq)]
pub struct TfidfModel {
    vocabulary: Vec<String>,
    idf: Vec<f32>,
}

impl TfidfModel {
    /// Fit on `documents` and return the model with its L2-normalized document-term matrix
    pub fn fit_transform(documents: &[String], config: &FeatureConfig) -> (Self, Array2<f32>) {
        let stop_words: Option<HashSet<&'static str>> = config
            .stop_words
            .then(|| ENGLISH_STOP_WORDS.iter().copied().collect());

        let term_counts: Vec<HashMap<String, usize>> = documents
            .iter()
            .map(|doc| {
                let tokens = tokenize(doc, stop_words.as_ref());
                let mut counts = HashMap::new();
                for term in ngrams(&tokens, config.ngram_min, config.ngram_max) {
                    *counts.entry(term).or_insert(0) += 1;
                }
                counts
            })
            .collect();

        let n_docs = documents.len();
        let max_doc_count = config.max_df as f64 * n_docs as f64;

        // term -> (document frequency, corpus frequency)
        let mut stats: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for counts in &term_counts {
            for (term, &count) in counts {
                let entry = stats.entry(term.as_str()).or_insert((0, 0));
                entry.0 += 1;
                entry.1 += count;
            }
        }

        let mut kept: Vec<(&str, usize, usize)> = stats
            .into_iter()
            .filter(|(_, (df, _))| *df >= config.min_df && (*df as f64) <= max_doc_count)
            .map(|(term, (df, tf))| (term, df, tf))
            .collect();

        if kept.len() > config.max_features {
            kept.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(b.0)));
            kept.truncate(config.max_features);
        }
        kept.sort_by(|a, b| a.0.cmp(b.0));

        let vocabulary: Vec<String> = kept.iter().map(|(t, _, _)| t.to_string()).collect();
        let idf: Vec<f32> = kept
            .iter()
            .map(|(_, df, _)| (((1 + n_docs) as f32) / ((1 + df) as f32)).ln() + 1.0)
            .collect();
        let column: HashMap<&str, usize> = vocabulary
            .iter()
            .enumerate()
            .map(|(i, t)| (t.as_str(), i))
            .collect();

        let mut matrix = Array2::<f32>::zeros((n_docs, vocabulary.len()));
        for (row, counts) in term_counts.iter().enumerate() {
            for (term, &count) in counts {
                if let Some(&col) = column.get(term.as_str()) {
                    matrix[[row, col]] = count as f32 * idf[col];
                }
            }
            let norm = matrix.row(row).dot(&matrix.row(row)).sqrt();
            if norm > 0.0 {
                matrix.row_mut(row).mapv_inplace(|v| v / norm);
            }
        }

        (Self { vocabulary, idf }, matrix)
    }

    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    pub fn idf(&self) -> &[f32] {
        &self.idf
    }

    pub fn len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocabulary.is_empty()
    }
}
