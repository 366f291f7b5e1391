//! Fuzzy device name matching

use crate::registry::normalize_device_name;

/// Edit distance between two strings, counted in characters
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Normalized similarity in `[0, 1]`: `1 - distance / max(len)`
#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }

    #[allow(clippy::cast_precision_loss)]
    let score = 1.0 - levenshtein(a, b) as f64 / longest as f64;
    score
}

/// Best-scoring device for a spoken phrase
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub device_id: String,
    pub tag: String,
    pub similarity: f64,
}

/// Score every `(device id, tag)` pair against the phrase
///
/// Ties at the top score go to the earliest entry, so callers passing tags
/// in registration order get first-registered-wins. Returns `None` only when
/// `tags` is empty; the acceptance threshold is applied by the caller.
#[must_use]
pub fn best_match(phrase: &str, tags: &[(String, String)]) -> Option<Candidate> {
    let phrase = normalize_device_name(phrase);
    let mut best: Option<Candidate> = None;

    for (device_id, tag) in tags {
        let tag = normalize_device_name(tag);
        let score = similarity(&tag, &phrase);

        if best.as_ref().is_none_or(|b| score > b.similarity) {
            best = Some(Candidate {
                device_id: device_id.clone(),
                tag,
                similarity: score,
            });
        }
    }

    best
}
