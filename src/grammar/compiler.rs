//! Template expansion into a phrase corpus

use std::collections::BTreeSet;

use super::vocab::{SUBSTITUTION_ORDER, SlotKind, Vocabularies};

/// Deduplicated set of phrases biasing the decoder
///
/// A corpus is a value: a registry change produces a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    lines: BTreeSet<String>,
}

impl Corpus {
    /// Phrases in sorted order
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, line: &str) -> bool {
        self.lines.contains(line)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Newline-delimited text, as written to `local_lm.txt`
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut text = self.lines.iter().cloned().collect::<Vec<_>>().join("\n");
        text.push('\n');
        text
    }

    /// Distinct words across every phrase
    #[must_use]
    pub fn words(&self) -> BTreeSet<&str> {
        self.lines.iter().flat_map(|l| l.split_whitespace()).collect()
    }
}

impl FromIterator<String> for Corpus {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            lines: iter.into_iter().collect(),
        }
    }
}

/// Replace every occurrence of one slot kind with each surface form
fn substitute(entries: BTreeSet<String>, kind: SlotKind, surfaces: &[&str]) -> BTreeSet<String> {
    let placeholder = kind.placeholder();
    entries
        .into_iter()
        .flat_map(|entry| {
            if entry.contains(placeholder) {
                surfaces
                    .iter()
                    .map(|s| entry.replace(placeholder, s))
                    .collect::<Vec<_>>()
            } else {
                vec![entry]
            }
        })
        .collect()
}

/// Expand every value slot, leaving `<tag>` in place
///
/// Slots are substituted one kind per pass in [`SUBSTITUTION_ORDER`], with
/// deduplication after every pass.
#[must_use]
pub fn expand_templates(templates: &[&str], vocabularies: &Vocabularies) -> BTreeSet<String> {
    let mut entries: BTreeSet<String> = templates.iter().map(|t| (*t).to_string()).collect();

    for kind in SUBSTITUTION_ORDER {
        let Some(vocabulary) = vocabularies.get(kind) else {
            continue;
        };
        let surfaces: Vec<&str> = vocabulary.surfaces().collect();
        entries = substitute(entries, kind, &surfaces);
    }

    entries
}

/// Build the full corpus for a set of device tags
///
/// `<tag>` is substituted once against every tag after all other slots are
/// expanded, then the wake word is added as its own line. Blank tags are skipped.
#[must_use]
pub fn compile(
    templates: &[&str],
    vocabularies: &Vocabularies,
    tags: &[String],
    wake_word: &str,
) -> Corpus {
    let expanded = expand_templates(templates, vocabularies);
    let tags: Vec<&str> = tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();

    let mut lines = substitute(expanded, SlotKind::Tag, &tags);
    // Templates still holding `<tag>` with no tags to fill in are dropped
    lines.retain(|l| !l.contains(SlotKind::Tag.placeholder()));

    let wake_word = wake_word.trim();
    if !wake_word.is_empty() {
        lines.insert(wake_word.to_lowercase());
    }

    tracing::debug!(tags = tags.len(), lines = lines.len(), "compiled grammar corpus");
    Corpus { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::TEMPLATES;

    #[test]
    fn test_expand_leaves_tag_slot() {
        let vocab = Vocabularies::standard();
        let expanded = expand_templates(&["turn <tag> <on|off>"], &vocab);

        assert_eq!(expanded.len(), 2);
        assert!(expanded.contains("turn <tag> on"));
        assert!(expanded.contains("turn <tag> off"));
    }

    #[test]
    fn test_compile_scales_with_tags() {
        let vocab = Vocabularies::standard();
        let one = compile(&TEMPLATES, &vocab, &["kitchen".to_string()], "hey beacon");
        let two = compile(
            &TEMPLATES,
            &vocab,
            &["kitchen".to_string(), "office".to_string()],
            "hey beacon",
        );

        // wake word line is shared
        assert_eq!(two.len() - 1, 2 * (one.len() - 1));
    }

    #[test]
    fn test_compile_without_tags_is_wake_word_only() {
        let vocab = Vocabularies::standard();
        let corpus = compile(&TEMPLATES, &vocab, &[], "Hey Beacon");

        assert_eq!(corpus.lines().collect::<Vec<_>>(), vec!["hey beacon"]);
    }

    #[test]
    fn test_to_text_is_newline_delimited() {
        let corpus: Corpus = ["b".to_string(), "a".to_string(), "a".to_string()]
            .into_iter()
            .collect();
        assert_eq!(corpus.to_text(), "a\nb\n");
    }
}
