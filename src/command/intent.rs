//! Transcript parsing against the command templates

use regex::Regex;

use crate::grammar::{Segment, SlotKind, SlotValue, TEMPLATES, Vocabularies, segments};
use crate::registry::{Capability, PropertyValue};
use crate::{Error, Result};

/// What a command does to the target property
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Write an absolute value
    Set(PropertyValue),
    /// Read, add the delta, write back
    Adjust(f64),
    /// Read and compare against the expected value
    Query(PropertyValue),
}

/// A parsed command, before the device phrase is resolved
#[derive(Debug, Clone, PartialEq)]
pub struct CommandIntent {
    /// Device name as heard
    pub device_phrase: String,
    /// Capability the command targets
    pub capability: Capability,
    pub operation: Operation,
}

#[derive(Debug)]
struct Pattern {
    template: &'static str,
    regex: Regex,
    value_kind: SlotKind,
    negated: bool,
}

/// Matches transcripts against every template shape
#[derive(Debug)]
pub struct IntentParser {
    patterns: Vec<Pattern>,
    vocabularies: Vocabularies,
}

/// Lower-case, drop punctuation and collapse whitespace
#[must_use]
pub fn normalize_transcript(transcript: &str) -> String {
    crate::registry::normalize_device_name(transcript)
}

impl IntentParser {
    /// Parser over the built-in templates and vocabularies
    ///
    /// # Errors
    ///
    /// Returns error if a template cannot be compiled into a pattern
    pub fn standard() -> Result<Self> {
        Self::new(&TEMPLATES, Vocabularies::standard())
    }

    /// Build a parser for the given templates
    ///
    /// History queries ("when was ... last ...") are part of the corpus but
    /// need event timestamps the registry does not expose, so they are not parsed.
    ///
    /// # Errors
    ///
    /// Returns error if a template cannot be compiled into a pattern
    pub fn new(templates: &[&'static str], vocabularies: Vocabularies) -> Result<Self> {
        let mut patterns = Vec::with_capacity(templates.len());

        for template in templates {
            if template.starts_with("when ") {
                continue;
            }

            let mut source = String::from("^");
            let mut value_kind = None;

            for segment in segments(template) {
                match segment {
                    Segment::Literal(text) => source.push_str(&regex::escape(text)),
                    Segment::Slot(SlotKind::Tag) => source.push_str("(?P<tag>.+?)"),
                    Segment::Slot(kind) => {
                        let Some(vocabulary) = vocabularies.get(kind) else {
                            return Err(Error::Config(format!("no vocabulary for {kind}")));
                        };
                        // Longest alternatives first so "dark red" wins over "red"
                        let mut surfaces: Vec<&str> = vocabulary.surfaces().collect();
                        surfaces.sort_by_key(|s| std::cmp::Reverse(s.len()));
                        let alternation = surfaces
                            .iter()
                            .map(|s| regex::escape(s))
                            .collect::<Vec<_>>()
                            .join("|");
                        source.push_str(&format!("(?P<value>{alternation})"));
                        value_kind = Some(kind);
                    }
                }
            }
            source.push('$');

            let Some(value_kind) = value_kind else {
                continue;
            };
            let regex = Regex::new(&source)
                .map_err(|e| Error::Config(format!("invalid template '{template}': {e}")))?;

            patterns.push(Pattern {
                template,
                regex,
                value_kind,
                negated: template.contains(" not <boolean>"),
            });
        }

        Ok(Self {
            patterns,
            vocabularies,
        })
    }

    /// Parse a transcript into an intent
    ///
    /// Templates are tried in order; the first one that matches and yields a
    /// usable value wins.
    #[must_use]
    pub fn parse(&self, transcript: &str) -> Option<CommandIntent> {
        let text = normalize_transcript(transcript);
        if text.is_empty() {
            return None;
        }

        self.patterns.iter().find_map(|pattern| {
            let caps = pattern.regex.captures(&text)?;
            let phrase = caps.name("tag")?.as_str().trim();
            let surface = caps.name("value")?.as_str();
            let value = self.vocabularies.get(pattern.value_kind)?.lookup(surface)?;

            let (capability, operation) = Self::operation(pattern.value_kind, value, pattern.negated)?;
            tracing::trace!(template = pattern.template, phrase, "transcript matched template");

            Some(CommandIntent {
                device_phrase: phrase.to_string(),
                capability,
                operation,
            })
        })
    }

    fn operation(kind: SlotKind, value: SlotValue, negated: bool) -> Option<(Capability, Operation)> {
        #[allow(clippy::cast_precision_loss)]
        let op = match (kind, value) {
            (SlotKind::Boolean, SlotValue::State { value, capability }) => {
                return Some((capability, Operation::Query(PropertyValue::Bool(value != negated))));
            }
            (SlotKind::OnOff, SlotValue::Bool(on)) => Operation::Set(PropertyValue::Bool(on)),
            (
                SlotKind::PercentageNumber
                | SlotKind::ColorTemperatureNumber
                | SlotKind::ColorTemperature,
                SlotValue::Number(n),
            ) => Operation::Set(PropertyValue::Number(n as f64)),
            (
                SlotKind::CoolerWarmer | SlotKind::BrighterDimmer | SlotKind::BrightenDim,
                SlotValue::Number(n),
            ) => Operation::Adjust(n as f64),
            (SlotKind::Color, SlotValue::Color(hex)) => Operation::Set(PropertyValue::Text(hex.to_string())),
            _ => return None,
        };
        Some((kind.capability()?, op))
    }
}
