//! Command resolution engine
//!
//! Maps a free-text transcript to a device, property and operation, then
//! applies it through the device client. Resolution never guesses: a device
//! phrase scoring below the acceptance threshold is reported as no match.

mod intent;
mod matcher;
mod property;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

pub use intent::{CommandIntent, IntentParser, Operation, normalize_transcript};
pub use matcher::{Candidate, best_match, levenshtein, similarity};
pub use property::{PropertyKind, ValueError};

use crate::Result;
use crate::registry::{Capability, DeviceClient, DeviceRegistry, PropertyRef, PropertyValue};
use crate::session::CommandHandler;

/// Default similarity a device tag must reach to be accepted
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.7;

/// Why a transcript did not resolve to a device property
#[derive(Debug, Clone, PartialEq)]
pub enum NoMatchReason {
    /// No template shape matched the transcript
    Unparsed,
    /// No device tags are known
    NoDevices,
    /// Best tag scored under the threshold
    BelowThreshold { phrase: String, best: Candidate },
    /// Matched device has no property for the capability
    NoProperty { device_id: String, capability: Capability },
}

impl fmt::Display for NoMatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unparsed => f.write_str("transcript did not match any command"),
            Self::NoDevices => f.write_str("no devices are known"),
            Self::BelowThreshold { phrase, best } => write!(
                f,
                "'{phrase}' is not close enough to any device (best '{}' at {:.2})",
                best.tag, best.similarity
            ),
            Self::NoProperty {
                device_id,
                capability,
            } => write!(f, "device {device_id} has no {capability}"),
        }
    }
}

/// A transcript resolved to one device property
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub candidate: Candidate,
    pub property: PropertyRef,
    pub kind: PropertyKind,
    pub intent: CommandIntent,
}

/// Result of [`Resolver::resolve`]
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Matched(MatchResult),
    NoMatch(NoMatchReason),
}

/// What happened to a command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// The property was written
    Executed { property: PropertyRef, value: PropertyValue },
    /// A query was answered
    Answered {
        property: PropertyRef,
        expected: PropertyValue,
        actual: PropertyValue,
    },
    /// Resolved, but the value or the device refused the action
    Rejected { reason: String },
    NoMatch(NoMatchReason),
}

impl CommandOutcome {
    /// Whether the command counts as handled; a query holds only if the
    /// device is in the asked-about state
    #[must_use]
    pub fn succeeded(&self) -> bool {
        match self {
            Self::Executed { .. } => true,
            Self::Answered {
                expected, actual, ..
            } => expected == actual,
            Self::Rejected { .. } | Self::NoMatch(_) => false,
        }
    }

    /// Whether the transcript matched a command template
    #[must_use]
    pub const fn parsed(&self) -> bool {
        !matches!(self, Self::NoMatch(NoMatchReason::Unparsed))
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Executed { property, value } => write!(f, "set {property} to {value}"),
            Self::Answered {
                property,
                expected,
                actual,
            } => write!(f, "{property} is {actual} (asked about {expected})"),
            Self::Rejected { reason } => write!(f, "rejected: {reason}"),
            Self::NoMatch(reason) => write!(f, "no match: {reason}"),
        }
    }
}

/// Parses transcripts and picks the device they address
#[derive(Debug)]
pub struct Resolver {
    parser: IntentParser,
    threshold: f64,
}

impl Resolver {
    #[must_use]
    pub const fn new(parser: IntentParser, threshold: f64) -> Self {
        Self { parser, threshold }
    }

    /// Resolver over the built-in templates
    ///
    /// # Errors
    ///
    /// Returns error if the built-in templates fail to compile
    pub fn standard(threshold: f64) -> Result<Self> {
        Ok(Self::new(IntentParser::standard()?, threshold))
    }

    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Parse a transcript and pick the closest `(device id, tag)` pair
    ///
    /// # Errors
    ///
    /// Returns the no-match reason when the transcript is unparsed, no tags
    /// are known, or the best tag scores below the threshold
    pub fn match_tags(
        &self,
        transcript: &str,
        tags: &[(String, String)],
    ) -> std::result::Result<(CommandIntent, Candidate), NoMatchReason> {
        let intent = self.parser.parse(transcript).ok_or(NoMatchReason::Unparsed)?;
        let best = best_match(&intent.device_phrase, tags).ok_or(NoMatchReason::NoDevices)?;

        if best.similarity < self.threshold {
            tracing::debug!(
                phrase = %intent.device_phrase,
                best = %best.tag,
                similarity = best.similarity,
                "device phrase below threshold"
            );
            return Err(NoMatchReason::BelowThreshold {
                phrase: intent.device_phrase,
                best,
            });
        }

        Ok((intent, best))
    }

    /// Resolve a transcript against the registry
    #[must_use]
    pub fn resolve(&self, transcript: &str, registry: &DeviceRegistry) -> Resolution {
        let (intent, candidate) = match self.match_tags(transcript, &registry.tags()) {
            Ok(found) => found,
            Err(reason) => return Resolution::NoMatch(reason),
        };

        let Some((property, description)) = registry.property(&candidate.device_id, intent.capability) else {
            return Resolution::NoMatch(NoMatchReason::NoProperty {
                device_id: candidate.device_id,
                capability: intent.capability,
            });
        };
        let Some(kind) = PropertyKind::from_description(&description) else {
            return Resolution::NoMatch(NoMatchReason::NoProperty {
                device_id: candidate.device_id,
                capability: intent.capability,
            });
        };

        if description.read_only && !matches!(intent.operation, Operation::Query(_)) {
            return Resolution::NoMatch(NoMatchReason::NoProperty {
                device_id: candidate.device_id,
                capability: intent.capability,
            });
        }

        Resolution::Matched(MatchResult {
            candidate,
            property,
            kind,
            intent,
        })
    }
}

/// Apply a resolved command with a single registry round trip per step
///
/// Set writes once; adjust and query read first.
pub async fn apply(client: &dyn DeviceClient, matched: &MatchResult) -> CommandOutcome {
    let property = matched.property.clone();
    let kind = matched.kind;

    let result = match &matched.intent.operation {
        Operation::Set(value) => match kind.prepare(value.clone()) {
            Ok(value) => client
                .set_value(&property, value)
                .await
                .map(|value| CommandOutcome::Executed {
                    property: property.clone(),
                    value,
                }),
            Err(e) => return CommandOutcome::Rejected { reason: e.to_string() },
        },
        Operation::Adjust(delta) => {
            let current = match client.get_value(&property).await {
                Ok(v) => v,
                Err(e) => return CommandOutcome::Rejected { reason: e.to_string() },
            };
            match kind.adjust(&current, *delta) {
                Ok(value) => client
                    .set_value(&property, value)
                    .await
                    .map(|value| CommandOutcome::Executed {
                        property: property.clone(),
                        value,
                    }),
                Err(e) => return CommandOutcome::Rejected { reason: e.to_string() },
            }
        }
        Operation::Query(expected) => {
            client
                .get_value(&property)
                .await
                .map(|actual| CommandOutcome::Answered {
                    property: property.clone(),
                    expected: expected.clone(),
                    actual,
                })
        }
    };

    result.unwrap_or_else(|e| {
        tracing::warn!(property = %property, error = %e, "command rejected by device");
        CommandOutcome::Rejected { reason: e.to_string() }
    })
}

/// Resolves and applies transcripts against the live registry
pub struct CommandEngine {
    resolver: Resolver,
    registry: Arc<RwLock<DeviceRegistry>>,
    client: Arc<dyn DeviceClient>,
}

impl CommandEngine {
    #[must_use]
    pub fn new(resolver: Resolver, registry: Arc<RwLock<DeviceRegistry>>, client: Arc<dyn DeviceClient>) -> Self {
        Self {
            resolver,
            registry,
            client,
        }
    }

    /// Resolve without applying
    pub async fn resolve(&self, transcript: &str) -> Resolution {
        let registry = self.registry.read().await;
        self.resolver.resolve(transcript, &registry)
    }

    /// Resolve and apply a transcript
    pub async fn execute(&self, transcript: &str) -> CommandOutcome {
        // The registry lock is released before any device round trip
        let matched = match self.resolve(transcript).await {
            Resolution::Matched(m) => m,
            Resolution::NoMatch(reason) => {
                tracing::info!(transcript, %reason, "command not resolved");
                return CommandOutcome::NoMatch(reason);
            }
        };

        tracing::info!(
            transcript,
            device = %matched.candidate.device_id,
            similarity = matched.candidate.similarity,
            property = %matched.property,
            "command resolved"
        );

        apply(self.client.as_ref(), &matched).await
    }
}

#[async_trait]
impl CommandHandler for CommandEngine {
    async fn handle(&self, transcript: &str) -> CommandOutcome {
        self.execute(transcript).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> Vec<(String, String)> {
        vec![
            ("living".to_string(), "Living Room".to_string()),
            ("kitchen".to_string(), "Kitchen".to_string()),
        ]
    }

    #[test]
    fn test_match_tags_exact() {
        let resolver = Resolver::standard(DEFAULT_MATCH_THRESHOLD).unwrap();
        let (intent, candidate) = resolver
            .match_tags("turn the living room light on", &tags())
            .unwrap();

        assert_eq!(candidate.device_id, "living");
        assert!((candidate.similarity - 1.0).abs() < f64::EPSILON);
        assert_eq!(intent.operation, Operation::Set(PropertyValue::Bool(true)));
    }

    #[test]
    fn test_match_tags_below_threshold() {
        let resolver = Resolver::standard(DEFAULT_MATCH_THRESHOLD).unwrap();
        let err = resolver.match_tags("turn the garage light on", &tags()).unwrap_err();
        assert!(matches!(err, NoMatchReason::BelowThreshold { .. }));
    }

    #[test]
    fn test_outcome_succeeded() {
        let property = PropertyRef {
            device_id: "door".to_string(),
            property: "open".to_string(),
        };
        let held = CommandOutcome::Answered {
            property: property.clone(),
            expected: PropertyValue::Bool(true),
            actual: PropertyValue::Bool(true),
        };
        let not_held = CommandOutcome::Answered {
            property,
            expected: PropertyValue::Bool(true),
            actual: PropertyValue::Bool(false),
        };

        assert!(held.succeeded());
        assert!(!not_held.succeeded());
        assert!(!CommandOutcome::NoMatch(NoMatchReason::Unparsed).succeeded());
    }
}
