//! Grammar compiler
//!
//! Expands command templates against slot vocabularies and the current set
//! of device tags into a finite phrase corpus. The corpus biases the decoder
//! toward the commands the system can actually act on.

mod compiler;
mod template;
mod vocab;

pub use compiler::{Corpus, compile, expand_templates};
pub use template::{Segment, TEMPLATES, segments, slots};
pub use vocab::{SUBSTITUTION_ORDER, SlotKind, SlotValue, Vocabularies, Vocabulary};
