//! Command templates

use super::vocab::SlotKind;

/// The built-in command templates
///
/// Ordering matters for parsing: the more specific shape of a pair
/// ("the <tag> light", "not <boolean>") comes first.
pub const TEMPLATES: [&str; 31] = [
    // on/off
    "turn the <tag> light <on|off>",
    "turn <tag> <on|off>",
    "shut the <tag> light <on|off>",
    "shut <tag> <on|off>",
    "switch the <tag> light <on|off>",
    "switch <tag> <on|off>",
    // color temperature
    "make the <tag> light <cooler|warmer>",
    "make <tag> <cooler|warmer>",
    "set the <tag> light to <color-temperature-number> kelvin",
    "set <tag> to <color-temperature-number> kelvin",
    "set the <tag> light to <color-temperature>",
    "set <tag> to <color-temperature>",
    "change the <tag> light to <color-temperature>",
    "change <tag> to <color-temperature>",
    // brightness
    "make the <tag> light <brighter|dimmer>",
    "make <tag> <brighter|dimmer>",
    "<brighten|dim> the <tag> light",
    "<brighten|dim> <tag>",
    "set the <tag> light to <percentage-number> percent",
    "set <tag> to <percentage-number> percent",
    "change the <tag> light to <percentage-number> percent",
    "change <tag> to <percentage-number> percent",
    // color
    "make the <tag> light <color>",
    "make <tag> <color>",
    "set the <tag> light to <color>",
    "set <tag> to <color>",
    "change the <tag> light to <color>",
    "change <tag> to <color>",
    // booleans
    "when was <tag> last <boolean>",
    "is <tag> not <boolean>",
    "is <tag> <boolean>",
];

/// A template split into literal text and slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    Slot(SlotKind),
}

/// Split a template into literal and slot segments
///
/// Unknown `<...>` sequences are kept as literal text.
#[must_use]
pub fn segments(template: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find('<') {
        let Some(len) = rest[start..].find('>') else {
            break;
        };
        let candidate = &rest[start..=start + len];

        match SlotKind::all().into_iter().find(|k| k.placeholder() == candidate) {
            Some(kind) => {
                if start > 0 {
                    out.push(Segment::Literal(&rest[..start]));
                }
                out.push(Segment::Slot(kind));
            }
            None => out.push(Segment::Literal(&rest[..=start + len])),
        }
        rest = &rest[start + len + 1..];
    }

    if !rest.is_empty() {
        out.push(Segment::Literal(rest));
    }
    out
}

/// Slot kinds used by a template, in order of appearance
#[must_use]
pub fn slots(template: &str) -> Vec<SlotKind> {
    segments(template)
        .into_iter()
        .filter_map(|s| match s {
            Segment::Slot(kind) => Some(kind),
            Segment::Literal(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments() {
        assert_eq!(
            segments("set <tag> to <percentage-number> percent"),
            vec![
                Segment::Literal("set "),
                Segment::Slot(SlotKind::Tag),
                Segment::Literal(" to "),
                Segment::Slot(SlotKind::PercentageNumber),
                Segment::Literal(" percent"),
            ]
        );
        assert_eq!(
            segments("<brighten|dim> <tag>"),
            vec![
                Segment::Slot(SlotKind::BrightenDim),
                Segment::Literal(" "),
                Segment::Slot(SlotKind::Tag),
            ]
        );
    }

    #[test]
    fn test_every_template_has_tag_and_one_value_slot() {
        for template in TEMPLATES {
            let kinds = slots(template);
            assert_eq!(kinds.len(), 2, "{template}");
            assert!(kinds.contains(&SlotKind::Tag), "{template}");
        }
    }
}
