//! Slot kinds and their spoken vocabularies

use std::collections::BTreeMap;
use std::fmt;

use crate::registry::Capability;

/// A typed slot in a command template
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotKind {
    Tag,
    OnOff,
    PercentageNumber,
    ColorTemperatureNumber,
    CoolerWarmer,
    ColorTemperature,
    Color,
    BrighterDimmer,
    BrightenDim,
    Boolean,
}

/// Order in which the compiler substitutes slots; `<tag>` is left to the caller
pub const SUBSTITUTION_ORDER: [SlotKind; 9] = [
    SlotKind::OnOff,
    SlotKind::PercentageNumber,
    SlotKind::ColorTemperatureNumber,
    SlotKind::CoolerWarmer,
    SlotKind::ColorTemperature,
    SlotKind::Color,
    SlotKind::BrighterDimmer,
    SlotKind::BrightenDim,
    SlotKind::Boolean,
];

impl SlotKind {
    /// Placeholder text as written in templates
    #[must_use]
    pub const fn placeholder(self) -> &'static str {
        match self {
            Self::Tag => "<tag>",
            Self::OnOff => "<on|off>",
            Self::PercentageNumber => "<percentage-number>",
            Self::ColorTemperatureNumber => "<color-temperature-number>",
            Self::CoolerWarmer => "<cooler|warmer>",
            Self::ColorTemperature => "<color-temperature>",
            Self::Color => "<color>",
            Self::BrighterDimmer => "<brighter|dimmer>",
            Self::BrightenDim => "<brighten|dim>",
            Self::Boolean => "<boolean>",
        }
    }

    /// Every slot kind, tag included
    #[must_use]
    pub const fn all() -> [Self; 10] {
        [
            Self::Tag,
            Self::OnOff,
            Self::PercentageNumber,
            Self::ColorTemperatureNumber,
            Self::CoolerWarmer,
            Self::ColorTemperature,
            Self::Color,
            Self::BrighterDimmer,
            Self::BrightenDim,
            Self::Boolean,
        ]
    }

    /// Capability targeted by a command using this slot
    ///
    /// `Boolean` entries carry their own capability; `Tag` targets nothing.
    #[must_use]
    pub const fn capability(self) -> Option<Capability> {
        match self {
            Self::OnOff => Some(Capability::OnOff),
            Self::PercentageNumber | Self::BrighterDimmer | Self::BrightenDim => {
                Some(Capability::Brightness)
            }
            Self::ColorTemperatureNumber | Self::CoolerWarmer | Self::ColorTemperature => {
                Some(Capability::ColorTemperature)
            }
            Self::Color => Some(Capability::Color),
            Self::Tag | Self::Boolean => None,
        }
    }
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.placeholder())
    }
}

/// Semantic value of a spoken slot entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotValue {
    Bool(bool),
    Number(i64),
    Color(&'static str),
    State { value: bool, capability: Capability },
}

/// Ordered `(surface text, value)` pairs for one slot kind
#[derive(Debug, Clone)]
pub struct Vocabulary {
    entries: Vec<(String, SlotValue)>,
}

impl Vocabulary {
    fn new(entries: Vec<(String, SlotValue)>) -> Self {
        Self { entries }
    }

    /// Spoken forms in declaration order
    pub fn surfaces(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(s, _)| s.as_str())
    }

    /// Inverse lookup from spoken form to value
    #[must_use]
    pub fn lookup(&self, surface: &str) -> Option<SlotValue> {
        self.entries
            .iter()
            .find(|(s, _)| s == surface)
            .map(|(_, v)| *v)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Vocabularies for every substitutable slot kind
#[derive(Debug, Clone)]
pub struct Vocabularies {
    by_kind: BTreeMap<SlotKind, Vocabulary>,
}

impl Vocabularies {
    /// The built-in English vocabularies
    #[must_use]
    pub fn standard() -> Self {
        let mut by_kind = BTreeMap::new();

        by_kind.insert(
            SlotKind::OnOff,
            Vocabulary::new(vec![
                ("on".to_string(), SlotValue::Bool(true)),
                ("off".to_string(), SlotValue::Bool(false)),
            ]),
        );
        by_kind.insert(SlotKind::PercentageNumber, Vocabulary::new(percentages()));
        by_kind.insert(
            SlotKind::ColorTemperatureNumber,
            Vocabulary::new(color_temperatures()),
        );
        by_kind.insert(
            SlotKind::CoolerWarmer,
            numbers(&[("cooler", 300), ("warmer", -300)]),
        );
        by_kind.insert(
            SlotKind::ColorTemperature,
            numbers(&[
                ("soft white", 2700),
                ("warm white", 3000),
                ("cool white", 5000),
                ("daylight", 6500),
            ]),
        );
        by_kind.insert(
            SlotKind::Color,
            Vocabulary::new(
                COLORS
                    .iter()
                    .map(|(name, hex)| ((*name).to_string(), SlotValue::Color(hex)))
                    .collect(),
            ),
        );
        by_kind.insert(
            SlotKind::BrighterDimmer,
            numbers(&[("brighter", 10), ("dimmer", -10)]),
        );
        by_kind.insert(SlotKind::BrightenDim, numbers(&[("brighten", 10), ("dim", -10)]));
        by_kind.insert(
            SlotKind::Boolean,
            Vocabulary::new(
                BOOLEAN_STATES
                    .iter()
                    .map(|(word, value, capability)| {
                        (
                            (*word).to_string(),
                            SlotValue::State {
                                value: *value,
                                capability: *capability,
                            },
                        )
                    })
                    .collect(),
            ),
        );

        Self { by_kind }
    }

    /// Vocabulary for a slot kind (`None` for `<tag>`)
    #[must_use]
    pub fn get(&self, kind: SlotKind) -> Option<&Vocabulary> {
        self.by_kind.get(&kind)
    }
}

fn numbers(entries: &[(&str, i64)]) -> Vocabulary {
    Vocabulary::new(
        entries
            .iter()
            .map(|(s, n)| ((*s).to_string(), SlotValue::Number(*n)))
            .collect(),
    )
}

const ONES: [&str; 20] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen",
];

const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

/// Spell 0..=99
fn spell_below_hundred(n: usize) -> String {
    if n < 20 {
        ONES[n].to_string()
    } else if n % 10 == 0 {
        TENS[n / 10].to_string()
    } else {
        format!("{} {}", TENS[n / 10], ONES[n % 10])
    }
}

/// "zero" through "one hundred"
fn percentages() -> Vec<(String, SlotValue)> {
    let mut entries: Vec<(String, SlotValue)> = (0..100_i64)
        .map(|n| {
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            let spoken = spell_below_hundred(n as usize);
            (spoken, SlotValue::Number(n))
        })
        .collect();
    entries.push(("one hundred".to_string(), SlotValue::Number(100)));
    entries
}

/// 1700 K and 2000..=6500 K in 100 K steps, in both spoken forms
///
/// "two thousand seven hundred" and "twenty seven hundred" both map to 2700
fn color_temperatures() -> Vec<(String, SlotValue)> {
    let mut entries = vec![
        ("seventeen hundred".to_string(), SlotValue::Number(1700)),
        ("one thousand seven hundred".to_string(), SlotValue::Number(1700)),
    ];

    for thousands in 2..=6_usize {
        for hundreds in 0..=9_usize {
            let kelvin = thousands * 1000 + hundreds * 100;
            if kelvin > 6500 {
                break;
            }

            #[allow(clippy::cast_possible_wrap)]
            let value = SlotValue::Number(kelvin as i64);

            if hundreds == 0 {
                entries.push((format!("{} thousand", ONES[thousands]), value));
            } else {
                entries.push((
                    format!("{} thousand {} hundred", ONES[thousands], ONES[hundreds]),
                    value,
                ));
                entries.push((
                    format!("{} hundred", spell_below_hundred(thousands * 10 + hundreds)),
                    value,
                ));
            }
        }
    }

    entries
}

const BOOLEAN_STATES: [(&str, bool, Capability); 12] = [
    ("true", true, Capability::Boolean),
    ("false", false, Capability::Boolean),
    ("active", true, Capability::Alarm),
    ("inactive", false, Capability::Alarm),
    ("leaking", true, Capability::Leak),
    ("dry", false, Capability::Leak),
    ("motion", true, Capability::Motion),
    ("no motion", false, Capability::Motion),
    ("open", true, Capability::Open),
    ("closed", false, Capability::Open),
    ("pushed", true, Capability::Pushed),
    ("not pushed", false, Capability::Pushed),
];

const COLORS: [(&str, &str); 148] = [
    ("black", "#000000"),
    ("silver", "#c0c0c0"),
    ("gray", "#808080"),
    ("white", "#ffffff"),
    ("maroon", "#800000"),
    ("red", "#ff0000"),
    ("purple", "#800080"),
    ("fuchsia", "#ff00ff"),
    ("green", "#008000"),
    ("lime", "#00ff00"),
    ("olive", "#808000"),
    ("yellow", "#ffff00"),
    ("navy", "#000080"),
    ("blue", "#0000ff"),
    ("teal", "#008080"),
    ("aqua", "#00ffff"),
    ("orange", "#ffa500"),
    ("alice blue", "#f0f8ff"),
    ("antique white", "#faebd7"),
    ("aquamarine", "#7fffd4"),
    ("azure", "#f0ffff"),
    ("beige", "#f5f5dc"),
    ("bisque", "#ffe4c4"),
    ("blanched almond", "#ffebcd"),
    ("blue violet", "#8a2be2"),
    ("brown", "#a52a2a"),
    ("burlywood", "#deb887"),
    ("cadet blue", "#5f9ea0"),
    ("chartreuse", "#7fff00"),
    ("chocolate", "#d2691e"),
    ("coral", "#ff7f50"),
    ("cornflower blue", "#6495ed"),
    ("corn silk", "#fff8dc"),
    ("crimson", "#dc143c"),
    ("cyan", "#00ffff"),
    ("dark blue", "#00008b"),
    ("dark cyan", "#008b8b"),
    ("dark goldenrod", "#b8860b"),
    ("dark gray", "#a9a9a9"),
    ("dark green", "#006400"),
    ("dark grey", "#a9a9a9"),
    ("dark khaki", "#bdb76b"),
    ("dark magenta", "#8b008b"),
    ("dark olive green", "#556b2f"),
    ("dark orange", "#ff8c00"),
    ("dark orchid", "#9932cc"),
    ("dark red", "#8b0000"),
    ("dark salmon", "#e9967a"),
    ("dark seagreen", "#8fbc8f"),
    ("dark slate blue", "#483d8b"),
    ("dark slate gray", "#2f4f4f"),
    ("dark slate grey", "#2f4f4f"),
    ("dark turquoise", "#00ced1"),
    ("dark violet", "#9400d3"),
    ("deep pink", "#ff1493"),
    ("deep sky blue", "#00bfff"),
    ("dim gray", "#696969"),
    ("dim grey", "#696969"),
    ("dodger blue", "#1e90ff"),
    ("firebrick", "#b22222"),
    ("floral white", "#fffaf0"),
    ("forest green", "#228b22"),
    ("gainsboro", "#dcdcdc"),
    ("ghost white", "#f8f8ff"),
    ("gold", "#ffd700"),
    ("goldenrod", "#daa520"),
    ("green yellow", "#adff2f"),
    ("grey", "#808080"),
    ("honeydew", "#f0fff0"),
    ("hot pink", "#ff69b4"),
    ("indian red", "#cd5c5c"),
    ("indigo", "#4b0082"),
    ("ivory", "#fffff0"),
    ("khaki", "#f0e68c"),
    ("lavender", "#e6e6fa"),
    ("lavender blush", "#fff0f5"),
    ("lawn green", "#7cfc00"),
    ("lemon chiffon", "#fffacd"),
    ("light blue", "#add8e6"),
    ("light coral", "#f08080"),
    ("light cyan", "#e0ffff"),
    ("light goldenrod yellow", "#fafad2"),
    ("light gray", "#d3d3d3"),
    ("light green", "#90ee90"),
    ("light grey", "#d3d3d3"),
    ("light pink", "#ffb6c1"),
    ("light salmon", "#ffa07a"),
    ("light sea green", "#20b2aa"),
    ("light sky blue", "#87cefa"),
    ("light slate gray", "#778899"),
    ("light slate grey", "#778899"),
    ("light steel blue", "#b0c4de"),
    ("light yellow", "#ffffe0"),
    ("lime green", "#32cd32"),
    ("linen", "#faf0e6"),
    ("magenta", "#ff00ff"),
    ("medium aquamarine", "#66cdaa"),
    ("medium blue", "#0000cd"),
    ("medium orchid", "#ba55d3"),
    ("medium purple", "#9370db"),
    ("medium sea green", "#3cb371"),
    ("medium slate blue", "#7b68ee"),
    ("medium spring green", "#00fa9a"),
    ("medium turquoise", "#48d1cc"),
    ("medium violet red", "#c71585"),
    ("midnight blue", "#191970"),
    ("mint cream", "#f5fffa"),
    ("misty rose", "#ffe4e1"),
    ("moccasin", "#ffe4b5"),
    ("navajo white", "#ffdead"),
    ("old lace", "#fdf5e6"),
    ("olive drab", "#6b8e23"),
    ("orange red", "#ff4500"),
    ("orchid", "#da70d6"),
    ("pale goldenrod", "#eee8aa"),
    ("pale green", "#98fb98"),
    ("pale turquoise", "#afeeee"),
    ("pale violet red", "#db7093"),
    ("papaya whip", "#ffefd5"),
    ("peach puff", "#ffdab9"),
    ("peru", "#cd853f"),
    ("pink", "#ffc0cb"),
    ("plum", "#dda0dd"),
    ("powder blue", "#b0e0e6"),
    ("rosy brown", "#bc8f8f"),
    ("royal blue", "#4169e1"),
    ("saddle brown", "#8b4513"),
    ("salmon", "#fa8072"),
    ("sandy brown", "#f4a460"),
    ("sea green", "#2e8b57"),
    ("seashell", "#fff5ee"),
    ("sienna", "#a0522d"),
    ("sky blue", "#87ceeb"),
    ("slate blue", "#6a5acd"),
    ("slate gray", "#708090"),
    ("slate grey", "#708090"),
    ("snow", "#fffafa"),
    ("spring green", "#00ff7f"),
    ("steel blue", "#4682b4"),
    ("tan", "#d2b48c"),
    ("thistle", "#d8bfd8"),
    ("tomato", "#ff6347"),
    ("turquoise", "#40e0d0"),
    ("violet", "#ee82ee"),
    ("wheat", "#f5deb3"),
    ("white smoke", "#f5f5f5"),
    ("yellow green", "#9acd32"),
    ("rebecca purple", "#663399"),
];
