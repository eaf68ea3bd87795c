use std::fmt;

pub const SUITS: [&str; 4] = ["Hearts", "Spades", "Diamonds", "Clubs"];

pub const VALUES: [&str; 13] = [
    "Ace", "2", "3", "4", "5", "6", "7", "8", "9", "10", "Jack", "Queen", "King",
];

pub const JOKER_COUNT: u8 = 2;

/// 52 standard cards, two jokers and the card back.
pub const DECK_SIZE: usize = SUITS.len() * VALUES.len() + JOKER_COUNT as usize + 1;

pub const CARD_BACK_KEY: &str = "ZZ_ZZ_00_Card-Back";

const FACE_VALUES: [&str; 6] = ["k", "q", "j", "king", "queen", "jack"];

/// Theme, art technique and background texture shared by every card in a deck.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeckStyle {
    pub theme: String,
    pub technique: String,
    pub background: String,
}

impl DeckStyle {
    pub fn new(
        theme: impl Into<String>,
        technique: impl Into<String>,
        background: impl Into<String>,
    ) -> Self {
        Self {
            theme: theme.into(),
            technique: technique.into(),
            background: background.into(),
        }
    }
}

/// One deck position.
///
/// Standard cards keep their value and suit as free text: values outside
/// [`VALUES`] and suits outside [`SUITS`] are still rendered, they just get
/// the `00` rank index in their key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardDescriptor {
    Standard { value: String, suit: String },
    Joker { index: u8 },
    Back,
}

impl CardDescriptor {
    pub fn standard(value: impl Into<String>, suit: impl Into<String>) -> Self {
        Self::Standard {
            value: value.into(),
            suit: suit.into(),
        }
    }

    /// Filename-safe identifier. `ZZ_` keeps jokers and the back at the end
    /// of a sorted listing.
    pub fn key(&self) -> String {
        match self {
            Self::Standard { value, suit } => {
                format!("{suit}_{}_{value}", rank_index(value).unwrap_or("00"))
            }
            Self::Joker { index } => {
                format!("ZZ_Joker_{:02}_Joker{index}", 13 + u32::from(*index))
            }
            Self::Back => CARD_BACK_KEY.to_string(),
        }
    }

    /// Reverse of [`CardDescriptor::key`], tolerant of hand-edited keys.
    pub fn from_key(key: &str) -> Option<Self> {
        if key.contains("Card-Back") {
            return Some(Self::Back);
        }
        if key.contains("Joker") {
            let index = key
                .rsplit("Joker")
                .next()
                .and_then(|tail| tail.trim().parse::<u8>().ok())
                .filter(|index| *index >= 1)
                .unwrap_or(1);
            return Some(Self::Joker { index });
        }
        let parts: Vec<&str> = key.split('_').collect();
        if parts.len() < 3 {
            return None;
        }
        Some(Self::standard(parts[2], parts[0]))
    }

    pub fn display_name(&self) -> String {
        match self {
            Self::Standard { value, suit } => format!("{value} of {suit}"),
            Self::Joker { index } => format!("Joker {index}"),
            Self::Back => "Card Back".to_string(),
        }
    }

    pub fn is_face_card(&self) -> bool {
        match self {
            Self::Standard { value, .. } => is_face_value(value),
            _ => false,
        }
    }

    /// Membership check against the fixed suit and value lists.
    pub fn is_known(&self) -> bool {
        match self {
            Self::Standard { value, suit } => {
                VALUES.contains(&value.as_str()) && SUITS.contains(&suit.as_str())
            }
            Self::Joker { index } => (1..=JOKER_COUNT).contains(index),
            Self::Back => true,
        }
    }
}

impl fmt::Display for CardDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// Two-digit rank used in keys so files sort Ace..King.
pub fn rank_index(value: &str) -> Option<&'static str> {
    const INDEXES: [&str; 13] = [
        "01", "02", "03", "04", "05", "06", "07", "08", "09", "10", "11", "12", "13",
    ];
    VALUES
        .iter()
        .position(|known| *known == value)
        .map(|idx| INDEXES[idx])
}

pub fn is_face_value(value: &str) -> bool {
    let lowered = value.trim().to_lowercase();
    FACE_VALUES.contains(&lowered.as_str())
}

/// All deck positions in generation order: suits by value, jokers, back.
pub fn standard_deck() -> Vec<CardDescriptor> {
    let mut cards = Vec::with_capacity(DECK_SIZE);
    for suit in SUITS {
        for value in VALUES {
            cards.push(CardDescriptor::standard(value, suit));
        }
    }
    for index in 1..=JOKER_COUNT {
        cards.push(CardDescriptor::Joker { index });
    }
    cards.push(CardDescriptor::Back);
    cards
}

pub fn build_prompt(card: &CardDescriptor, style: &DeckStyle) -> String {
    match card {
        CardDescriptor::Standard { value, suit } => standard_prompt(value, suit, style),
        CardDescriptor::Joker { index } => joker_prompt(*index, style),
        CardDescriptor::Back => card_back_prompt(style),
    }
}

fn standard_prompt(value: &str, suit: &str, style: &DeckStyle) -> String {
    let DeckStyle {
        theme,
        technique,
        background,
    } = style;
    let (subject, composition) = if is_face_value(value) {
        (
            format!(
                "A majestic portrait of a character representing the {value} of {suit}"
            ),
            "centered character bust, facing forward, vertical composition",
        )
    } else {
        (
            format!(
                "A symmetrical decorative arrangement of {value} distinct items \
                 representing {suit}"
            ),
            "objects arranged in a tight central cluster, vertical composition",
        )
    };

    format!(
        "
**ART STYLE:** {technique}.
**THEME:** {theme}.
**FORMAT:** Vertical Art Print (9:16 aspect ratio).

**SUBJECT:**
{subject}.
The artwork must interpret the concept of \"{value}\" and \"{suit}\" \
using the visual language of {theme}.

**COMPOSITION RULES:**
- **Background:** {background} texture. Full bleed. No borders.
- **Layout:** {composition}.
- **Spacing:** Keep the important details clustered in the CENTER. \
Leave empty negative space around the edges (so it doesn't get cut off by a frame later).
- **Style:** Detailed, high-contrast, clean lines.

**NEGATIVE PROMPT:**
- playing card, border, frame, corner text, numbers, letters, symbols, typography, \
zoomed out, table surface, 3d render, text, watermark.
"
    )
}

fn joker_prompt(index: u8, style: &DeckStyle) -> String {
    let DeckStyle {
        theme,
        technique,
        background,
    } = style;
    format!(
        "
**ART STYLE:** {technique}.
**THEME:** {theme}.
**FORMAT:** Vertical Art Print (9:16 aspect ratio).

**SUBJECT:**
A whimsical, mischievous jester or trickster character representing a Joker card \
(Joker #{index}).
The character should be playful, mysterious, and embody chaos and unpredictability.

**COMPOSITION RULES:**
- **Background:** {background} texture. Full bleed.
- **Layout:** Centered character, dynamic pose, vertical composition.
- **Character:** Jester, fool, or trickster in the {theme} style.
- **Style:** Detailed, high-contrast, playful yet elegant.

**NEGATIVE PROMPT:**
- playing card, border, frame, corner text, numbers, letters, typography, zoomed out, \
3d render, text, watermark.
"
    )
}

fn card_back_prompt(style: &DeckStyle) -> String {
    let DeckStyle {
        theme,
        technique,
        background,
    } = style;
    format!(
        "
**ART STYLE:** {technique}.
**THEME:** {theme}.
**FORMAT:** Vertical Art Print (9:16 aspect ratio).

**SUBJECT:**
A decorative card back design for a playing card deck. \
This is the BACK of the card, not the front.
The design should be symmetrical, ornate, and reflect the {theme} theme.

**COMPOSITION RULES:**
- **Background:** {background} texture. Full bleed.
- **Layout:** Perfectly symmetrical design (180-degree rotational symmetry).
- **Central Element:** An ornate medallion, crest, or decorative motif centered on the card.
- **Border:** Intricate repeating pattern forming a decorative frame around the edges.
- **Pattern:** Fill the space between the border and center with repeating \
{theme}-themed decorative elements.
- **Style:** Detailed, high-contrast, clean lines, suitable for the back of playing cards.

**NEGATIVE PROMPT:**
- playing card front, face cards, numbers, suit symbols (hearts, spades, diamonds, clubs), \
asymmetrical design, text, letters, portraits, faces, 3d render, watermark.
"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn style() -> DeckStyle {
        DeckStyle::new("Pirates", "woodcut engraving", "aged parchment")
    }

    #[test]
    fn standard_keys_follow_rank_table() {
        let deck = standard_deck();
        let standard: Vec<&CardDescriptor> = deck
            .iter()
            .filter(|card| matches!(card, CardDescriptor::Standard { .. }))
            .collect();
        assert_eq!(standard.len(), 52);

        for card in standard {
            let CardDescriptor::Standard { value, suit } = card else {
                unreachable!();
            };
            let position = VALUES.iter().position(|known| known == value).unwrap();
            assert_eq!(card.key(), format!("{suit}_{:02}_{value}", position + 1));
        }
        assert_eq!(CardDescriptor::standard("Ace", "Hearts").key(), "Hearts_01_Ace");
        assert_eq!(CardDescriptor::standard("King", "Clubs").key(), "Clubs_13_King");
    }

    #[test]
    fn deck_has_unique_keys_with_specials_last() {
        let deck = standard_deck();
        assert_eq!(deck.len(), DECK_SIZE);
        assert_eq!(DECK_SIZE, 55);

        let keys: Vec<String> = deck.iter().map(CardDescriptor::key).collect();
        let unique: HashSet<&String> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
        assert_eq!(keys[52], "ZZ_Joker_14_Joker1");
        assert_eq!(keys[53], "ZZ_Joker_15_Joker2");
        assert_eq!(keys[54], CARD_BACK_KEY);

        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(&sorted[52..], &keys[52..]);
    }

    #[test]
    fn unknown_values_pass_through_with_zero_rank() {
        let card = CardDescriptor::standard("Eleven", "Stars");
        assert_eq!(card.key(), "Stars_00_Eleven");
        assert!(!card.is_known());
        let prompt = build_prompt(&card, &style());
        assert!(prompt.contains("arrangement of Eleven distinct items representing Stars"));
    }

    #[test]
    fn face_cards_use_portrait_branch_case_insensitively() {
        for value in ["Jack", "Queen", "King", "jack", "QUEEN", "k", "J"] {
            let prompt = build_prompt(&CardDescriptor::standard(value, "Spades"), &style());
            assert!(prompt.contains("majestic portrait"), "{value}");
            assert!(prompt.contains("centered character bust"), "{value}");
            assert!(!prompt.contains("tight central cluster"), "{value}");
        }
        for value in ["Ace", "2", "7", "10", "Joker", "ace"] {
            let prompt = build_prompt(&CardDescriptor::standard(value, "Spades"), &style());
            assert!(prompt.contains("tight central cluster"), "{value}");
            assert!(!prompt.contains("majestic portrait"), "{value}");
        }
    }

    #[test]
    fn prompts_carry_the_deck_style() {
        let style = style();
        for card in standard_deck() {
            let prompt = build_prompt(&card, &style);
            assert!(prompt.contains("**ART STYLE:** woodcut engraving."));
            assert!(prompt.contains("**THEME:** Pirates."));
            assert!(prompt.contains("aged parchment texture"));
        }
        let back = build_prompt(&CardDescriptor::Back, &style);
        assert!(back.contains("180-degree rotational symmetry"));
        let joker = build_prompt(&CardDescriptor::Joker { index: 2 }, &style);
        assert!(joker.contains("(Joker #2)"));
    }

    #[test]
    fn keys_parse_back_into_descriptors() {
        for card in standard_deck() {
            assert_eq!(CardDescriptor::from_key(&card.key()), Some(card));
        }
        assert_eq!(
            CardDescriptor::from_key("Clubs_06_6"),
            Some(CardDescriptor::standard("6", "Clubs"))
        );
        assert_eq!(
            CardDescriptor::from_key("my-Card-Back"),
            Some(CardDescriptor::Back)
        );
        assert_eq!(
            CardDescriptor::from_key("ZZ_Joker_xx"),
            Some(CardDescriptor::Joker { index: 1 })
        );
        assert_eq!(CardDescriptor::from_key("Hearts_01"), None);
        assert_eq!(CardDescriptor::from_key("garbage"), None);
    }
}
