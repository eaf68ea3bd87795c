use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyleOption {
    pub label: &'static str,
    pub description: &'static str,
}

pub type StyleCatalogue = IndexMap<String, StyleOption>;

pub const DEFAULT_CHOICE: &str = "1";

const TECHNIQUES: [(&str, &str); 16] = [
    ("Vintage Lithograph", "vintage lithograph with rich earthy tones and fine crosshatching"),
    ("Watercolor", "loose watercolor illustration with soft edges and color bleeds"),
    ("Digital Ink", "clean digital ink illustration with bold outlines and flat colors"),
    ("Woodcut Engraving", "traditional woodcut engraving with dramatic black and white contrast"),
    (
        "Art Nouveau",
        "elegant Art Nouveau style with flowing organic lines and decorative flourishes",
    ),
    (
        "Art Deco",
        "geometric Art Deco style with bold shapes, gold accents, and symmetrical patterns",
    ),
    (
        "Japanese Ukiyo-e",
        "traditional Japanese ukiyo-e woodblock print style with flat colors and bold outlines",
    ),
    (
        "Stained Glass",
        "medieval stained glass window style with bold black outlines and jewel-tone colors",
    ),
    (
        "Illuminated Manuscript",
        "ornate illuminated manuscript style with gold leaf details and intricate borders",
    ),
    ("Pop Art", "bold pop art style with halftone dots, primary colors, and comic book aesthetics"),
    (
        "Steampunk",
        "detailed steampunk illustration with brass gears, Victorian machinery, and sepia tones",
    ),
    ("Pixel Art", "retro pixel art style with limited color palette and crisp 16-bit aesthetic"),
    ("Chalk Pastel", "soft chalk pastel illustration with textured strokes and blended colors"),
    ("Etching", "detailed copper plate etching with fine lines and crosshatch shading"),
    (
        "Risograph",
        "modern risograph print style with limited spot colors and slight misregistration",
    ),
    (
        "Tarot Card",
        "mystical tarot card illustration with symbolic imagery and ornate gold details",
    ),
];

const BACKGROUNDS: [(&str, &str); 16] = [
    ("Parchment", "vintage aged parchment paper with subtle tea stains and worn edges"),
    ("Clean White", "pristine bright white premium card stock"),
    ("Dark Marble", "luxurious dark marbled stone texture with gold veining"),
    ("Soft Gradient", "smooth subtle neutral gradient from cream to white"),
    ("Velvet Black", "rich deep black velvet texture"),
    ("Crimson Red", "deep royal crimson red with subtle fabric texture"),
    ("Forest Green", "classic forest green felt texture like a poker table"),
    ("Navy Blue", "sophisticated navy blue with subtle linen texture"),
    ("Gold Foil", "shimmering brushed gold foil metallic surface"),
    ("Silver Metallic", "sleek brushed silver metallic surface"),
    ("Kraft Paper", "natural brown kraft paper with visible fibers"),
    ("Starry Night", "deep cosmic blue-black with scattered tiny stars"),
    ("Wood Grain", "warm polished mahogany wood grain texture"),
    ("Concrete", "modern industrial concrete texture with subtle variations"),
    ("Watercolor Wash", "soft abstract watercolor wash in muted tones"),
    ("Leather", "rich embossed leather texture in burgundy"),
];

pub fn techniques() -> StyleCatalogue {
    catalogue(&TECHNIQUES)
}

pub fn backgrounds() -> StyleCatalogue {
    catalogue(&BACKGROUNDS)
}

fn catalogue(rows: &[(&'static str, &'static str)]) -> StyleCatalogue {
    rows.iter()
        .enumerate()
        .map(|(idx, &(label, description))| {
            (
                (idx + 1).to_string(),
                StyleOption {
                    label,
                    description,
                },
            )
        })
        .collect()
}

/// Looks up a numbered menu choice; anything unknown falls back to option 1.
pub fn resolve_choice(catalogue: &StyleCatalogue, choice: &str) -> (String, StyleOption) {
    let trimmed = choice.trim();
    if let Some(option) = catalogue.get(trimmed) {
        return (trimmed.to_string(), *option);
    }
    let option = catalogue
        .get(DEFAULT_CHOICE)
        .copied()
        .or_else(|| catalogue.values().next().copied())
        .unwrap_or(StyleOption {
            label: "",
            description: "",
        });
    (DEFAULT_CHOICE.to_string(), option)
}

/// Two-column numbered menu.
pub fn format_menu(title: &str, catalogue: &StyleCatalogue) -> String {
    let rule = "─".repeat(60);
    let mut out = format!("\n{rule}\n  {title}\n{rule}\n");
    let items: Vec<(&String, &StyleOption)> = catalogue.iter().collect();
    let half = items.len().div_ceil(2);
    for i in 0..half {
        let (key, option) = items[i];
        let mut line = format!("  {:>2}) {:<25}", key, option.label);
        if let Some((right_key, right)) = items.get(i + half) {
            line.push_str(&format!("  {:>2}) {}", right_key, right.label));
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}
