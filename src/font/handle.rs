//! Font discovery surface.
//!
//! The engine itself never walks the filesystem; the outer driver hands it
//! `FontHandle`s. Matching by typeface name follows the CSS font-matching
//! algorithm over stretch, style and weight.

use std::path::PathBuf;

/// Upright or italic.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
}

/// CSS-ish font selection properties.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FontProperties {
    pub style: FontStyle,
    /// 100..=900, like `usWeightClass`.
    pub weight: u16,
    /// 1..=9, like `usWidthClass`; 5 is normal.
    pub stretch: u16,
}

impl Default for FontProperties {
    fn default() -> Self {
        FontProperties {
            style: FontStyle::Normal,
            weight: 400,
            stretch: 5,
        }
    }
}

/// One discovered font.
#[derive(Clone, Debug)]
pub struct FontHandle {
    pub display_name: String,
    pub postscript_name: String,
    pub properties: FontProperties,
    pub path: PathBuf,
}

/// Maps the CSS generic family names to platform defaults.
pub fn generic_typeface_name(name: &str) -> Option<&'static str> {
    let candidates: &[&str] = match name {
        "serif" => {
            if cfg!(target_os = "macos") {
                &["Times New Roman", "Times"]
            } else {
                &["Times New Roman", "Liberation Serif", "DejaVu Serif"]
            }
        }
        "sans-serif" => {
            if cfg!(target_os = "macos") {
                &["Helvetica Neue", "Helvetica"]
            } else {
                &["Arial", "Liberation Sans", "DejaVu Sans"]
            }
        }
        "monospace" => {
            if cfg!(target_os = "macos") {
                &["Menlo", "Courier New"]
            } else {
                &["Courier New", "Liberation Mono", "DejaVu Sans Mono"]
            }
        }
        "emoji" => {
            if cfg!(target_os = "macos") {
                &["Apple Color Emoji"]
            } else {
                &["Noto Color Emoji"]
            }
        }
        _ => return None,
    };

    candidates.first().copied()
}

/// Picks the best handle for `desired` among `candidates`.
///
/// Filtering happens in the CSS order: stretch, then style, then weight.
pub fn best_match<'a>(
    desired: &FontProperties,
    candidates: &'a [FontHandle],
) -> Option<&'a FontHandle> {
    if candidates.is_empty() {
        return None;
    }

    // 1. stretch: the fall-back direction depends on which side of normal
    // the desired stretch lies.
    let best_stretch = candidates
        .iter()
        .map(|c| c.properties.stretch)
        .min_by_key(|&s| stretch_distance(desired.stretch, s))?;
    let candidates: Vec<&FontHandle> = candidates
        .iter()
        .filter(|c| c.properties.stretch == best_stretch)
        .collect();

    // 2. style: italic wins only when requested and available, and
    // symmetrically for upright.
    let any_italic = candidates
        .iter()
        .any(|c| c.properties.style == FontStyle::Italic);
    let any_normal = candidates
        .iter()
        .any(|c| c.properties.style == FontStyle::Normal);
    let wanted_style = match desired.style {
        FontStyle::Italic if any_italic => FontStyle::Italic,
        FontStyle::Normal if any_normal => FontStyle::Normal,
        _ => {
            if any_italic {
                FontStyle::Italic
            } else {
                FontStyle::Normal
            }
        }
    };
    let candidates: Vec<&FontHandle> = candidates
        .into_iter()
        .filter(|c| c.properties.style == wanted_style)
        .collect();

    // 3. weight, with the special rule for the [400..500] range.
    candidates
        .into_iter()
        .min_by_key(|c| weight_distance(desired.weight, c.properties.weight))
}

fn stretch_distance(desired: u16, candidate: u16) -> u32 {
    let delta = i32::from(candidate) - i32::from(desired);
    if desired <= 5 {
        // Prefer narrower, then wider.
        if delta <= 0 {
            (-delta) as u32
        } else {
            delta as u32 + 100
        }
    } else {
        // Prefer wider, then narrower.
        if delta >= 0 {
            delta as u32
        } else {
            (-delta) as u32 + 100
        }
    }
}

fn weight_distance(desired: u16, candidate: u16) -> u32 {
    let desired = i32::from(desired);
    let candidate = i32::from(candidate);
    if (400..=500).contains(&desired) {
        // Search upward to 500, then downward, then upward past 500.
        if candidate >= desired && candidate <= 500 {
            (candidate - desired) as u32
        } else if candidate < desired {
            (desired - candidate) as u32 + 100
        } else {
            (candidate - desired) as u32 + 600
        }
    } else if desired < 400 {
        if candidate <= desired {
            (desired - candidate) as u32
        } else {
            (candidate - desired) as u32 + 600
        }
    } else {
        if candidate >= desired {
            (candidate - desired) as u32
        } else {
            (desired - candidate) as u32 + 600
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str, style: FontStyle, weight: u16, stretch: u16) -> FontHandle {
        FontHandle {
            display_name: name.to_string(),
            postscript_name: name.to_string(),
            properties: FontProperties {
                style,
                weight,
                stretch,
            },
            path: PathBuf::from(format!("{name}.otf")),
        }
    }

    #[test]
    fn italic_preferred_when_requested() {
        let candidates = [
            handle("Regular", FontStyle::Normal, 400, 5),
            handle("Italic", FontStyle::Italic, 400, 5),
        ];
        let desired = FontProperties {
            style: FontStyle::Italic,
            ..FontProperties::default()
        };
        assert_eq!(
            best_match(&desired, &candidates).unwrap().display_name,
            "Italic"
        );
    }

    #[test]
    fn weight_400_prefers_500_over_300() {
        let candidates = [
            handle("Light", FontStyle::Normal, 300, 5),
            handle("Medium", FontStyle::Normal, 500, 5),
            handle("Bold", FontStyle::Normal, 700, 5),
        ];
        let desired = FontProperties::default();
        assert_eq!(
            best_match(&desired, &candidates).unwrap().display_name,
            "Medium"
        );
    }

    #[test]
    fn weight_400_prefers_300_over_700() {
        let candidates = [
            handle("Light", FontStyle::Normal, 300, 5),
            handle("Bold", FontStyle::Normal, 700, 5),
        ];
        let desired = FontProperties::default();
        assert_eq!(
            best_match(&desired, &candidates).unwrap().display_name,
            "Light"
        );
    }

    #[test]
    fn narrow_falls_back_narrower_first() {
        let candidates = [
            handle("Condensed", FontStyle::Normal, 400, 3),
            handle("Expanded", FontStyle::Normal, 400, 7),
        ];
        let desired = FontProperties {
            stretch: 4,
            ..FontProperties::default()
        };
        assert_eq!(
            best_match(&desired, &candidates).unwrap().display_name,
            "Condensed"
        );
    }

    #[test]
    fn generic_names_resolve() {
        assert!(generic_typeface_name("serif").is_some());
        assert!(generic_typeface_name("emoji").is_some());
        assert!(generic_typeface_name("cursive").is_none());
    }
}
