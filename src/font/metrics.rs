//! Aggregated font-wide metrics.

use crate::font::tables::{head::Head, hhea::Hhea, os2::Os2, post::Post};
use crate::font::Rect;

/// Font-wide design-space metrics, all in font units.
#[derive(Clone, Copy, Debug)]
pub struct FontMetrics {
    pub units_per_em: u16,
    pub global_bbox: Rect,
    pub hhea_ascent: i16,
    pub hhea_descent: i16,
    pub hhea_line_gap: i16,
    pub typo_ascent: i16,
    pub typo_descent: i16,
    pub typo_line_gap: i16,
    pub x_height: Option<i16>,
    pub cap_height: Option<i16>,
    pub italic_angle: f32,
    pub underline_position: i16,
    pub underline_thickness: i16,
    pub is_fixed_pitch: bool,
    /// `max(upm * 1.2, typo_ascent - typo_descent + typo_linegap)`, except
    /// when `fsSelection.USE_TYPO_METRICS` is set, in which case the typo
    /// metrics are authoritative.
    pub default_line_spacing: i32,
}

impl FontMetrics {
    pub fn new(head: &Head, hhea: &Hhea, os2: Option<&Os2>, post: Option<&Post>) -> Self {
        let (typo_ascent, typo_descent, typo_line_gap) = match os2 {
            Some(os2) => (os2.typo_ascender, os2.typo_descender, os2.typo_line_gap),
            None => (hhea.ascender, hhea.descender, hhea.line_gap),
        };

        let typo_height =
            i32::from(typo_ascent) - i32::from(typo_descent) + i32::from(typo_line_gap);
        let default_line_spacing = if os2.is_some_and(|t| t.use_typo_metrics()) {
            typo_height
        } else {
            let scaled = (f64::from(head.units_per_em) * 1.2) as i32;
            scaled.max(typo_height)
        };

        FontMetrics {
            units_per_em: head.units_per_em,
            global_bbox: head.global_bbox,
            hhea_ascent: hhea.ascender,
            hhea_descent: hhea.descender,
            hhea_line_gap: hhea.line_gap,
            typo_ascent,
            typo_descent,
            typo_line_gap,
            x_height: os2.and_then(|t| t.x_height),
            cap_height: os2.and_then(|t| t.cap_height),
            italic_angle: post.map_or(0.0, |t| t.italic_angle),
            underline_position: post.map_or(0, |t| t.underline_position),
            underline_thickness: post.map_or(0, |t| t.underline_thickness),
            is_fixed_pitch: post.is_some_and(|t| t.is_fixed_pitch),
            default_line_spacing,
        }
    }

    /// Scales a design-space value into PDF text space (thousandths).
    pub fn to_pdf_units(&self, value: f64) -> f64 {
        value * 1000.0 / f64::from(self.units_per_em)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::tables::head::IndexToLocationFormat;

    fn head(upm: u16) -> Head {
        Head {
            units_per_em: upm,
            global_bbox: Rect {
                x_min: 0,
                y_min: 0,
                x_max: 0,
                y_max: 0,
            },
            index_to_loc_format: IndexToLocationFormat::Short,
        }
    }

    fn hhea() -> Hhea {
        Hhea {
            ascender: 800,
            descender: -200,
            line_gap: 0,
            number_of_h_metrics: 1,
        }
    }

    #[test]
    fn line_spacing_prefers_larger() {
        // upm * 1.2 = 1200 > 1000
        let metrics = FontMetrics::new(&head(1000), &hhea(), None, None);
        assert_eq!(metrics.default_line_spacing, 1200);

        // typo height 2500 > upm * 1.2
        let mut big = hhea();
        big.ascender = 2000;
        big.descender = -500;
        let metrics = FontMetrics::new(&head(1000), &big, None, None);
        assert_eq!(metrics.default_line_spacing, 2500);
    }

    #[test]
    fn pdf_units() {
        let metrics = FontMetrics::new(&head(2048), &hhea(), None, None);
        assert_eq!(metrics.to_pdf_units(2048.0), 1000.0);
    }
}
