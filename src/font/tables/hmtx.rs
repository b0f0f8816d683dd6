// https://docs.microsoft.com/en-us/typography/opentype/spec/hmtx

use crate::parser::{FromData, LazyArray16, Stream};
use crate::GlyphId;

/// A full horizontal metric: advance width plus left side bearing.
#[derive(Clone, Copy, Debug)]
pub struct Metric {
    pub advance: u16,
    pub side_bearing: i16,
}

impl FromData for Metric {
    const SIZE: usize = 4;

    #[inline]
    fn parse(data: &[u8]) -> Option<Self> {
        let mut s = Stream::new(data);
        Some(Metric {
            advance: s.read::<u16>()?,
            side_bearing: s.read::<i16>()?,
        })
    }
}

/// A parsed `hmtx` table.
///
/// Glyphs above `numberOfHMetrics` repeat the last advance and carry only
/// a side bearing.
#[derive(Clone, Copy, Default, Debug)]
pub struct Hmtx<'a> {
    metrics: LazyArray16<'a, Metric>,
    extra_bearings: LazyArray16<'a, i16>,
}

impl<'a> Hmtx<'a> {
    pub fn parse(number_of_h_metrics: u16, number_of_glyphs: u16, data: &'a [u8]) -> Option<Self> {
        if number_of_h_metrics == 0 || number_of_h_metrics > number_of_glyphs {
            return None;
        }

        let mut s = Stream::new(data);
        let metrics = s.read_array16::<Metric>(number_of_h_metrics)?;
        let extra_count = number_of_glyphs - number_of_h_metrics;
        // A malformed table may be truncated; treat missing bearings as absent.
        let extra_bearings = s.read_array16::<i16>(extra_count).unwrap_or_default();

        Some(Hmtx {
            metrics,
            extra_bearings,
        })
    }

    pub fn advance(&self, glyph_id: GlyphId) -> Option<u16> {
        let gid = glyph_id.to_u16();
        if gid < self.metrics.len() {
            self.metrics.get(gid).map(|m| m.advance)
        } else if !self.extra_bearings.is_empty()
            && gid < self.metrics.len() + self.extra_bearings.len()
        {
            self.metrics.last().map(|m| m.advance)
        } else {
            None
        }
    }

    pub fn side_bearing(&self, glyph_id: GlyphId) -> Option<i16> {
        let gid = glyph_id.to_u16();
        if gid < self.metrics.len() {
            self.metrics.get(gid).map(|m| m.side_bearing)
        } else {
            self.extra_bearings.get(gid - self.metrics.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_glyphs_repeat_last_advance() {
        let data = [
            0x01, 0xF4, 0x00, 0x0A, // advance 500, lsb 10
            0x02, 0x58, 0x00, 0x14, // advance 600, lsb 20
            0x00, 0x1E, // extra lsb 30
            0x00, 0x28, // extra lsb 40
        ];
        let hmtx = Hmtx::parse(2, 4, &data).unwrap();
        assert_eq!(hmtx.advance(GlyphId(0)), Some(500));
        assert_eq!(hmtx.advance(GlyphId(1)), Some(600));
        assert_eq!(hmtx.advance(GlyphId(2)), Some(600));
        assert_eq!(hmtx.advance(GlyphId(3)), Some(600));
        assert_eq!(hmtx.advance(GlyphId(4)), None);
        assert_eq!(hmtx.side_bearing(GlyphId(3)), Some(40));
    }

    #[test]
    fn more_metrics_than_glyphs() {
        assert!(Hmtx::parse(4, 2, &[0; 16]).is_none());
    }
}
