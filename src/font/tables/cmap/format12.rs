// https://docs.microsoft.com/en-us/typography/opentype/spec/cmap#format-12-segmented-coverage

use crate::parser::{FromData, Stream};
use crate::GlyphId;

#[derive(Clone, Copy)]
pub struct SequentialMapGroup {
    pub start_char_code: u32,
    pub end_char_code: u32,
    pub start_glyph_id: u32,
}

impl FromData for SequentialMapGroup {
    const SIZE: usize = 12;

    #[inline]
    fn parse(data: &[u8]) -> Option<Self> {
        let mut s = Stream::new(data);
        Some(SequentialMapGroup {
            start_char_code: s.read::<u32>()?,
            end_char_code: s.read::<u32>()?,
            start_glyph_id: s.read::<u32>()?,
        })
    }
}

pub fn mappings(data: &[u8], mut f: impl FnMut(u32, GlyphId)) -> Option<()> {
    let mut s = Stream::new(data);
    s.skip::<u16>(); // format
    s.skip::<u16>(); // reserved
    s.skip::<u32>(); // length
    s.skip::<u32>(); // language
    let count: u32 = s.read()?;
    let groups = s.read_array32::<SequentialMapGroup>(count)?;
    for group in groups {
        if group.end_char_code < group.start_char_code {
            return None;
        }

        for code_point in group.start_char_code..=group.end_char_code {
            let gid = group
                .start_glyph_id
                .checked_add(code_point - group.start_char_code)?;
            if gid != 0 && gid <= u32::from(u16::MAX) {
                f(code_point, GlyphId(gid));
            }
        }
    }

    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segmented_coverage() {
        let data = &[
            0x00, 0x0C, 0x00, 0x00, // format + reserved
            0x00, 0x00, 0x00, 0x1C, // length
            0x00, 0x00, 0x00, 0x00, // language
            0x00, 0x00, 0x00, 0x01, // num groups
            0x00, 0x01, 0xF6, 0x00, // start char: 0x1F600
            0x00, 0x01, 0xF6, 0x02, // end char: 0x1F602
            0x00, 0x00, 0x00, 0x14, // start glyph: 20
        ];
        let mut pairs = vec![];
        mappings(data, |cp, gid| pairs.push((cp, gid))).unwrap();
        assert_eq!(
            pairs,
            [
                (0x1F600, GlyphId(20)),
                (0x1F601, GlyphId(21)),
                (0x1F602, GlyphId(22))
            ]
        );
    }
}
