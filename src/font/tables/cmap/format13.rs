// https://docs.microsoft.com/en-us/typography/opentype/spec/cmap#format-13-many-to-one-range-mappings

use super::format12::SequentialMapGroup;
use crate::parser::Stream;
use crate::GlyphId;

pub fn mappings(data: &[u8], mut f: impl FnMut(u32, GlyphId)) -> Option<()> {
    let mut s = Stream::new(data);
    s.skip::<u16>(); // format
    s.skip::<u16>(); // reserved
    s.skip::<u32>(); // length
    s.skip::<u32>(); // language
    let count: u32 = s.read()?;
    // Same group layout as format 12, but `start_glyph_id` applies to the
    // whole range instead of incrementing.
    let groups = s.read_array32::<SequentialMapGroup>(count)?;
    for group in groups {
        if group.end_char_code < group.start_char_code {
            return None;
        }

        let gid = group.start_glyph_id;
        if gid == 0 || gid > u32::from(u16::MAX) {
            continue;
        }

        for code_point in group.start_char_code..=group.end_char_code {
            f(code_point, GlyphId(gid));
        }
    }

    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_range_shares_one_glyph() {
        let data = &[
            0x00, 0x0D, 0x00, 0x00, // format + reserved
            0x00, 0x00, 0x00, 0x1C, // length
            0x00, 0x00, 0x00, 0x00, // language
            0x00, 0x00, 0x00, 0x01, // num groups
            0x00, 0x00, 0x00, 0x41, // start char
            0x00, 0x00, 0x00, 0x43, // end char
            0x00, 0x00, 0x00, 0x05, // glyph: 5
        ];
        let mut pairs = vec![];
        mappings(data, |cp, gid| pairs.push((cp, gid))).unwrap();
        assert_eq!(
            pairs,
            [(0x41, GlyphId(5)), (0x42, GlyphId(5)), (0x43, GlyphId(5))]
        );
    }
}
