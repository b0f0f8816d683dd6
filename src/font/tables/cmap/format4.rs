// https://docs.microsoft.com/en-us/typography/opentype/spec/cmap#format-4-segment-mapping-to-delta-values

use crate::parser::Stream;
use crate::GlyphId;

pub fn mappings(data: &[u8], mut f: impl FnMut(u32, GlyphId)) -> Option<()> {
    let mut s = Stream::new(data);
    s.advance(6); // format + length + language
    let seg_count_x2: u16 = s.read()?;
    if seg_count_x2 < 2 {
        return None;
    }

    let seg_count = seg_count_x2 / 2;
    s.advance(6); // searchRange + entrySelector + rangeShift

    let end_codes = s.read_array16::<u16>(seg_count)?;
    s.skip::<u16>(); // reservedPad
    let start_codes = s.read_array16::<u16>(seg_count)?;
    let id_deltas = s.read_array16::<i16>(seg_count)?;
    let id_range_offset_pos = s.offset();
    let id_range_offsets = s.read_array16::<u16>(seg_count)?;

    for index in 0..seg_count {
        let start = start_codes.get(index)?;
        let end = end_codes.get(index)?;
        let id_delta = id_deltas.get(index)?;
        let id_range_offset = id_range_offsets.get(index)?;

        for code_point in start..=end {
            // The final segment maps 0xFFFF to .notdef by convention.
            if code_point == 0xFFFF {
                continue;
            }

            let glyph = if id_range_offset == 0 {
                code_point.wrapping_add(id_delta as u16)
            } else {
                // The offset is relative to its own position inside the
                // idRangeOffset array.
                let delta = (u32::from(code_point) - u32::from(start)) * 2;
                let Ok(delta) = u16::try_from(delta) else {
                    continue;
                };

                let pos = (id_range_offset_pos + usize::from(index) * 2) as u16;
                let pos = pos.wrapping_add(delta).wrapping_add(id_range_offset);
                let glyph_array_value: u16 = match Stream::read_at(data, usize::from(pos)) {
                    Some(n) => n,
                    None => continue,
                };

                // 0 indicates a missing glyph.
                if glyph_array_value == 0 {
                    continue;
                }

                (glyph_array_value as i16).wrapping_add(id_delta) as u16
            };

            if glyph != 0 {
                f(u32::from(code_point), GlyphId::from(glyph));
            }
        }
    }

    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_segment() {
        let data = &[
            0x00, 0x04, // format: 4
            0x00, 0x20, // subtable size: 32
            0x00, 0x00, // language ID: 0
            0x00, 0x04, // 2 x segCount: 4
            0x00, 0x02, // search range: 2
            0x00, 0x00, // entry selector: 0
            0x00, 0x02, // range shift: 2
            // End character codes
            0x00, 0x42, // char code [0]: 66
            0xFF, 0xFF, // char code [1]: 65535
            0x00, 0x00, // reserved: 0
            // Start character codes
            0x00, 0x41, // char code [0]: 65
            0xFF, 0xFF, // char code [1]: 65535
            // Deltas
            0xFF, 0xC0, // delta [0]: -64
            0x00, 0x01, // delta [1]: 1
            // Offsets into Glyph index array
            0x00, 0x00, // offset [0]: 0
            0x00, 0x00, // offset [1]: 0
        ];

        let mut pairs = vec![];
        mappings(data, |cp, gid| pairs.push((cp, gid))).unwrap();
        assert_eq!(pairs, [(65, GlyphId(1)), (66, GlyphId(2))]);
    }

    #[test]
    fn glyph_index_array_segment() {
        let data = &[
            0x00, 0x04, // format: 4
            0x00, 0x2A, // subtable size
            0x00, 0x00, // language ID: 0
            0x00, 0x04, // 2 x segCount: 4
            0x00, 0x02, // search range: 2
            0x00, 0x00, // entry selector: 0
            0x00, 0x02, // range shift: 2
            // End character codes
            0x00, 0x21, // char code [0]: 33
            0xFF, 0xFF, // char code [1]: 65535
            0x00, 0x00, // reserved: 0
            // Start character codes
            0x00, 0x20, // char code [0]: 32
            0xFF, 0xFF, // char code [1]: 65535
            // Deltas
            0x00, 0x00, // delta [0]: 0
            0x00, 0x01, // delta [1]: 1
            // Offsets into Glyph index array
            0x00, 0x04, // offset [0]: 4 -> points at the glyph array below
            0x00, 0x00, // offset [1]: 0
            // Glyph index array
            0x00, 0x05, // glyph for 32
            0x00, 0x07, // glyph for 33
        ];

        let mut pairs = vec![];
        mappings(data, |cp, gid| pairs.push((cp, gid))).unwrap();
        assert_eq!(pairs, [(32, GlyphId(5)), (33, GlyphId(7))]);
    }
}
